//! Error kinds the core surfaces (§7).
//!
//! Grounded on `s2n-quic-core::connection::Error`: a `#[non_exhaustive]`
//! enum deriving `displaydoc::Display`, with `std::error::Error` derived
//! via `thiserror` behind a feature so the crate still builds `no_std`.

/// Error kinds the protocol engine and public API surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq, displaydoc::Display)]
#[non_exhaustive]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
pub enum Error {
    /// invalid argument: {reason}
    InvalidArgument { reason: &'static str },
    /// operation not permitted in the current state: {reason}
    InvalidState { reason: &'static str },
    /// peer not found
    NotFound,
    /// allocation of a peer record, queue, or buffer failed
    NoMemory,
    /// max_peers exceeded
    NoSpace,
    /// operation timed out
    Timeout,
    /// underlying radio driver returned an error
    RadioError,
}
