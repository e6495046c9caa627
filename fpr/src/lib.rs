//! Fast Peer Router: named device discovery, mutual-authentication
//! handshake, fragmented delivery, and multi-hop forwarding over a
//! broadcast datagram radio.
//!
//! `fpr-codec` and `fpr-core` hold the wire format and the closed state
//! machines; this crate wires them to a concrete `tokio` runtime, a
//! `Radio` collaborator, and the public `Device` API in §6.2.

pub mod config;
pub mod device;
pub mod discovery;
pub mod extender;
pub mod handshake;
pub mod mode;
pub mod peer;
pub mod radio;
pub mod reassembly;

pub use fpr_core::Error;

pub use device::{Device, PeerInfo, SendOptions};
pub use mode::{Mode, NetworkState};
pub use peer::{ConnectionState, QueueMode, SecurityState};
pub use radio::{ReceiveInfo, Radio};
