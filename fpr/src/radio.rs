//! The radio driver collaborator (§6.1). Out of scope for this crate:
//! low-level send/receive, broadcast-peer registration, and MAC
//! acquisition are implemented by whatever concrete radio hardware
//! abstraction the embedding firmware provides. This module only
//! declares the interface the protocol engine needs.

use fpr_core::frame::{Mac, FRAME_LEN};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReceiveInfo {
    pub src: Mac,
    pub dst: Mac,
    pub rssi: i8,
}

/// Everything the engine needs from the underlying broadcast-capable,
/// connectionless datagram radio.
///
/// The driver calls back into the engine by invoking
/// [`crate::device::Device::on_receive`] directly from its own receive
/// context (§5: "invoked from the radio driver's context") — there is no
/// separate callback-registration method on this trait, since a `dyn
/// Radio` object can't itself hold a generic closure without boxing it
/// twice. This is the one place the Rust port inverts the C source's
/// registration-style API into a push model; see `DESIGN.md`.
pub trait Radio: Send + Sync {
    fn self_mac(&self) -> Mac;

    fn set_channel(&self, channel: u8) -> Result<(), fpr_core::Error>;

    fn register_broadcast_peer(&self) -> Result<(), fpr_core::Error>;

    fn add_peer(&self, mac: Mac) -> Result<(), fpr_core::Error>;

    fn del_peer(&self, mac: Mac) -> Result<(), fpr_core::Error>;

    /// Sends exactly one fixed-size frame. Blocks briefly in the driver
    /// (§5); never retries internally (§4.9).
    fn send(&self, dest: Mac, bytes: &[u8; FRAME_LEN]) -> Result<(), fpr_core::Error>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory radio used by tests: captures sent frames instead of
    /// transmitting, and records peer add/remove/channel calls.
    pub struct MockRadio {
        pub mac: Mac,
        pub sent: Mutex<Vec<(Mac, Vec<u8>)>>,
        pub fail_sends: Mutex<bool>,
        pub peers: Mutex<Vec<Mac>>,
    }

    impl MockRadio {
        pub fn new(mac: Mac) -> Self {
            Self {
                mac,
                sent: Mutex::new(Vec::new()),
                fail_sends: Mutex::new(false),
                peers: Mutex::new(Vec::new()),
            }
        }

        pub fn take_sent(&self) -> Vec<(Mac, Vec<u8>)> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl Radio for MockRadio {
        fn self_mac(&self) -> Mac {
            self.mac
        }

        fn set_channel(&self, _channel: u8) -> Result<(), fpr_core::Error> {
            Ok(())
        }

        fn register_broadcast_peer(&self) -> Result<(), fpr_core::Error> {
            Ok(())
        }

        fn add_peer(&self, mac: Mac) -> Result<(), fpr_core::Error> {
            self.peers.lock().unwrap().push(mac);
            Ok(())
        }

        fn del_peer(&self, mac: Mac) -> Result<(), fpr_core::Error> {
            self.peers.lock().unwrap().retain(|p| *p != mac);
            Ok(())
        }

        fn send(&self, dest: Mac, bytes: &[u8; FRAME_LEN]) -> Result<(), fpr_core::Error> {
            if *self.fail_sends.lock().unwrap() {
                return Err(fpr_core::Error::RadioError);
            }
            self.sent.lock().unwrap().push((dest, bytes.to_vec()));
            Ok(())
        }
    }
}
