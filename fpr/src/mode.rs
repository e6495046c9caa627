//! Mode controller (§4.4) and network lifecycle state (§4.8 "Network state").

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Mode {
    #[default]
    Client,
    Host,
    Extender,
}

/// `Uninitialized → Initialized → Started ↔ Paused ; Started/Paused → Stopped`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum NetworkState {
    #[default]
    Uninitialized,
    Initialized,
    Started,
    Paused,
    Stopped,
}

impl NetworkState {
    fpr_core::state::event! {
        /// `init` (§6.2).
        initialize(Uninitialized => Initialized);
        /// `start` (§6.2).
        start(Initialized | Stopped => Started);
        /// `pause` (§6.2): the receive handler short-circuits, sends refuse new work.
        pause(Started => Paused);
        /// `resume` (§6.2).
        resume(Paused => Started);
        /// `stop` (§6.2), from either running state.
        stop(Started | Paused => Stopped);
    }

    /// Whether sends are accepted (§4.6: "gated by `network.state`").
    pub fn accepts_sends(self) -> bool {
        matches!(self, Self::Started)
    }

    /// Whether the receive handler processes inbound frames rather than
    /// short-circuiting (§5 "Pausing the network causes the receive
    /// handler to short-circuit").
    pub fn accepts_receives(self) -> bool {
        matches!(self, Self::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_follows_the_diagram() {
        let mut s = NetworkState::Uninitialized;
        s.initialize().unwrap();
        assert_eq!(s, NetworkState::Initialized);
        s.start().unwrap();
        assert_eq!(s, NetworkState::Started);
        s.pause().unwrap();
        assert_eq!(s, NetworkState::Paused);
        assert!(!s.accepts_sends());
        s.resume().unwrap();
        assert_eq!(s, NetworkState::Started);
        s.stop().unwrap();
        assert_eq!(s, NetworkState::Stopped);
    }

    #[test]
    fn restart_after_stop_is_allowed() {
        let mut s = NetworkState::Stopped;
        s.start().unwrap();
        assert_eq!(s, NetworkState::Started);
    }
}
