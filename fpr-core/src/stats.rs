//! Device-wide counters (§3 Device, §8 "Counter conservation").
//!
//! Grounded on `s2n-quic-core::counter::Counter`: rather than silently
//! wrapping, a counter saturates on overflow instead of panicking the
//! receive path (§7: "errors on the receive path are swallowed after
//! counter update ... must never unwind to the driver"). FPR doesn't need
//! the teacher's full generic `Counter<T, Behavior>` machinery since
//! every stat here is a plain saturating `u64`.

use core::fmt;

#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct Counter(u64);

impl Counter {
    #[inline]
    pub const fn new() -> Self {
        Self(0)
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    #[inline]
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Counters named directly after the Device's field list in §3 and the
/// operations named in §6.2 ("Introspection": `get_network_stats`,
/// `reset_network_stats`).
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkStats {
    pub packets_sent: Counter,
    pub packets_received: Counter,
    pub packets_forwarded: Counter,
    pub packets_dropped: Counter,
    pub send_failures: Counter,
    pub replay_attacks_blocked: Counter,
}

impl NetworkStats {
    pub const fn new() -> Self {
        Self {
            packets_sent: Counter::new(),
            packets_received: Counter::new(),
            packets_forwarded: Counter::new(),
            packets_dropped: Counter::new(),
            send_failures: Counter::new(),
            replay_attacks_blocked: Counter::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
