//! Peer record and peer store (§3 "Peer record", §5 "Shared resource policy").

use fpr_core::{
    frame::{Mac, PackageType},
    replay::ReplayFilter,
    routing::Route,
    security::Key,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::sync::Notify;

/// §3 "Connection state" / state machine diagram in §4.8.
///
/// `Blocked` is reachable from any other state and is otherwise terminal
/// except for explicit `unblock`; every other transition is named after
/// the event that drives it in §4.4/§4.8.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Discovered,
    Pending,
    Connected,
    Rejected,
    Blocked,
}

impl ConnectionState {
    fpr_core::state::event! {
        /// Host places a step-1 peer into `Pending` under `Manual` policy (§4.4).
        request(Discovered => Pending);
        /// Host approves a pending peer (§4.4), or either side completes the
        /// handshake under `Auto` policy directly from `Discovered`.
        approve(Pending | Discovered => Connected);
        /// Host rejects a pending peer (§6.2 `reject_peer`).
        reject(Pending => Rejected);
        /// A timeout or explicit disconnect drops a connected peer back to
        /// `Discovered` so the discovery path can reconnect it (§4.8, §4.9).
        downgrade(Connected => Discovered);
        /// `block_peer` (§6.2), reachable from any state.
        block(Discovered | Pending | Connected | Rejected | Blocked => Blocked);
        /// `unblock_peer` (§6.2).
        unblock(Blocked => Discovered);
    }
}

/// §3 "Security state" / §4.3's per-step table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecurityState {
    None,
    PwkSent,
    PwkReceived,
    LwkSent,
    LwkReceived,
    Established,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueMode {
    Normal,
    LatestOnly,
}

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
pub struct QueuedFrame {
    pub package_type: PackageType,
    /// The sending burst's sequence number (§4.6: one shared
    /// `sequence_num` per fragmented message), kept alongside the payload
    /// so `drain_fragment` can remove only the fragments belonging to a
    /// restarted message rather than the whole queue.
    pub sequence_num: u32,
    pub payload: Vec<u8>,
}

/// Bounded FIFO of complete (or, in `Normal` mode, in-progress) frames
/// delivered to the application (§3 "Delivery queue", §4.5.5, §4.9
/// "Queue overflow is a silent drop with a counter bump").
pub struct DeliveryQueue {
    inner: Mutex<VecDeque<QueuedFrame>>,
    capacity: usize,
    notify: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity)), capacity, notify: Notify::new() }
    }

    /// Non-blocking enqueue (§4.5.5). Returns `false` on a full queue —
    /// the caller is responsible for bumping `packets_dropped`.
    pub fn try_enqueue(&self, frame: QueuedFrame) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() >= self.capacity {
            return false;
        }
        inner.push_back(frame);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Drops every queued frame, used by `LatestOnly`'s single-frame
    /// overwrite policy (§4.5.3) and by peer teardown.
    pub fn drain(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Drops only in-progress fragments belonging to `seq`, used when a
    /// new `Start` frame arrives mid-reassembly (§4.5.2). `Normal` queue
    /// mode streams partial fragments out as they arrive, so a restarted
    /// message must remove anything tagged with the old sequence number
    /// while leaving unrelated, already-queued complete messages alone.
    pub fn drain_fragment(&self, seq: u32) {
        self.inner.lock().unwrap().retain(|frame| frame.sequence_num != seq);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    fn try_dequeue(&self) -> Option<QueuedFrame> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Blocking (with timeout) dequeue used by `get_data_from_peer`.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<QueuedFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.try_dequeue() {
                return Some(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let notified = self.notify.notified();
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }
}

pub struct PeerRecord {
    pub name: String,
    pub last_seen: Instant,
    pub last_rssi: Option<i8>,
    pub state: ConnectionState,
    pub sec_state: SecurityState,
    pub pwk: Option<Key>,
    pub lwk: Option<Key>,
    pub replay: ReplayFilter,
    pub receiving_fragmented: bool,
    pub fragment_seq: u32,
    /// `Arc`-wrapped so `Device::get_data_from_peer` can clone the queue
    /// handle out from under the store's short-lived lock and await on it
    /// independently, rather than holding the peer-store mutex across an
    /// `.await` (§5: "callbacks to the application are invoked with no
    /// lock held").
    pub queue: Arc<DeliveryQueue>,
    pub queue_mode: QueueMode,
    pub route: Route,
}

impl PeerRecord {
    pub fn new(name: String, default_queue_mode: QueueMode) -> Self {
        Self {
            name,
            last_seen: Instant::now(),
            last_rssi: None,
            state: ConnectionState::Discovered,
            sec_state: SecurityState::None,
            pwk: None,
            lwk: None,
            replay: ReplayFilter::new(),
            receiving_fragmented: false,
            fragment_seq: 0,
            queue: Arc::new(DeliveryQueue::new(DEFAULT_QUEUE_CAPACITY)),
            queue_mode: default_queue_mode,
            route: Route::none(),
        }
    }

    /// §9 Open Question: `state == Connected` is authoritative;
    /// `is_connected` is always derived, never stored.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn touch(&mut self, rssi: i8) {
        self.last_seen = Instant::now();
        self.last_rssi = Some(rssi);
    }

    /// Clears key material and resets handshake/replay progress, used on
    /// peer-restart detection (§4.3) and on full teardown.
    pub fn clear_security(&mut self) {
        self.pwk = None;
        self.lwk = None;
        self.sec_state = SecurityState::None;
        self.replay.reset();
        self.receiving_fragmented = false;
    }

    /// §4.3: "On transition to Established, the peer's replay sequence is
    /// reset to 0, the fragment-in-progress flag is cleared, and any
    /// residual queued frames from the prior session are drained."
    pub fn mark_established(&mut self) {
        self.sec_state = SecurityState::Established;
        self.replay.reset();
        self.receiving_fragmented = false;
        self.queue.drain();
    }
}

/// Concurrency-safe MAC→peer map (§5: "mediated by a single
/// recursive-safe mutex"; in practice a short-lived `std::sync::Mutex`
/// critical section per access, never held across an `.await` or an
/// application callback).
pub struct PeerStore {
    inner: Mutex<HashMap<Mac, PeerRecord>>,
}

impl Default for PeerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    pub fn with<R>(&self, mac: Mac, f: impl FnOnce(&mut PeerRecord) -> R) -> Option<R> {
        let mut guard = self.inner.lock().unwrap();
        guard.get_mut(&mac).map(f)
    }

    pub fn entry_or_insert_with(&self, mac: Mac, f: impl FnOnce() -> PeerRecord) {
        let mut guard = self.inner.lock().unwrap();
        guard.entry(mac).or_insert_with(f);
    }

    pub fn contains(&self, mac: Mac) -> bool {
        self.inner.lock().unwrap().contains_key(&mac)
    }

    pub fn remove(&self, mac: Mac) -> bool {
        self.inner.lock().unwrap().remove(&mac).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn by_name(&self, name: &str) -> Option<Mac> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .find(|(_, peer)| peer.name == name)
            .map(|(mac, _)| *mac)
    }

    pub fn list(&self) -> Vec<Mac> {
        self.inner.lock().unwrap().keys().copied().collect()
    }

    pub fn count_connected(&self) -> usize {
        self.inner.lock().unwrap().values().filter(|p| p.is_connected()).count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ages out peers not seen within `timeout` (§4.8 reconnect task,
    /// `cleanup_stale_routes`).
    pub fn retain_fresh(&self, timeout: Duration, mut on_stale: impl FnMut(Mac, &mut PeerRecord)) {
        let mut guard = self.inner.lock().unwrap();
        let now = Instant::now();
        for (mac, peer) in guard.iter_mut() {
            if peer.is_connected() && now.duration_since(peer.last_seen) > timeout {
                on_stale(*mac, peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_transitions_follow_the_diagram() {
        let mut s = ConnectionState::Discovered;
        s.request().unwrap();
        assert_eq!(s, ConnectionState::Pending);
        s.approve().unwrap();
        assert_eq!(s, ConnectionState::Connected);
        s.downgrade().unwrap();
        assert_eq!(s, ConnectionState::Discovered);
    }

    #[test]
    fn block_is_reachable_from_any_state() {
        for mut s in [
            ConnectionState::Discovered,
            ConnectionState::Pending,
            ConnectionState::Connected,
            ConnectionState::Rejected,
        ] {
            s.block().unwrap();
            assert_eq!(s, ConnectionState::Blocked);
        }
    }

    #[test]
    fn is_connected_is_derived_not_stored() {
        let mut peer = PeerRecord::new("x".into(), QueueMode::Normal);
        assert!(!peer.is_connected());
        peer.state = ConnectionState::Connected;
        assert!(peer.is_connected());
    }

    #[tokio::test]
    async fn queue_drops_on_full_and_reports_capacity() {
        let queue = DeliveryQueue::new(2);
        assert!(queue.try_enqueue(QueuedFrame { package_type: PackageType::Single, sequence_num: 1, payload: vec![1] }));
        assert!(queue.try_enqueue(QueuedFrame { package_type: PackageType::Single, sequence_num: 2, payload: vec![2] }));
        assert!(!queue.try_enqueue(QueuedFrame { package_type: PackageType::Single, sequence_num: 3, payload: vec![3] }));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let queue = DeliveryQueue::new(2);
        let result = queue.dequeue_timeout(Duration::from_millis(20)).await;
        assert!(result.is_none());
    }
}
