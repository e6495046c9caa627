//! The device singleton (§3 "Device", §6.2 "Application API").
//!
//! One explicitly constructed object holds every piece of mutable state
//! (§9: "do not use hidden module-level state"); handlers in
//! `handshake`, `extender`, `reassembly`, and `discovery` all take a
//! `&Device` rather than reaching for globals.

use crate::{
    config::{ClientConfig, Config, HostConfig, PowerMode},
    discovery::{start_discovery_loop, start_reconnect_task, TaskHandle},
    mode::{Mode, NetworkState},
    peer::{ConnectionState, PeerRecord, PeerStore, QueueMode},
    radio::{Radio, ReceiveInfo},
    reassembly::{self, Assembler, IngestOutcome},
};
use fpr_core::{
    frame::{ConnectInfo, Frame, Mac, PackageType, BROADCAST_MAC, DEFAULT_MAX_HOPS, FRAME_LEN, PROTOCOL_LEN},
    random::{Generator, SystemGenerator},
    security::{generate_pwk, Key},
    stats::NetworkStats,
    version::Version,
    Error,
};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tracing::{debug, warn};

/// Options for `send_with_options` (§6.2). Currently carries only the
/// outbound TTL seed; reserved for future per-call overrides.
#[derive(Clone, Copy, Debug)]
pub struct SendOptions {
    pub max_hops: u8,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self { max_hops: DEFAULT_MAX_HOPS }
    }
}

type ReceiveCallback = Box<dyn FnMut(Mac, &[u8]) + Send>;

pub struct Device {
    name: Mutex<String>,
    mac: Mac,
    mode: Mutex<Mode>,
    visibility: Mutex<fpr_core::frame::Visibility>,
    network_state: Mutex<NetworkState>,
    host_pwk: Mutex<Option<Key>>,
    peers: PeerStore,
    stats: Mutex<NetworkStats>,
    seq_counter: AtomicU32,
    radio: Arc<dyn Radio>,
    generator: Mutex<Box<dyn Generator>>,
    config: Mutex<Config>,
    host_config: Mutex<HostConfig>,
    client_config: Mutex<ClientConfig>,
    default_queue_mode: Mutex<QueueMode>,
    receive_callback: Mutex<Option<ReceiveCallback>>,
    connected_host: Mutex<Option<Mac>>,
    discovery_task: Mutex<Option<TaskHandle>>,
    reconnect_task: Mutex<Option<TaskHandle>>,
}

impl Device {
    pub fn new(name: String, radio: Arc<dyn Radio>) -> Arc<Self> {
        let mac = radio.self_mac();
        Arc::new(Self {
            name: Mutex::new(name),
            mac,
            mode: Mutex::new(Mode::default()),
            visibility: Mutex::new(fpr_core::frame::Visibility::Public),
            network_state: Mutex::new(NetworkState::Uninitialized),
            host_pwk: Mutex::new(None),
            peers: PeerStore::new(),
            stats: Mutex::new(NetworkStats::new()),
            seq_counter: AtomicU32::new(0),
            radio,
            generator: Mutex::new(Box::new(SystemGenerator)),
            config: Mutex::new(Config::default()),
            host_config: Mutex::new(HostConfig::default()),
            client_config: Mutex::new(ClientConfig::default()),
            default_queue_mode: Mutex::new(QueueMode::Normal),
            receive_callback: Mutex::new(None),
            connected_host: Mutex::new(None),
            discovery_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
        })
    }

    pub fn mac(&self) -> Mac {
        self.mac
    }

    // ---- Lifecycle (§6.2 "Lifecycle") ----

    pub fn init(&self, config: Config) -> Result<(), Error> {
        *self.config.lock().unwrap() = config.clone();
        let _ = self.radio.set_channel(config.channel);
        let _ = self.radio.register_broadcast_peer();
        self.network_state.lock().unwrap().initialize().map_err(|_| Error::InvalidState { reason: "already initialized" })
    }

    pub fn start(&self) -> Result<(), Error> {
        self.network_state.lock().unwrap().start().map_err(|_| Error::InvalidState { reason: "cannot start from this state" })
    }

    pub fn stop(&self) -> Result<(), Error> {
        self.network_state.lock().unwrap().stop().map_err(|_| Error::InvalidState { reason: "cannot stop from this state" })
    }

    pub fn pause(&self) -> Result<(), Error> {
        self.network_state.lock().unwrap().pause().map_err(|_| Error::InvalidState { reason: "cannot pause unless started" })
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.network_state.lock().unwrap().resume().map_err(|_| Error::InvalidState { reason: "cannot resume unless paused" })
    }

    /// Tears down background tasks, drains queues, clears keys, and
    /// releases peer records (§4.9).
    pub fn deinit(&self) {
        if let Some(task) = self.discovery_task.lock().unwrap().take() {
            task.stop();
        }
        if let Some(task) = self.reconnect_task.lock().unwrap().take() {
            task.stop();
        }
        self.peers.clear();
        *self.host_pwk.lock().unwrap() = None;
        *self.connected_host.lock().unwrap() = None;
        *self.network_state.lock().unwrap() = NetworkState::Uninitialized;
    }

    // ---- Mode/config (§6.2 "Mode/config") ----

    pub fn mode(&self) -> Mode {
        *self.mode.lock().unwrap()
    }

    /// Switching mode re-registers the broadcast peer and, for host mode,
    /// generates a fresh PWK; leaving host mode clears it (§4.4, §5 "Host
    /// PWK is written once on entering host mode ... cleared on mode exit").
    pub fn set_mode(&self, mode: Mode) {
        let previous = {
            let mut guard = self.mode.lock().unwrap();
            let previous = *guard;
            *guard = mode;
            previous
        };
        if previous == mode {
            return;
        }
        let _ = self.radio.register_broadcast_peer();
        if mode == Mode::Host {
            let pwk = self.with_generator(generate_pwk);
            *self.host_pwk.lock().unwrap() = Some(pwk);
        } else if previous == Mode::Host {
            *self.host_pwk.lock().unwrap() = None;
        }
        debug!(?previous, ?mode, "mode changed");
    }

    pub fn set_host_config(&self, config: HostConfig) {
        *self.host_config.lock().unwrap() = config;
    }

    pub fn host_config(&self) -> HostConfig {
        self.host_config.lock().unwrap().clone()
    }

    pub fn set_client_config(&self, config: ClientConfig) {
        *self.client_config.lock().unwrap() = config;
    }

    pub fn client_config(&self) -> ClientConfig {
        self.client_config.lock().unwrap().clone()
    }

    pub fn set_permission_state(&self, visibility: fpr_core::frame::Visibility) {
        *self.visibility.lock().unwrap() = visibility;
    }

    pub fn visibility(&self) -> fpr_core::frame::Visibility {
        *self.visibility.lock().unwrap()
    }

    pub fn set_power_mode(&self, power_mode: PowerMode) {
        self.config.lock().unwrap().power_mode = power_mode;
    }

    pub fn power_mode(&self) -> PowerMode {
        self.config.lock().unwrap().power_mode
    }

    pub fn set_queue_mode_default(&self, mode: QueueMode) {
        *self.default_queue_mode.lock().unwrap() = mode;
    }

    pub fn set_peer_queue_mode(&self, mac: Mac, mode: QueueMode) -> Result<(), Error> {
        self.peers.with(mac, |p| p.queue_mode = mode).ok_or(Error::NotFound)
    }

    // ---- Peer ops (§6.2 "Peer ops") ----

    pub fn add_peer(&self, mac: Mac, name: &str) {
        let default_mode = *self.default_queue_mode.lock().unwrap();
        self.peers.entry_or_insert_with(mac, || PeerRecord::new(name.to_string(), default_mode));
        let _ = self.radio.add_peer(mac);
    }

    pub fn remove_peer(&self, mac: Mac) -> Result<(), Error> {
        let _ = self.radio.del_peer(mac);
        if self.peers.remove(mac) {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    pub fn get_peer_by_name(&self, name: &str) -> Option<Mac> {
        self.peers.by_name(name)
    }

    pub fn get_peer_info(&self, mac: Mac) -> Option<PeerInfo> {
        self.peers.with(mac, |p| PeerInfo {
            name: p.name.clone(),
            state: p.state,
            last_rssi: p.last_rssi,
            is_connected: p.is_connected(),
        })
    }

    pub fn list_all_peers(&self) -> Vec<Mac> {
        self.peers.list()
    }

    pub fn clear_all_peers(&self) {
        self.peers.clear();
    }

    /// Sends a control keepalive and waits briefly for `last_seen` to
    /// advance; a coarse liveness probe rather than a dedicated wire
    /// round trip (the wire format has no ping/pong pair, §6.3).
    pub async fn is_peer_reachable(&self, mac: Mac, timeout: Duration) -> bool {
        let Some(before) = self.peers.with(mac, |p| p.last_seen) else { return false };
        crate::handshake::send_keepalive(self, mac);
        tokio::time::sleep(timeout).await;
        self.peers.with(mac, |p| p.last_seen != before).unwrap_or(false)
    }

    // ---- Host ops (§6.2 "Host ops") ----

    pub fn approve_peer(&self, mac: Mac) -> Result<(), Error> {
        self.peers.with(mac, |p| p.state.approve()).ok_or(Error::NotFound)?.map_err(|_| Error::InvalidState { reason: "peer not pending" })?;
        crate::handshake::host_send_step2(self, mac);
        Ok(())
    }

    pub fn reject_peer(&self, mac: Mac) -> Result<(), Error> {
        self.peers.with(mac, |p| p.state.reject()).ok_or(Error::NotFound)?.map_err(|_| Error::InvalidState { reason: "peer not pending" })
    }

    pub fn block_peer(&self, mac: Mac) -> Result<(), Error> {
        self.peers.with(mac, |p| p.state.block()).ok_or(Error::NotFound)?.map_err(|_| Error::InvalidState { reason: "unreachable" })
    }

    pub fn unblock_peer(&self, mac: Mac) -> Result<(), Error> {
        self.peers.with(mac, |p| p.state.unblock()).ok_or(Error::NotFound)?.map_err(|_| Error::InvalidState { reason: "peer not blocked" })
    }

    pub fn disconnect_peer(&self, mac: Mac) -> Result<(), Error> {
        self.peers
            .with(mac, |p| {
                p.clear_security();
                let _ = p.state.downgrade();
            })
            .ok_or(Error::NotFound)
    }

    pub fn get_connected_count(&self) -> usize {
        self.peers.count_connected()
    }

    // ---- Client ops (§6.2 "Client ops") ----

    /// Runs the discovery loop for `duration`, returning the number of
    /// distinct hosts observed.
    pub async fn scan_for_hosts(self: Arc<Self>, duration: Duration) -> usize {
        let before = self.peers.list().len();
        let task = start_discovery_loop(self.clone(), Some(duration));
        tokio::time::sleep(duration).await;
        let _ = task.is_finished();
        self.peers.list().len().saturating_sub(before)
    }

    pub fn list_discovered_hosts(&self) -> Vec<Mac> {
        self.peers.list()
    }

    pub async fn connect_to_host(&self, mac: Mac, timeout: Duration) -> Result<(), Error> {
        if !self.peers.contains(mac) {
            return Err(Error::NotFound);
        }
        crate::handshake::send_step1(self, mac);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.peers.with(mac, |p| p.is_connected()).unwrap_or(false) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn disconnect(&self) {
        if let Some(mac) = self.connected_host() {
            let _ = self.disconnect_peer(mac);
            self.set_connected_host(None);
        }
    }

    pub fn get_host_info(&self) -> Option<PeerInfo> {
        self.connected_host().and_then(|mac| self.get_peer_info(mac))
    }

    pub fn is_connected(&self) -> bool {
        self.connected_host().is_some()
    }

    // ---- Data (§6.2 "Data") ----

    pub fn send_to_peer(&self, dest: Mac, bytes: &[u8], id: i32) -> Result<(), Error> {
        self.send_with_options(dest, bytes, id, SendOptions::default())
    }

    pub fn broadcast(&self, bytes: &[u8], id: i32) -> Result<(), Error> {
        self.send_with_options(BROADCAST_MAC, bytes, id, SendOptions::default())
    }

    /// §4.6: one increment of the outbound sequence counter shared across
    /// every fragment of this call; `Single` if `bytes.len() <= 180`,
    /// otherwise `Start, Continued*, End` with a small inter-fragment
    /// pause to respect receiver pacing.
    pub fn send_with_options(&self, dest: Mac, bytes: &[u8], id: i32, opts: SendOptions) -> Result<(), Error> {
        if !self.network_state.lock().unwrap().accepts_sends() {
            return Err(Error::InvalidState { reason: "network not started" });
        }
        if dest != BROADCAST_MAC && !self.peers.with(dest, |p| p.is_connected()).unwrap_or(false) {
            return Err(Error::InvalidState { reason: "peer not connected" });
        }

        let seq = self.next_seq();
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&[]]
        } else {
            bytes.chunks(PROTOCOL_LEN).collect()
        };
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.iter().enumerate() {
            let package_type = if chunks.len() == 1 {
                PackageType::Single
            } else if i == 0 {
                PackageType::Start
            } else if i == last {
                PackageType::End
            } else {
                PackageType::Continued
            };

            let mut protocol = [0u8; PROTOCOL_LEN];
            protocol[..chunk.len()].copy_from_slice(chunk);
            let frame = Frame {
                protocol,
                package_type,
                id,
                origin_mac: self.mac,
                dest_mac: dest,
                hop_count: 0,
                max_hops: opts.max_hops,
                version: Version::CURRENT,
                sequence_num: seq,
                payload_size: chunk.len() as u8,
            };

            if let Err(err) = self.send_raw(dest, &frame) {
                self.with_stats(|s| s.send_failures.increment());
                warn!(?dest, "send_with_options: aborting burst after send failure");
                return Err(err);
            }
            if i != last {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(())
    }

    pub fn register_receive_callback(&self, cb: impl FnMut(Mac, &[u8]) + Send + 'static) {
        *self.receive_callback.lock().unwrap() = Some(Box::new(cb));
    }

    /// Dequeues and reassembles one complete message from `mac`'s
    /// delivery queue, or `None` on timeout (§4.5 "Assembly on the
    /// consumer side").
    pub async fn get_data_from_peer(&self, mac: Mac, timeout: Duration) -> Option<Vec<u8>> {
        let queue = self.peers.with(mac, |p| p.queue.clone())?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut assembler = Assembler::default();
        let mut out = Vec::new();
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let frame = queue.dequeue_timeout(deadline - now).await?;
            if assembler.feed(frame, &mut out) {
                return Some(out);
            }
        }
    }

    // ---- Introspection (§6.2 "Introspection") ----

    pub fn get_network_stats(&self) -> NetworkStats {
        *self.stats.lock().unwrap()
    }

    pub fn reset_network_stats(&self) {
        self.stats.lock().unwrap().reset();
    }

    pub fn get_protocol_version(&self) -> Version {
        Version::CURRENT
    }

    /// Builds a human-readable dump of every known route, one line per
    /// peer, and also logs it (§6.2 Introspection).
    pub fn print_route_table(&self) -> String {
        let mut out = String::new();
        for mac in self.peers.list() {
            if let Some((hop_count, next_hop)) = self.peers.with(mac, |p| (p.route.hop_count, p.route.next_hop)) {
                tracing::info!(?mac, hop_count, ?next_hop, "route");
                out.push_str(&format!("{mac:02x?} hop_count={hop_count} next_hop={next_hop:02x?}\n"));
            }
        }
        out
    }

    pub fn cleanup_stale_routes(&self, timeout: Duration) {
        let mut stale = Vec::new();
        self.peers.retain_fresh(timeout, |mac, _| stale.push(mac));
        for mac in stale {
            self.peers.with(mac, |p| {
                p.clear_security();
                let _ = p.state.downgrade();
            });
        }
    }

    // ---- Tasks (§6.2 "Tasks") ----

    pub fn start_loop_task(self: Arc<Self>, duration: Option<Duration>, force_restart: bool) {
        let mut guard = self.discovery_task.lock().unwrap();
        if guard.is_some() && !force_restart {
            return;
        }
        if let Some(old) = guard.take() {
            old.stop();
        }
        *guard = Some(start_discovery_loop(self.clone(), duration));
    }

    pub fn stop_loop_task(&self) {
        if let Some(task) = self.discovery_task.lock().unwrap().take() {
            task.stop();
        }
    }

    pub fn start_reconnect_task(self: Arc<Self>) {
        let mut guard = self.reconnect_task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        *guard = Some(start_reconnect_task(self.clone()));
    }

    pub fn stop_reconnect_task(&self) {
        if let Some(task) = self.reconnect_task.lock().unwrap().take() {
            task.stop();
        }
    }

    // ---- Receive path (§5 "a single radio receive handler") ----

    /// Invoked directly by the radio driver for every inbound frame
    /// (§6.1, `radio.rs`'s push-model design note).
    pub fn on_receive(&self, info: ReceiveInfo, bytes: &[u8]) {
        if !self.network_state.lock().unwrap().accepts_receives() {
            return; // §5: paused short-circuits the receive handler.
        }
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(_) => {
                self.with_stats(|s| s.packets_dropped.increment());
                return;
            }
        };
        if frame.origin_mac != self.mac {
            self.peers.with(frame.origin_mac, |p| p.touch(info.rssi));
        }

        match frame.version.dispatch() {
            fpr_core::version::Dispatch::Future => {
                warn!(version = ?frame.version, "dropping frame from a newer major version");
                self.with_stats(|s| s.packets_dropped.increment());
                return;
            }
            fpr_core::version::Dispatch::Legacy => {
                // §9: the source's legacy handler is a stub; frames are
                // dropped rather than guessing a conversion.
                self.with_stats(|s| s.packets_dropped.increment());
                return;
            }
            fpr_core::version::Dispatch::Current => {}
        }

        match self.mode() {
            Mode::Extender => crate::extender::handle(self, &frame, info),
            Mode::Host | Mode::Client => {
                if frame.is_control() {
                    crate::handshake::handle(self, &frame, frame.origin_mac);
                } else {
                    self.ingest_data_frame(&frame);
                }
            }
        }
    }

    fn ingest_data_frame(&self, frame: &Frame) {
        let connected = self.peers.with(frame.origin_mac, |p| p.is_connected()).unwrap_or(false);
        if !connected {
            self.with_stats(|s| s.packets_dropped.increment());
            return;
        }
        let outcome = self.peers.with(frame.origin_mac, |peer| {
            let mut stats = self.stats.lock().unwrap();
            reassembly::ingest(peer, frame, &mut stats)
        });
        if !matches!(outcome, Some(IngestOutcome::Enqueued)) {
            debug!(?outcome, origin = ?frame.origin_mac, "data frame not enqueued");
        }

        // The application callback runs with neither the peer-store lock
        // nor the stats lock held (§5: "callbacks to the application are
        // invoked with no lock held"), so a reentrant callback calling back
        // into e.g. `get_peer_info`/`send_to_peer` cannot deadlock.
        let mut cb = self.receive_callback.lock().unwrap();
        if let Some(cb) = cb.as_mut() {
            cb(frame.origin_mac, &frame.protocol[..frame.payload_size as usize]);
        }
    }

    // ---- Internals shared with handshake/extender/discovery ----

    pub(crate) fn self_mac(&self) -> Mac {
        self.mac
    }

    pub(crate) fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub(crate) fn peers(&self) -> &PeerStore {
        &self.peers
    }

    pub(crate) fn host_pwk(&self) -> Option<Key> {
        *self.host_pwk.lock().unwrap()
    }

    pub(crate) fn ensure_host_pwk(&self) -> Key {
        let mut guard = self.host_pwk.lock().unwrap();
        if guard.is_none() {
            *guard = Some(self.with_generator(generate_pwk));
        }
        guard.unwrap()
    }

    pub(crate) fn with_generator<R>(&self, f: impl FnOnce(&mut dyn Generator) -> R) -> R {
        let mut guard = self.generator.lock().unwrap();
        f(&mut **guard)
    }

    pub(crate) fn with_stats<R>(&self, f: impl FnOnce(&mut NetworkStats) -> R) -> R {
        f(&mut self.stats.lock().unwrap())
    }

    pub(crate) fn stats_mut(&self) -> std::sync::MutexGuard<'_, NetworkStats> {
        self.stats.lock().unwrap()
    }

    pub(crate) fn network_stats(&self) -> NetworkStats {
        *self.stats.lock().unwrap()
    }

    pub(crate) fn connected_host(&self) -> Option<Mac> {
        *self.connected_host.lock().unwrap()
    }

    pub(crate) fn set_connected_host(&self, mac: Option<Mac>) {
        *self.connected_host.lock().unwrap() = mac;
    }

    pub(crate) fn ensure_peer_known(&self, mac: Mac, info: &ConnectInfo) {
        let default_mode = *self.default_queue_mode.lock().unwrap();
        self.peers.entry_or_insert_with(mac, || PeerRecord::new(info.display_name(), default_mode));
    }

    /// Encodes and transmits one frame without consulting `network_state`
    /// (used by the handshake, discovery, and extender paths, which must
    /// keep functioning across the application-level pause/resume cycle
    /// the §4.6 gate applies only to application data sends).
    pub(crate) fn send_raw(&self, dest: Mac, frame: &Frame) -> Result<(), Error> {
        let bytes: [u8; FRAME_LEN] = frame.encode();
        match self.radio.send(dest, &bytes) {
            Ok(()) => {
                self.with_stats(|s| s.packets_sent.increment());
                Ok(())
            }
            Err(err) => {
                self.with_stats(|s| s.send_failures.increment());
                Err(err)
            }
        }
    }

    fn next_seq(&self) -> u32 {
        self.seq_counter.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub name: String,
    pub state: ConnectionState,
    pub last_rssi: Option<i8>,
    pub is_connected: bool,
}
