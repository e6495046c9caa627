//! Discovery loop and reconnect/keepalive task (§4.8).

use crate::{device::Device, mode::Mode};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::debug;

pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Host-silence timeout before a peer is downgraded back to `Discovered`
/// (§4.8 "a timeout"). Not pinned to a specific value by the spec; chosen
/// as a small multiple of `KEEPALIVE_INTERVAL` so a couple of missed
/// keepalives are tolerated before the session is torn down.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// A cancellable background loop (§5 "may be implemented as ... async
/// tasks so long as they respect the suspension points ... and can be
/// cancelled by `stop_*` calls").
///
/// `stop()` is cooperative: it flips a flag the loop observes on its next
/// wakeup, per the §9 design-note correction to the source's
/// immediate-delete `network_stop_reconnect_task` behavior.
pub struct TaskHandle {
    stop: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl TaskHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub fn start_discovery_loop(device: Arc<Device>, duration: Option<Duration>) -> TaskHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            if let Some(duration) = duration {
                if started.elapsed() >= duration {
                    break;
                }
            }
            if device.mode() == Mode::Host {
                crate::handshake::broadcast_device_info(&device);
            }
            let interval = device.power_mode().scale(DISCOVERY_INTERVAL);
            tokio::time::sleep(interval).await;
        }
        debug!("discovery loop exited");
    });
    TaskHandle { stop, handle }
}

pub fn start_reconnect_task(device: Arc<Device>) -> TaskHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = tokio::spawn(async move {
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            match device.mode() {
                Mode::Client => client_reconnect_tick(&device),
                Mode::Host => host_reconnect_tick(&device),
                Mode::Extender => {}
            }
            let interval = device.power_mode().scale(KEEPALIVE_INTERVAL);
            tokio::time::sleep(interval).await;
        }
        debug!("reconnect task exited");
    });
    TaskHandle { stop, handle }
}

fn client_reconnect_tick(device: &Device) {
    let Some(host_mac) = device.connected_host() else { return };
    let timeout = device.power_mode().scale(PEER_TIMEOUT);
    let timed_out = device
        .peers()
        .with(host_mac, |peer| std::time::Instant::now().duration_since(peer.last_seen) > timeout)
        .unwrap_or(true);
    if timed_out {
        device.peers().with(host_mac, |peer| {
            peer.clear_security();
            let _ = peer.state.downgrade();
        });
        device.set_connected_host(None);
        debug!(?host_mac, "client: host timed out, downgrading to Discovered");
    } else {
        crate::handshake::send_keepalive(device, host_mac);
    }
}

fn host_reconnect_tick(device: &Device) {
    let timeout = device.power_mode().scale(PEER_TIMEOUT);
    let mut timed_out = Vec::new();
    device.peers().retain_fresh(timeout, |mac, _peer| timed_out.push(mac));
    for mac in &timed_out {
        device.peers().with(*mac, |peer| {
            peer.clear_security();
            let _ = peer.state.downgrade();
        });
        debug!(?mac, "host: peer timed out, downgrading to Discovered");
    }
    for mac in device.peers().list() {
        let connected = device.peers().with(mac, |peer| peer.is_connected()).unwrap_or(false);
        if connected {
            crate::handshake::send_keepalive(device, mac);
        }
    }
}
