//! 4-way mutual-authentication handshake engine (§4.3).
//!
//! Both roles are driven by the shape of the inbound `ConnectInfo`
//! (`has_pwk`, `has_lwk`) rather than a single shared state table, since
//! the two roles send and expect different frames at each step; this
//! mirrors the component table in §2 ("Handshake engine: per-peer 4-way
//! handshake state machine (host and client sides)").

use crate::{
    config::ConnectionMode,
    device::Device,
    peer::{ConnectionState, SecurityState},
};
use fpr_core::{
    frame::{ConnectInfo, Frame, Mac, Visibility, CONTROL_ID},
    security::{generate_lwk, generate_pwk, verify_key},
};
use tracing::{debug, warn};

pub fn handle(device: &Device, frame: &Frame, origin: Mac) {
    let info = match ConnectInfo::decode(&frame.protocol) {
        Ok(info) => info,
        Err(_) => {
            device.with_stats(|s| s.packets_dropped.increment());
            return;
        }
    };

    device.ensure_peer_known(origin, &info);

    match device.mode() {
        crate::mode::Mode::Host => host_handle(device, origin, &info),
        crate::mode::Mode::Client => client_handle(device, origin, &info),
        crate::mode::Mode::Extender => {
            // Extenders do not participate in the handshake (§4.7); the
            // mode controller should not route control frames here, but
            // dropping defensively keeps this function total.
            device.with_stats(|s| s.packets_dropped.increment());
        }
    }
}

fn host_handle(device: &Device, origin: Mac, info: &ConnectInfo) {
    match (info.pwk.is_some(), info.lwk.is_some()) {
        // Step 1: client hello, no keys.
        (false, false) => {
            let restarted = device
                .peers()
                .with(origin, |peer| {
                    if peer.sec_state == SecurityState::Established {
                        peer.clear_security();
                        let _ = peer.state.downgrade();
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if restarted {
                debug!(?origin, "host observed client restart, resetting handshake");
            }
            host_apply_connection_policy(device, origin);
        }
        // Step 3: client ack with PWK + LWK.
        (true, true) => {
            let should_send_step4 = device.peers().with(origin, |peer| {
                match peer.sec_state {
                    SecurityState::Established => false, // retransmit, ignore
                    SecurityState::PwkSent => {
                        let host_pwk = device.host_pwk();
                        let Some(host_pwk) = host_pwk else { return false };
                        let Some(received_pwk) = &info.pwk else { return false };
                        if !verify_key(received_pwk, &host_pwk) {
                            warn!(?origin, "host: PWK verification failed in step 3");
                            return false;
                        }
                        peer.lwk = info.lwk;
                        let _ = peer.state.approve();
                        peer.mark_established();
                        true
                    }
                    _ => false, // ACK outside completion of step 3 is ignored
                }
            });
            if should_send_step4.unwrap_or(false) {
                let host_pwk = device.host_pwk();
                let lwk = device.peers().with(origin, |p| p.lwk).flatten();
                send_control(device, origin, host_pwk, lwk);
            }
        }
        // PWK-only shape is what *hosts* emit; a host should never
        // receive it from a client. Drop defensively rather than panic.
        (true, false) => {
            device.with_stats(|s| s.packets_dropped.increment());
        }
    }
}

fn host_apply_connection_policy(device: &Device, origin: Mac) {
    let config = device.host_config();
    let accept = match config.connection_mode {
        ConnectionMode::Auto => device.peers().count_connected() < config.max_peers,
        ConnectionMode::Manual => {
            let approved = device.peers().with(origin, |peer| {
                if peer.state == ConnectionState::Discovered {
                    let _ = peer.state.request();
                }
            });
            let _ = approved;
            match &config.request_cb {
                Some(cb) if cb(origin) => true,
                _ => false,
            }
        }
    };
    if accept {
        host_send_step2(device, origin);
    }
}

/// Sends (or re-sends) step 2. Public so `approve_peer` (§6.2) can call
/// it once a `Manual` host operator accepts a pending peer out-of-band.
pub fn host_send_step2(device: &Device, origin: Mac) {
    let host_pwk = device.ensure_host_pwk();
    device.peers().with(origin, |peer| {
        peer.sec_state = SecurityState::PwkSent;
    });
    send_control(device, origin, Some(host_pwk), None);
}

fn client_handle(device: &Device, origin: Mac, info: &ConnectInfo) {
    match (info.pwk.is_some(), info.lwk.is_some()) {
        // Host broadcast / step-1 shape: a discovery announcement.
        (false, false) => {
            client_on_host_discovered(device, origin, info);
        }
        // Step 2: host's PWK.
        (true, false) => {
            let pwk = info.pwk.unwrap();
            let duplicate = device
                .peers()
                .with(origin, |peer| {
                    peer.sec_state == SecurityState::LwkSent
                        && peer.pwk.map(|k| verify_key(&k, &pwk)).unwrap_or(false)
                })
                .unwrap_or(false);
            if duplicate {
                return; // Exception clause: duplicate step 2 while awaiting step 4, ignore.
            }

            let was_established = device
                .peers()
                .with(origin, |peer| peer.sec_state == SecurityState::Established)
                .unwrap_or(false);
            if was_established {
                debug!(?origin, "client observed host restart mid-session, restarting handshake");
                device.peers().with(origin, |peer| {
                    peer.clear_security();
                    let _ = peer.state.downgrade();
                });
            }

            let lwk = device.with_generator(generate_lwk);
            device.peers().with(origin, |peer| {
                peer.pwk = Some(pwk);
                peer.lwk = Some(lwk);
                peer.sec_state = SecurityState::LwkSent;
            });
            send_control(device, origin, Some(pwk), Some(lwk));
        }
        // Step 4: host's echo of PWK + LWK.
        (true, true) => {
            let established = device.peers().with(origin, |peer| {
                match peer.sec_state {
                    SecurityState::Established => false, // retransmit, ignore
                    SecurityState::LwkSent => {
                        let pwk_ok = peer.pwk.zip(info.pwk).map(|(a, b)| verify_key(&a, &b)).unwrap_or(false);
                        let lwk_ok = peer.lwk.zip(info.lwk).map(|(a, b)| verify_key(&a, &b)).unwrap_or(false);
                        if !pwk_ok || !lwk_ok {
                            warn!(?origin, "client: step 4 key verification failed");
                            return false;
                        }
                        let _ = peer.state.approve();
                        peer.mark_established();
                        true
                    }
                    _ => false,
                }
            });
            if established.unwrap_or(false) {
                device.set_connected_host(Some(origin));
                debug!(?origin, "client handshake established");
            }
        }
    }
}

fn client_on_host_discovered(device: &Device, origin: Mac, info: &ConnectInfo) {
    // At most one connected host at a time (§4.4, §8 invariant 3).
    if device.connected_host().is_some_and(|h| h != origin) {
        // Record but do not engage.
        return;
    }
    if info.visibility == Visibility::Private {
        // Private hosts don't accept unsolicited discovery; we still
        // record them since we were explicitly told about them, but the
        // connection policy below governs whether we engage.
    }

    let config = device.client_config();
    let should_initiate = match config.connection_mode {
        crate::config::ClientConnectionModeConfig::Auto => true,
        crate::config::ClientConnectionModeConfig::Manual => match &config.selection_cb {
            Some(cb) => cb(origin, &info.display_name()),
            None => false, // Manual without a selection callback never initiates.
        },
    };

    if let Some(cb) = &config.discovery_cb {
        cb(origin, &info.display_name());
    }

    if should_initiate {
        device.peers().with(origin, |peer| {
            peer.sec_state = SecurityState::None;
        });
        send_control(device, origin, None, None);
    }
}

fn send_control(
    device: &Device,
    dest: Mac,
    pwk: Option<fpr_core::security::Key>,
    lwk: Option<fpr_core::security::Key>,
) {
    let mut name = [0u8; 32];
    let self_name = device.name();
    let bytes = self_name.as_bytes();
    let n = bytes.len().min(31);
    name[..n].copy_from_slice(&bytes[..n]);

    let info = ConnectInfo {
        name,
        peer_addr: device.self_mac(),
        visibility: device.visibility(),
        pwk,
        lwk,
    };
    let mut protocol = [0u8; fpr_core::frame::PROTOCOL_LEN];
    info.encode_into(&mut protocol);

    let frame = Frame {
        protocol,
        package_type: fpr_core::frame::PackageType::Single,
        id: CONTROL_ID,
        origin_mac: device.self_mac(),
        dest_mac: dest,
        hop_count: 0,
        max_hops: fpr_core::frame::DEFAULT_MAX_HOPS,
        version: fpr_core::version::Version::CURRENT,
        sequence_num: 0,
        payload_size: 0,
    };
    let _ = device.send_raw(dest, &frame);
}

/// Broadcasts an unsolicited, no-keys device-info frame (§4.8 discovery
/// loop, host side), and is also what a client's step 1 uses.
pub fn broadcast_device_info(device: &Device) {
    send_control(device, fpr_core::frame::BROADCAST_MAC, None, None);
}

/// Explicitly initiates step 1 toward a known host (`connect_to_host`, §6.2),
/// bypassing the passive discovery-driven path in `client_on_host_discovered`.
pub fn send_step1(device: &Device, host_mac: Mac) {
    device.peers().with(host_mac, |peer| {
        peer.sec_state = SecurityState::None;
    });
    send_control(device, host_mac, None, None);
}

/// Sends a control keepalive (§4.8 reconnect task). Re-sends whatever
/// key material is already established for this peer: an established
/// receiver treats it as the harmless "ACK while `Established`, ignore"
/// retransmit case in §4.3, while still refreshing `last_seen` at the
/// receive path.
pub fn send_keepalive(device: &Device, peer_mac: Mac) {
    let (pwk, lwk) = device.peers().with(peer_mac, |p| (p.pwk, p.lwk)).unwrap_or((None, None));
    send_control(device, peer_mac, pwk, lwk);
}

impl ConnectInfo {
    pub(crate) fn display_name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ClientConfig, ClientConnectionModeConfig, HostConfig},
        device::Device,
        mode::Mode,
        radio::testing::MockRadio,
    };
    use std::sync::Arc;

    fn make_device(mac: Mac, name: &str, mode: Mode) -> (Arc<Device>, Arc<MockRadio>) {
        let radio = Arc::new(MockRadio::new(mac));
        let device = Device::new(name.to_string(), radio.clone());
        device.set_mode(mode);
        (device, radio)
    }

    #[test]
    fn full_handshake_converges_to_established() {
        let (host, host_radio) = make_device([1; 6], "host", Mode::Host);
        host.set_host_config(HostConfig::default());
        let (client, client_radio) = make_device([2; 6], "client", Mode::Client);
        client.set_client_config(ClientConfig {
            connection_mode: ClientConnectionModeConfig::Auto,
            ..Default::default()
        });

        // Host broadcasts device-info.
        broadcast_device_info(&host);
        let step0 = host_radio.take_sent();
        assert_eq!(step0.len(), 1);
        let step0_frame = Frame::decode(&step0[0].1).unwrap();

        // Client receives it, auto-initiates step 1.
        client.ensure_peer_known([1; 6], &ConnectInfo::decode(&step0_frame.protocol).unwrap());
        handle(&client, &step0_frame, [1; 6]);
        let step1 = client_radio.take_sent();
        let step1_frame = Frame::decode(&step1[0].1).unwrap();

        // Host receives step 1, auto-accepts, sends step 2.
        handle(&host, &step1_frame, [2; 6]);
        let step2 = host_radio.take_sent();
        let step2_frame = Frame::decode(&step2[0].1).unwrap();

        // Client receives step 2, generates LWK, sends step 3.
        handle(&client, &step2_frame, [1; 6]);
        let step3 = client_radio.take_sent();
        let step3_frame = Frame::decode(&step3[0].1).unwrap();

        // Host receives step 3, verifies, establishes, sends step 4.
        handle(&host, &step3_frame, [2; 6]);
        let step4 = host_radio.take_sent();
        let step4_frame = Frame::decode(&step4[0].1).unwrap();

        // Client receives step 4, establishes.
        handle(&client, &step4_frame, [1; 6]);

        assert!(host.peers().with([2; 6], |p| p.sec_state == SecurityState::Established).unwrap());
        assert!(host.peers().with([2; 6], |p| p.is_connected()).unwrap());
        assert!(client.peers().with([1; 6], |p| p.sec_state == SecurityState::Established).unwrap());
        assert!(client.peers().with([1; 6], |p| p.is_connected()).unwrap());
        assert_eq!(client.connected_host(), Some([1; 6]));
    }
}
