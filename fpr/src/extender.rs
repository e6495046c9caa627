//! Extender / router forwarding logic (§4.7).

use crate::{device::Device, peer::QueueMode, radio::ReceiveInfo};
use fpr_core::frame::{Frame, Mac, BROADCAST_MAC};
use tracing::{debug, warn};

pub fn handle(device: &Device, frame: &Frame, info: ReceiveInfo) {
    device.peers().entry_or_insert_with(frame.origin_mac, || {
        crate::peer::PeerRecord::new(String::new(), QueueMode::Normal)
    });
    device.peers().with(frame.origin_mac, |peer| {
        peer.touch(info.rssi);
        peer.route.learn(frame.hop_count, info.src);
    });

    let is_local = frame.dest_mac == device.self_mac() || frame.is_broadcast_dest();
    if is_local {
        deliver_locally(device, frame);
    }

    let loop_free = frame.origin_mac != device.self_mac();
    let ttl_ok = frame.hop_count < frame.max_hops;
    let should_forward = loop_free && ttl_ok && (frame.is_broadcast_dest() || frame.dest_mac != device.self_mac());

    if !should_forward {
        if is_local {
            return;
        }
        device.with_stats(|s| s.packets_dropped.increment());
        debug!(hop_count = frame.hop_count, max_hops = frame.max_hops, "extender: TTL exceeded or loop, dropping");
        return;
    }

    let next_hop = route_next_hop(device, frame.dest_mac);
    let mut forwarded = frame.clone();
    forwarded.hop_count = frame.hop_count.saturating_add(1);

    match device.send_raw(next_hop, &forwarded) {
        Ok(()) => device.with_stats(|s| s.packets_forwarded.increment()),
        Err(_) => {
            device.with_stats(|s| s.send_failures.increment());
            warn!(?next_hop, "extender: forward send failed");
        }
    }
}

fn route_next_hop(device: &Device, dest: Mac) -> Mac {
    if dest == BROADCAST_MAC {
        return BROADCAST_MAC;
    }
    device.peers().with(dest, |peer| peer.route.next_hop).flatten().unwrap_or(BROADCAST_MAC)
}

fn deliver_locally(device: &Device, frame: &Frame) {
    if frame.is_control() {
        // Extenders do not engage in the handshake (§4.7 scope); a
        // control frame addressed to an extender is just noise.
        device.with_stats(|s| s.packets_dropped.increment());
        return;
    }
    device.peers().with(frame.origin_mac, |peer| {
        let mut stats = device.stats_mut();
        crate::reassembly::ingest(peer, frame, &mut stats)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mode::Mode, radio::testing::MockRadio};
    use std::sync::Arc;

    fn frame(origin: Mac, dest: Mac, hop_count: u8, max_hops: u8) -> Frame {
        Frame {
            protocol: [0u8; fpr_core::frame::PROTOCOL_LEN],
            package_type: fpr_core::frame::PackageType::Single,
            id: 0,
            origin_mac: origin,
            dest_mac: dest,
            hop_count,
            max_hops,
            version: fpr_core::version::Version::CURRENT,
            sequence_num: 1,
            payload_size: 0,
        }
    }

    #[test]
    fn forwards_and_increments_hop_count() {
        let radio = Arc::new(MockRadio::new([9; 6]));
        let extender = Device::new("x".into(), radio.clone());
        extender.set_mode(Mode::Extender);

        let f = frame([1; 6], [2; 6], 0, 10);
        handle(&extender, &f, ReceiveInfo { src: [1; 6], dst: [9; 6], rssi: -40 });

        let sent = radio.take_sent();
        assert_eq!(sent.len(), 1);
        let forwarded = Frame::decode(&sent[0].1).unwrap();
        assert_eq!(forwarded.hop_count, 1);
        assert_eq!(extender.network_stats().packets_forwarded.get(), 1);
    }

    #[test]
    fn drops_at_ttl_without_looping() {
        let radio = Arc::new(MockRadio::new([9; 6]));
        let extender = Device::new("x".into(), radio.clone());
        extender.set_mode(Mode::Extender);

        let f = frame([1; 6], [2; 6], 1, 1);
        handle(&extender, &f, ReceiveInfo { src: [1; 6], dst: [9; 6], rssi: -40 });

        assert!(radio.take_sent().is_empty());
        assert_eq!(extender.network_stats().packets_dropped.get(), 1);
    }

    #[test]
    fn does_not_forward_frames_it_originated() {
        let radio = Arc::new(MockRadio::new([9; 6]));
        let extender = Device::new("x".into(), radio.clone());
        extender.set_mode(Mode::Extender);

        let f = frame([9; 6], [2; 6], 0, 10);
        handle(&extender, &f, ReceiveInfo { src: [9; 6], dst: [2; 6], rssi: -40 });

        assert!(radio.take_sent().is_empty());
    }
}
