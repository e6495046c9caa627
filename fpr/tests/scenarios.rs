//! End-to-end scenarios wired entirely through `Device::on_receive`, the
//! way a real radio driver would deliver frames, rather than calling
//! `handshake`/`extender` handlers directly (those are unit-tested in
//! their own modules). Frames are ferried by hand between `MockRadio`
//! instances since there is no real broadcast medium in this harness.

use fpr::{
    config::Config,
    device::Device,
    mode::Mode,
    peer::QueueMode,
    radio::testing::MockRadio,
    ReceiveInfo,
};
use fpr_core::frame::{Frame, Mac, PackageType, BROADCAST_MAC};
use std::{sync::Arc, time::Duration};

fn make(mac: Mac, name: &str, mode: Mode) -> (Arc<Device>, Arc<MockRadio>) {
    let radio = Arc::new(MockRadio::new(mac));
    let device = Device::new(name.to_string(), radio.clone());
    device.init(Config::default()).unwrap();
    device.start().unwrap();
    device.set_mode(mode);
    (device, radio)
}

/// Drains everything `radio` has queued and feeds it into `to`'s receive
/// path, as if `to` were listening on the shared channel.
fn deliver(radio: &MockRadio, to: &Device) {
    for (dest, bytes) in radio.take_sent() {
        to.on_receive(ReceiveInfo { src: radio.mac, dst: dest, rssi: -40 }, &bytes);
    }
}

/// Runs the 4-way handshake to completion between an already-constructed
/// host and client pair (§4.3).
fn establish(host: &Device, host_radio: &MockRadio, client: &Device, client_radio: &MockRadio) {
    fpr::handshake::broadcast_device_info(host);
    deliver(host_radio, client); // host's hello -> client sends step 1
    deliver(client_radio, host); // step 1 -> host sends step 2
    deliver(host_radio, client); // step 2 -> client sends step 3
    deliver(client_radio, host); // step 3 -> host sends step 4
    deliver(host_radio, client); // step 4 -> client establishes
}

#[tokio::test]
async fn s1_auto_handshake_converges_to_established() {
    let (host, host_radio) = make([1; 6], "host", Mode::Host);
    let (client, client_radio) = make([2; 6], "client", Mode::Client);

    establish(&host, &host_radio, &client, &client_radio);

    assert!(client.is_connected());
    assert_eq!(host.get_connected_count(), 1);
    assert_eq!(client.get_host_info().unwrap().name, "host");
}

#[tokio::test]
async fn s2_single_frame_message_is_delivered() {
    let (host, host_radio) = make([1; 6], "host", Mode::Host);
    let (client, client_radio) = make([2; 6], "client", Mode::Client);
    establish(&host, &host_radio, &client, &client_radio);

    client.send_to_peer(host.mac(), b"hello world", 0).unwrap();
    deliver(&client_radio, &host);

    let data = host.get_data_from_peer(client.mac(), Duration::from_millis(200)).await;
    assert_eq!(data, Some(b"hello world".to_vec()));
    assert_eq!(host.get_network_stats().packets_received.get(), 1);
}

#[tokio::test]
async fn s3_fragmented_message_reassembles() {
    let (host, host_radio) = make([1; 6], "host", Mode::Host);
    let (client, client_radio) = make([2; 6], "client", Mode::Client);
    establish(&host, &host_radio, &client, &client_radio);

    let payload = vec![7u8; 400];
    client.send_to_peer(host.mac(), &payload, 1).unwrap();
    deliver(&client_radio, &host);

    let data = host.get_data_from_peer(client.mac(), Duration::from_millis(200)).await;
    assert_eq!(data, Some(payload));
}

#[tokio::test]
async fn s4_replayed_frame_is_blocked_and_counted() {
    let (host, host_radio) = make([1; 6], "host", Mode::Host);
    let (client, client_radio) = make([2; 6], "client", Mode::Client);
    establish(&host, &host_radio, &client, &client_radio);

    client.send_to_peer(host.mac(), b"x", 2).unwrap();
    let sent = client_radio.take_sent();
    assert_eq!(sent.len(), 1);
    let (dest, bytes) = sent[0].clone();
    let info = ReceiveInfo { src: client.mac(), dst: dest, rssi: -40 };

    host.on_receive(info, &bytes);
    let first = host.get_data_from_peer(client.mac(), Duration::from_millis(50)).await;
    assert_eq!(first, Some(b"x".to_vec()));

    let before = host.get_network_stats().replay_attacks_blocked.get();
    host.on_receive(info, &bytes); // an attacker captured and replayed the same frame
    assert_eq!(host.get_network_stats().replay_attacks_blocked.get(), before + 1);
}

#[tokio::test]
async fn s5_host_restart_renegotiates_without_growing_peer_count() {
    let (host, host_radio) = make([1; 6], "host", Mode::Host);
    let (client, client_radio) = make([2; 6], "client", Mode::Client);
    establish(&host, &host_radio, &client, &client_radio);
    assert!(client.is_connected());

    // Client rebooted and re-sends step 1 from scratch (§4.3 restart case).
    fpr::handshake::send_step1(&client, host.mac());
    deliver(&client_radio, &host); // host observes the restart, re-sends step 2
    deliver(&host_radio, &client); // client re-sends step 3
    deliver(&client_radio, &host); // host re-establishes, sends step 4
    deliver(&host_radio, &client); // client re-establishes

    assert!(client.is_connected());
    assert_eq!(host.get_connected_count(), 1);
}

fn raw_frame(origin: Mac, dest: Mac, hop_count: u8, max_hops: u8) -> Frame {
    Frame {
        protocol: [0u8; fpr_core::frame::PROTOCOL_LEN],
        package_type: PackageType::Single,
        id: 7,
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
fn s6_extender_forwards_broadcast_and_increments_hop_count() {
    let (extender, extender_radio) = make([9; 6], "ext", Mode::Extender);

    let frame = raw_frame([1; 6], BROADCAST_MAC, 0, 10);
    extender.on_receive(ReceiveInfo { src: [1; 6], dst: BROADCAST_MAC, rssi: -40 }, &frame.encode());

    let sent = extender_radio.take_sent();
    assert_eq!(sent.len(), 1);
    let forwarded = Frame::decode(&sent[0].1).unwrap();
    assert_eq!(forwarded.hop_count, 1);
    assert_eq!(extender.get_network_stats().packets_forwarded.get(), 1);
}

#[test]
fn s6_extender_drops_at_ttl_instead_of_looping() {
    let (extender, extender_radio) = make([9; 6], "ext", Mode::Extender);

    let frame = raw_frame([1; 6], BROADCAST_MAC, 3, 3);
    extender.on_receive(ReceiveInfo { src: [1; 6], dst: BROADCAST_MAC, rssi: -40 }, &frame.encode());

    assert!(extender_radio.take_sent().is_empty());
    assert_eq!(extender.get_network_stats().packets_dropped.get(), 1);
}

#[tokio::test]
async fn s7_latest_only_queue_overwrites_pending_single_frames() {
    let (host, host_radio) = make([1; 6], "host", Mode::Host);
    let (client, client_radio) = make([2; 6], "client", Mode::Client);
    establish(&host, &host_radio, &client, &client_radio);
    host.set_peer_queue_mode(client.mac(), QueueMode::LatestOnly).unwrap();

    client.send_to_peer(host.mac(), b"first", 0).unwrap();
    deliver(&client_radio, &host);
    client.send_to_peer(host.mac(), b"second", 0).unwrap();
    deliver(&client_radio, &host);

    let data = host.get_data_from_peer(client.mac(), Duration::from_millis(100)).await;
    assert_eq!(data, Some(b"second".to_vec()));
}
