//! Fragment reassembly, replay filtering, and delivery-queue policy
//! (§4.5). Operates purely on a `PeerRecord` already known to be
//! `Connected` — control frames never reach this path (§4.5.4).

use crate::peer::{PeerRecord, QueueMode, QueuedFrame};
use fpr_core::{frame::Frame, stats::NetworkStats};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    /// Enqueued for the application (possibly only a partial fragment).
    Enqueued,
    /// Dropped as a replay.
    Replay,
    /// Dropped as an orphan fragment (`Continued`/`End` without a
    /// matching in-progress `Start`).
    Orphan,
    /// Dropped because the delivery queue was full.
    QueueFull,
    /// Dropped because `LatestOnly` refuses fragmented messages.
    FragmentedInLatestOnly,
}

/// Applies §4.5 steps 1-3 and 5 to one inbound data frame from a
/// `Connected` peer, updating `stats` for every drop path (§8 invariant
/// 9: "Counter conservation").
pub fn ingest(peer: &mut PeerRecord, frame: &Frame, stats: &mut NetworkStats) -> IngestOutcome {
    use fpr_core::frame::PackageType::*;

    // Step 1: replay check.
    if peer.replay.check(frame.sequence_num).is_err() {
        stats.replay_attacks_blocked.increment();
        return IngestOutcome::Replay;
    }

    // Step 2: fragment discipline (only meaningful in `Normal` mode;
    // `LatestOnly` refuses fragments outright in step 3 below).
    match frame.package_type {
        Start => {
            if peer.receiving_fragmented {
                peer.queue.drain_fragment(peer.fragment_seq);
            }
            peer.receiving_fragmented = true;
            peer.fragment_seq = frame.sequence_num;
        }
        Continued | End => {
            if !peer.receiving_fragmented || frame.sequence_num != peer.fragment_seq {
                stats.packets_dropped.increment();
                return IngestOutcome::Orphan;
            }
            if frame.package_type == End {
                peer.receiving_fragmented = false;
            }
        }
        Single => {}
    }

    // Step 3: queue-mode policy.
    match peer.queue_mode {
        QueueMode::LatestOnly => {
            if frame.package_type.is_fragment() {
                stats.packets_dropped.increment();
                return IngestOutcome::FragmentedInLatestOnly;
            }
            // Single frames overwrite whatever was queued (§4.5.3).
            peer.queue.drain();
        }
        QueueMode::Normal => {}
    }

    let payload = frame.protocol[..frame.payload_size as usize].to_vec();
    let queued = QueuedFrame { package_type: frame.package_type, sequence_num: frame.sequence_num, payload };

    if peer.queue.try_enqueue(queued) {
        stats.packets_received.increment();
        IngestOutcome::Enqueued
    } else {
        stats.packets_dropped.increment();
        IngestOutcome::QueueFull
    }
}

/// Consumer-side assembly (`get_data_from_peer`, §4.5 final paragraph):
/// concatenates payloads from dequeued frames into `out` until a
/// terminal frame type is seen or `out` is full.
pub struct Assembler {
    pub seen_start: bool,
}

impl Default for Assembler {
    fn default() -> Self {
        Self { seen_start: false }
    }
}

impl Assembler {
    /// Feeds one dequeued frame into the assembly. Returns `true` once a
    /// complete message has been written into `out`.
    ///
    /// Out-of-order `Continued`/`End` without a preceding `Start` are
    /// skipped rather than delivered (§4.5 final paragraph).
    pub fn feed(&mut self, frame: QueuedFrame, out: &mut Vec<u8>) -> bool {
        use fpr_core::frame::PackageType::*;
        match frame.package_type {
            Single => {
                out.extend_from_slice(&frame.payload);
                true
            }
            Start => {
                self.seen_start = true;
                out.extend_from_slice(&frame.payload);
                false
            }
            Continued => {
                if !self.seen_start {
                    return false;
                }
                out.extend_from_slice(&frame.payload);
                false
            }
            End => {
                if !self.seen_start {
                    return false;
                }
                self.seen_start = false;
                out.extend_from_slice(&frame.payload);
                true
            }
        }
    }
}
