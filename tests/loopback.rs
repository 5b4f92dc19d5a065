//! End-to-end loopback scenarios over real UDP sockets on localhost,
//! exercising the sender, receiver and RTCP endpoints together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sam_rtp::{PAYLOAD_PCM16, ReceiverReport, RtcpObserver, RtpReceiver, RtpSender};

fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Bind a receiver and a sender pointed at each other over loopback, with
/// ephemeral ports discovered after binding. `sender_observer`, if given, is
/// installed before the sender's RTCP endpoint starts its receive thread.
fn make_pair_full(
    report_interval_ms: u32,
    jitter_buffer_capacity: usize,
    sender_observer: Option<Arc<dyn RtcpObserver>>,
) -> (RtpSender, RtpReceiver) {
    let mut receiver = RtpReceiver::new(
        0,
        0,
        0,
        report_interval_ms,
        48000,
        2,
        256,
        jitter_buffer_capacity,
    )
    .unwrap();
    receiver.start().unwrap();
    let receiver_rtp_port = receiver.local_rtp_port().unwrap();
    let receiver_rtcp_port = receiver.local_rtcp_port().unwrap();

    let mut sender = RtpSender::new(
        "127.0.0.1",
        receiver_rtp_port,
        0,
        receiver_rtcp_port,
        report_interval_ms,
        48000,
        PAYLOAD_PCM16,
        0xFEED_BEEF,
    )
    .unwrap();
    if let Some(observer) = sender_observer {
        sender.set_rtcp_observer(observer);
    }
    sender.start().unwrap();
    receiver.set_remote_rtcp_port(sender.local_rtcp_port().unwrap());

    (sender, receiver)
}

fn make_pair_with_observer(
    report_interval_ms: u32,
    sender_observer: Option<Arc<dyn RtcpObserver>>,
) -> (RtpSender, RtpReceiver) {
    make_pair_full(report_interval_ms, 64, sender_observer)
}

fn make_pair(report_interval_ms: u32) -> (RtpSender, RtpReceiver) {
    make_pair_with_observer(report_interval_ms, None)
}

fn make_pair_with_capacity(
    report_interval_ms: u32,
    jitter_buffer_capacity: usize,
) -> (RtpSender, RtpReceiver) {
    make_pair_full(report_interval_ms, jitter_buffer_capacity, None)
}

fn test_planes(samples: usize) -> Vec<Vec<f32>> {
    let ramp: Vec<f32> = (0..samples)
        .map(|n| (n as f32 / samples as f32) * 2.0 - 1.0)
        .collect();
    vec![ramp.clone(), ramp]
}

#[test]
fn e1_in_order_loopback_delivers_all_packets() {
    let (mut sender, receiver) = make_pair(10_000); // long interval, SR/RR not under test here
    sender.force_timestamp(0);
    sender.force_sequence_num(0);

    let planes = test_planes(256);
    let plane_refs: Vec<&[f32]> = planes.iter().map(|p| p.as_slice()).collect();

    for _ in 0..100 {
        sender.send_audio(&plane_refs).unwrap();
    }

    assert!(wait_until(
        || receiver.stats().packets_received >= 100,
        Duration::from_secs(2)
    ));

    let stats = receiver.stats();
    assert_eq!(stats.packets_received, 100);
    assert_eq!(stats.highest_extended_sequence, 99);
    assert_eq!(stats.cumulative_lost, 0);

    let mut ch0 = vec![0.0f32; 256];
    let mut ch1 = vec![0.0f32; 256];
    for _ in 0..100 {
        let mut out: Vec<&mut [f32]> = vec![&mut ch0, &mut ch1];
        let delivered = receiver.pull(&mut out).unwrap();
        assert!(delivered);
    }

    let mut out: Vec<&mut [f32]> = vec![&mut ch0, &mut ch1];
    assert!(!receiver.pull(&mut out).unwrap()); // queue now drained, underrun
}

#[test]
fn e2_duplicate_packet_counts_once_with_no_loss() {
    let (mut sender, receiver) = make_pair(10_000);
    sender.force_timestamp(0);
    sender.force_sequence_num(10);

    let planes = test_planes(256);
    let plane_refs: Vec<&[f32]> = planes.iter().map(|p| p.as_slice()).collect();

    sender.send_audio(&plane_refs).unwrap(); // seq 10
    sender.force_sequence_num(10); // rewind: resend seq 10
    sender.send_audio(&plane_refs).unwrap(); // duplicate

    assert!(wait_until(
        || receiver.stats().duplicate_drops >= 1,
        Duration::from_secs(2)
    ));

    let stats = receiver.stats();
    assert_eq!(stats.packets_received, 1);
    assert_eq!(stats.duplicate_drops, 1);
    assert_eq!(stats.cumulative_lost, 0);
}

#[test]
fn e3_dropped_packet_is_counted_as_loss() {
    let (mut sender, receiver) = make_pair(10_000);
    sender.force_timestamp(0);
    sender.force_sequence_num(0);

    let planes = test_planes(256);
    let plane_refs: Vec<&[f32]> = planes.iter().map(|p| p.as_slice()).collect();

    for i in 0..100u32 {
        if i == 50 {
            // Skip sending this sequence number, simulating a dropped packet.
            sender.force_sequence_num(sender.sequence().wrapping_add(1));
            sender.force_timestamp(sender.timestamp().wrapping_add(256));
            continue;
        }
        sender.send_audio(&plane_refs).unwrap();
    }

    assert!(wait_until(
        || receiver.stats().packets_received >= 99,
        Duration::from_secs(2)
    ));

    let stats = receiver.stats();
    assert_eq!(stats.packets_received, 99);
    assert_eq!(stats.cumulative_lost, 1);
    assert_eq!(sam_rtp::loss_fraction(100, 1), 3); // Testable Property 8 / scenario E3
}

#[test]
fn e5_permanent_packet_loss_does_not_stall_playout_forever() {
    // A small buffer so the gap-width recovery threshold is reached with a
    // handful of packets rather than dozens.
    let jitter_buffer_capacity = 4;
    let (mut sender, receiver) = make_pair_with_capacity(10_000, jitter_buffer_capacity);
    sender.force_timestamp(0);
    sender.force_sequence_num(0);

    let planes = test_planes(256);
    let plane_refs: Vec<&[f32]> = planes.iter().map(|p| p.as_slice()).collect();

    let mut ch0 = vec![0.0f32; 256];
    let mut ch1 = vec![0.0f32; 256];

    // Deliver seq 0 and 1 in order before anything else arrives.
    sender.send_audio(&plane_refs).unwrap();
    sender.send_audio(&plane_refs).unwrap();
    assert!(wait_until(
        || receiver.stats().packets_received >= 2,
        Duration::from_secs(2)
    ));
    let mut delivered_before_gap = 0;
    for _ in 0..2 {
        let mut out: Vec<&mut [f32]> = vec![&mut ch0, &mut ch1];
        if receiver.pull(&mut out).unwrap() {
            delivered_before_gap += 1;
        }
    }
    assert_eq!(delivered_before_gap, 2, "seq 0 and 1 must deliver before the gap");

    // seq 2 is permanently lost: skip it and never resend, then keep the
    // flow going with real packets well past it.
    sender.force_sequence_num(3);
    for _ in 0..8 {
        sender.send_audio(&plane_refs).unwrap(); // seq 3..=10
    }
    assert!(wait_until(
        || receiver.stats().packets_received >= 10,
        Duration::from_secs(2)
    ));

    // Pull well past the point where the stalled cursor (stuck on seq 2)
    // must recover by skipping ahead, rather than returning underrun on
    // every call for the rest of the flow's life.
    let mut delivered_after_gap = 0;
    for _ in 0..10 {
        let mut out: Vec<&mut [f32]> = vec![&mut ch0, &mut ch1];
        if receiver.pull(&mut out).unwrap() {
            delivered_after_gap += 1;
        }
    }
    assert!(
        delivered_after_gap > 0,
        "playout must recover and deliver later packets instead of stalling forever on the lost sequence number"
    );

    let stats = receiver.stats();
    assert_eq!(stats.packets_received, 10);
    assert_eq!(stats.cumulative_lost, 1); // only seq 2 itself, never buffer-evicted siblings
}

struct CapturedRr {
    slot: Arc<Mutex<Option<ReceiverReport>>>,
}

impl RtcpObserver for CapturedRr {
    fn on_sender_report(&self, _last_sr_middle32: u32) {}

    fn on_receiver_report(&self, report: ReceiverReport) {
        *self.slot.lock() = Some(report);
    }
}

#[test]
fn e4_sr_rr_exchange_carries_matching_lsr() {
    let captured = Arc::new(Mutex::new(None));
    let observer: Arc<dyn RtcpObserver> = Arc::new(CapturedRr {
        slot: captured.clone(),
    });
    // short interval so both SR and RR fire quickly; observer installed
    // before the sender's RTCP endpoint starts its receive thread
    let (mut sender, receiver) = make_pair_with_observer(80, Some(observer));

    sender.force_timestamp(0);
    sender.force_sequence_num(0);

    let planes = test_planes(512);
    let plane_refs: Vec<&[f32]> = planes.iter().map(|p| p.as_slice()).collect();

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && captured.lock().is_none() {
        sender.send_audio(&plane_refs).unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }

    let report = captured.lock().clone();
    let _ = receiver; // keep receiver alive for the duration of the exchange
    assert!(report.is_some(), "expected an RR to arrive at the sender");
    let report = report.unwrap();
    assert_ne!(report.last_sr_middle32, 0);
}
