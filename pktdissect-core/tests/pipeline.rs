//! Controller and IPv4 reassembly tests driven through the public API.

use std::sync::{Arc, Mutex};

use pktdissect_core::protocol::test_utils::{
    build_udp_packet, fragment_frames, Ipv4Builder, UdpBuilder,
};
use pktdissect_core::protocol::ids;
use pktdissect_core::{
    default_registry, CaptureHeader, Controller, ControllerConfig, FragmentConfig,
    FragmentStats, IpFragmentAnalyzer, Packet,
};

type Delivered = Arc<Mutex<Vec<Packet>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn controller(config: ControllerConfig) -> (Controller, Delivered) {
    init_tracing();
    let registry = Arc::new(default_registry().unwrap());
    let delivered: Delivered = Arc::default();
    let sink = Arc::clone(&delivered);
    let controller = Controller::new(registry, config, move |packet: Packet| {
        sink.lock().unwrap().push(packet);
    })
    .unwrap();
    (controller, delivered)
}

fn frame_at(data: Vec<u8>, ts: i64) -> Packet {
    let len = data.len();
    Packet::new(data, CaptureHeader::new(ts, len), ids::ETHERNET)
}

/// A UDP datagram whose IPv4 payload is exactly `payload_len` bytes.
fn udp_datagram(identification: u16, payload_len: usize) -> Vec<u8> {
    let body: Vec<u8> = (0..payload_len - 8).map(|i| (i % 251) as u8).collect();
    let udp = UdpBuilder::new().src_port(4000).dst_port(5000).payload(body).build();
    Ipv4Builder::new()
        .udp()
        .identification(identification)
        .src_ip([10, 0, 0, 1])
        .dst_ip([10, 0, 0, 2])
        .payload(udp)
        .build()
}

fn timestamps(delivered: &Delivered) -> Vec<i64> {
    delivered
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.timestamp_nanos())
        .collect()
}

#[test]
fn test_output_in_capture_order() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    for ts in [30, 10, 20] {
        controller.submit(frame_at(build_udp_packet(1, 2, vec![0; 4]), ts));
    }
    controller.drain().unwrap();
    assert_eq!(controller.shutdown(), 0);

    assert_eq!(timestamps(&delivered), vec![10, 20, 30]);
    let stats = controller.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.dispatched, 3);
}

#[test]
fn test_equal_timestamps_keep_submission_order() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    for port in [1, 2, 3] {
        controller.submit(frame_at(build_udp_packet(port, 9, vec![]), 5));
    }
    controller.shutdown();

    let frames: Vec<u64> = delivered.lock().unwrap().iter().map(|p| p.frame()).collect();
    assert_eq!(frames, vec![1, 2, 3]);
}

#[test]
fn test_reassembly_out_of_order() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    let analyzer = IpFragmentAnalyzer::new(FragmentConfig::default());
    let stats = analyzer.stats_handle();
    controller.register(ids::IPV4, 0, analyzer);

    let datagram = udp_datagram(0x1111, 1500);
    let frames = fragment_frames(&datagram, &[800, 1400]);
    assert_eq!(frames.len(), 3);

    // Last fragment first, then the first, then the middle one.
    controller.submit(frame_at(frames[2].clone(), 100));
    controller.submit(frame_at(frames[0].clone(), 200));
    controller.submit(frame_at(frames[1].clone(), 300));
    controller.drain().unwrap();
    assert_eq!(controller.holds(), 0);
    controller.shutdown();

    let delivered = delivered.lock().unwrap();
    let synthetic: Vec<&Packet> = delivered.iter().filter(|p| p.is_synthetic()).collect();
    assert_eq!(synthetic.len(), 1);
    assert_eq!(delivered.len(), 4);

    let rebuilt = synthetic[0];
    assert_eq!(rebuilt.timestamp_nanos(), 301);
    assert_eq!(rebuilt.start(), ids::IPV4);
    assert_eq!(rebuilt.len(), 1520);
    assert_eq!(u16::from_be_bytes([rebuilt.data()[2], rebuilt.data()[3]]), 1520);
    assert_eq!(u16::from_be_bytes([rebuilt.data()[6], rebuilt.data()[7]]) & 0x3fff, 0);
    assert_eq!(&rebuilt.data()[20..], &datagram[20..]);
    // Header checksum recomputed over the fixed-up header.
    assert_eq!(rebuilt.data(), &datagram[..]);
    assert!(rebuilt.state().contains(ids::UDP));

    // Fragments are delivered before the datagram they formed.
    let order: Vec<i64> = delivered.iter().map(|p| p.timestamp_nanos()).collect();
    assert_eq!(order, vec![100, 200, 300, 301]);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.fragments, 3);
    assert_eq!(snapshot.started, 1);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.timed_out, 0);
}

#[test]
fn test_consumed_fragments_leave_only_the_datagram() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    let config = FragmentConfig {
        consume_fragments: true,
        ..FragmentConfig::default()
    };
    controller.register(ids::IPV4, 0, IpFragmentAnalyzer::new(config));

    let datagram = udp_datagram(0x2222, 64);
    for (i, frame) in fragment_frames(&datagram, &[32]).into_iter().enumerate() {
        controller.submit(frame_at(frame, 10 * (i as i64 + 1)));
    }
    controller.shutdown();

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].is_synthetic());
    assert_eq!(controller.stats().consumed, 2);
}

#[test]
fn test_hold_delays_later_packets_until_completion() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    controller.register(ids::IPV4, 0, IpFragmentAnalyzer::new(FragmentConfig::default()));

    let frames = fragment_frames(&udp_datagram(0x3333, 96), &[48]);
    controller.submit(frame_at(frames[0].clone(), 10));
    controller.submit(frame_at(build_udp_packet(7, 7, vec![1; 8]), 20));
    controller.drain().unwrap();

    assert_eq!(controller.holds(), 1);
    assert_eq!(controller.pending_output(), 2);
    assert!(delivered.lock().unwrap().is_empty());

    controller.submit(frame_at(frames[1].clone(), 30));
    controller.drain().unwrap();
    assert_eq!(controller.holds(), 0);
    controller.shutdown();

    assert_eq!(timestamps(&delivered), vec![10, 20, 30, 31]);
}

#[test]
fn test_interleaved_sequences_balance_holds() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    let analyzer = IpFragmentAnalyzer::new(FragmentConfig::default());
    let stats = analyzer.stats_handle();
    controller.register(ids::IPV4, 0, analyzer);

    let a = fragment_frames(&udp_datagram(1, 160), &[80]);
    let b = fragment_frames(&udp_datagram(2, 160), &[80]);
    controller.submit(frame_at(a[0].clone(), 1));
    controller.submit(frame_at(b[0].clone(), 2));
    controller.drain_input();
    assert_eq!(controller.holds(), 2);

    controller.submit(frame_at(b[1].clone(), 3));
    controller.drain_input();
    assert_eq!(controller.holds(), 1);

    controller.submit(frame_at(a[1].clone(), 4));
    controller.drain_input();
    assert_eq!(controller.holds(), 0);
    controller.shutdown();

    let snapshot = stats.snapshot();
    assert_eq!((snapshot.started, snapshot.completed), (2, 2));
    let synthetic = delivered.lock().unwrap().iter().filter(|p| p.is_synthetic()).count();
    assert_eq!(synthetic, 2);
}

#[test]
fn test_timeout_releases_hold_and_ignores_late_fragment() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    let analyzer = IpFragmentAnalyzer::new(FragmentConfig {
        timeout_nanos: 1_000,
        ..FragmentConfig::default()
    });
    let stats = analyzer.stats_handle();
    controller.register(ids::IPV4, 0, analyzer);

    let frames = fragment_frames(&udp_datagram(0x4444, 96), &[48]);
    controller.submit(frame_at(frames[0].clone(), 0));
    controller.submit(frame_at(build_udp_packet(1, 1, vec![]), 10));
    controller.drain_input();
    assert_eq!(controller.holds(), 1);
    assert_eq!(controller.pending_timeouts(), 1);

    // Processing time passes the deadline: the hold goes and output flows.
    controller.submit(frame_at(build_udp_packet(2, 2, vec![]), 5_000));
    assert_eq!(controller.holds(), 0);
    assert_eq!(controller.pending_output(), 0);

    // The straggler arrives inside the tombstone window.
    controller.submit(frame_at(frames[1].clone(), 5_100));
    controller.drain_input();
    assert_eq!(controller.holds(), 0);
    controller.shutdown();

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 4);
    assert!(delivered.iter().all(|p| !p.is_synthetic()));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.timed_out, 1);
    assert_eq!(snapshot.late, 1);
    assert_eq!(snapshot.completed, 0);
}

#[test]
fn test_overlapping_fragment_abandons_sequence() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    let analyzer = IpFragmentAnalyzer::new(FragmentConfig::default());
    let stats = analyzer.stats_handle();
    controller.register(ids::IPV4, 0, analyzer);

    let datagram = udp_datagram(0x5555, 96);
    let halves = fragment_frames(&datagram, &[48]);
    let thirds = fragment_frames(&datagram, &[32, 64]);

    controller.submit(frame_at(halves[0].clone(), 1));
    controller.submit(frame_at(thirds[1].clone(), 2));
    controller.submit(frame_at(halves[1].clone(), 3));
    controller.drain().unwrap();
    assert_eq!(controller.holds(), 0);
    controller.shutdown();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.abandoned, 1);
    assert_eq!(snapshot.late, 1);
    assert_eq!(snapshot.completed, 0);
    assert!(delivered.lock().unwrap().iter().all(|p| !p.is_synthetic()));
}

#[test]
fn test_shutdown_discards_held_output() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    controller.register(ids::IPV4, 0, IpFragmentAnalyzer::new(FragmentConfig::default()));

    let frames = fragment_frames(&udp_datagram(0x6666, 96), &[48]);
    controller.submit(frame_at(frames[0].clone(), 1));
    controller.submit(frame_at(build_udp_packet(3, 3, vec![]), 2));

    assert_eq!(controller.shutdown(), 2);
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(controller.stats().discarded, 2);
}

#[test]
fn test_late_fragment_in_same_batch_never_completes() {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    let analyzer = IpFragmentAnalyzer::new(FragmentConfig {
        timeout_nanos: 1_000,
        ..FragmentConfig::default()
    });
    let stats = analyzer.stats_handle();
    controller.register(ids::IPV4, 0, analyzer);

    // No drain between the two: the deadline at 1_000 must still apply.
    let frames = fragment_frames(&udp_datagram(0x7777, 96), &[48]);
    controller.submit(frame_at(frames[0].clone(), 0));
    controller.submit(frame_at(frames[1].clone(), 5_000));
    controller.drain_input();
    assert_eq!(controller.holds(), 0);
    controller.shutdown();

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|p| !p.is_synthetic()));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.timed_out, 1);
    assert_eq!(snapshot.late, 1);
    assert_eq!(snapshot.completed, 0);
}

/// Run `frames` through a fresh controller, draining after every `batch`
/// submissions. Returns (timestamp, synthetic) per delivered packet.
fn replay(frames: &[(Vec<u8>, i64)], batch: usize) -> (Vec<(i64, bool)>, FragmentStats) {
    let (mut controller, delivered) = controller(ControllerConfig::default());
    let analyzer = IpFragmentAnalyzer::new(FragmentConfig {
        timeout_nanos: 1_000,
        ..FragmentConfig::default()
    });
    let stats = analyzer.stats_handle();
    controller.register(ids::IPV4, 0, analyzer);

    for chunk in frames.chunks(batch) {
        for (frame, ts) in chunk {
            controller.submit(frame_at(frame.clone(), *ts));
        }
        controller.drain().unwrap();
    }
    controller.shutdown();

    let delivered = delivered
        .lock()
        .unwrap()
        .iter()
        .map(|p| (p.timestamp_nanos(), p.is_synthetic()))
        .collect();
    (delivered, stats.snapshot())
}

#[test]
fn test_outcome_independent_of_drain_cadence() {
    let stale = fragment_frames(&udp_datagram(0x8888, 96), &[48]);
    let fresh = fragment_frames(&udp_datagram(0x9999, 96), &[48]);
    let frames = vec![
        (stale[0].clone(), 0),
        (build_udp_packet(1, 1, vec![]), 10),
        (stale[1].clone(), 5_000),
        (fresh[1].clone(), 6_000),
        (fresh[0].clone(), 6_100),
        (build_udp_packet(2, 2, vec![]), 9_000),
    ];

    let (one_by_one, stats) = replay(&frames, 1);
    assert_eq!(
        one_by_one,
        vec![
            (0, false),
            (10, false),
            (5_000, false),
            (6_000, false),
            (6_100, false),
            (6_101, true),
            (9_000, false),
        ]
    );
    assert_eq!((stats.timed_out, stats.late, stats.completed), (1, 1, 1));

    for batch in [2, 3, frames.len()] {
        assert_eq!(replay(&frames, batch), (one_by_one.clone(), stats));
    }
}
