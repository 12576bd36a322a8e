//! # Integration tests: publisher → relay → subscribers
//!
//! Wires real stages together through the public traits only. The
//! "transport" ends are in-memory sinks and sources; feedback is observed at
//! the publisher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use relay_media::config::{FanOutConfig, RelayConfig};
use relay_media::fanout::{FanOut, LayerTier, SubscriberId};
use relay_media::passthrough::Passthrough;
use relay_media::{
    status_code, DeliveryError, DeliveryResult, FeedbackSink, FeedbackSource, MediaSink,
    MediaSource, Monitor, Monitored, Packet, PacketKind, SharedPacket,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Stands in for an ingress transport: produces media, counts PLIs and
/// accepts feedback.
#[derive(Default)]
struct Ingress {
    monitor: Monitor,
    plis: AtomicUsize,
    feedback: Mutex<Vec<SharedPacket>>,
}

impl Ingress {
    fn new(audio_ssrc: u32, video_ssrcs: Vec<u32>) -> Arc<Self> {
        let ingress = Arc::new(Ingress::default());
        ingress.set_audio_source_ssrc(audio_ssrc);
        ingress.set_video_source_ssrc_list(video_ssrcs).unwrap();
        let weak = Arc::downgrade(&ingress);
        ingress.set_feedback_sink(weak);
        ingress
    }

    fn push_video(&self, packet: SharedPacket) -> DeliveryResult {
        self.video_sink()
            .ok_or(DeliveryError::NoRoute)?
            .deliver_video_data(packet)
    }

    fn push_audio(&self, packet: SharedPacket) -> DeliveryResult {
        self.audio_sink()
            .ok_or(DeliveryError::NoRoute)?
            .deliver_audio_data(packet)
    }
}

impl Monitored for Ingress {
    fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

impl MediaSource for Ingress {
    fn on_send_pli(&self) -> DeliveryResult {
        self.plis.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

impl FeedbackSink for Ingress {
    fn on_feedback(&self, packet: SharedPacket) -> DeliveryResult {
        let len = packet.len();
        self.feedback.lock().unwrap().push(packet);
        Ok(len)
    }
}

/// Stands in for an egress transport.
struct Egress {
    monitor: Monitor,
    feedback: Arc<FeedbackSource>,
    video: Mutex<Vec<SharedPacket>>,
    audio: AtomicUsize,
}

impl Egress {
    fn new() -> Arc<Self> {
        let egress = Arc::new(Egress {
            monitor: Monitor::new(),
            feedback: Arc::new(FeedbackSource::new()),
            video: Mutex::new(Vec::new()),
            audio: AtomicUsize::new(0),
        });
        egress.set_feedback_source(Some(&egress.feedback));
        egress
    }

    fn video_count(&self) -> usize {
        self.video.lock().unwrap().len()
    }

    /// Simulate a receiver report travelling back upstream.
    fn report(&self, packet: SharedPacket) -> DeliveryResult {
        self.feedback.deliver_feedback(packet)
    }
}

impl Monitored for Egress {
    fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

impl MediaSink for Egress {
    fn on_audio_data(&self, packet: SharedPacket) -> DeliveryResult {
        self.audio.fetch_add(1, Ordering::SeqCst);
        Ok(packet.len())
    }

    fn on_video_data(&self, packet: SharedPacket) -> DeliveryResult {
        let len = packet.len();
        self.video.lock().unwrap().push(packet);
        Ok(len)
    }
}

fn video_packet(spatial: &[u8]) -> SharedPacket {
    Packet::with_timestamp(1, &[0x90; 1200], 1200, PacketKind::Video, 5)
        .unwrap()
        .with_spatial_layers(spatial.to_vec())
        .share()
}

fn feedback_packet() -> SharedPacket {
    Packet::with_timestamp(1, b"\x81\xcd\x00\x03", 4, PacketKind::Other, 9)
        .unwrap()
        .share()
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[test]
fn scenario_a_packet_fields() {
    let pkt = Packet::with_timestamp(0, b"0123456789", 10, PacketKind::Video, 1000).unwrap();
    assert_eq!(pkt.len(), 10);
    assert_eq!(pkt.kind(), PacketKind::Video);
    assert_eq!(pkt.received_at_ms(), 1000);
    assert!(!pkt.is_keyframe());
    assert!(pkt.compatible_spatial_layers().is_empty());
    assert!(pkt.compatible_temporal_layers().is_empty());
    assert!(!pkt.belongs_to_spatial_layer(0));
}

#[test]
fn scenario_b_fresh_source() {
    let ingress = Arc::new(Ingress::default());
    assert_eq!(ingress.audio_source_ssrc(), 0);
    assert_eq!(ingress.video_source_ssrc_list(), vec![0]);
}

#[test]
fn scenario_c_delivery_after_close() {
    let egress = Egress::new();
    egress.set_video_sink_ssrc(77);
    egress.close();

    let result = egress.deliver_video_data(video_packet(&[]));
    assert_eq!(result, Err(DeliveryError::Closed));
    assert!(status_code(&result) < 0);
    assert_eq!(egress.video_count(), 0);
    assert_eq!(egress.video_sink_ssrc(), 77);
}

// ─── Concurrency ────────────────────────────────────────────────────────────

#[test]
fn concurrent_ssrc_writes_are_never_torn() {
    let egress = Egress::new();
    let written: Vec<u32> = (1..=8u32).map(|i| i * 0x0101_0101).collect();

    let handles: Vec<_> = written
        .iter()
        .copied()
        .map(|value| {
            let egress = egress.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    egress.set_video_sink_ssrc(value);
                    let seen = egress.video_sink_ssrc();
                    assert_eq!(seen % 0x0101_0101, 0, "torn read {seen:#x}");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(written.contains(&egress.video_sink_ssrc()));
}

#[test]
fn ssrc_list_snapshot_survives_concurrent_updates() {
    let ingress = Ingress::new(1, vec![10, 20, 30]);
    let writer = {
        let ingress = ingress.clone();
        thread::spawn(move || {
            for i in 0..500u32 {
                ingress
                    .set_video_source_ssrc_list(vec![i, i + 1, i + 2])
                    .unwrap();
            }
        })
    };

    for _ in 0..500 {
        let snapshot = ingress.video_source_ssrc_list();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[1], snapshot[0] + 1);
        assert_eq!(snapshot[2], snapshot[0] + 2);
    }
    writer.join().unwrap();
}

#[test]
fn close_races_with_delivery() {
    let egress = Egress::new();
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let pumps: Vec<_> = (0..4)
        .map(|_| {
            let egress = egress.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let _ = egress.deliver_video_data(video_packet(&[]));
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    egress.close();
    let after_close = egress.video_count();
    thread::sleep(Duration::from_millis(10));
    stop.store(true, Ordering::Relaxed);
    for pump in pumps {
        pump.join().unwrap();
    }

    assert_eq!(egress.video_count(), after_close);
}

// ─── Full pipeline ──────────────────────────────────────────────────────────

#[test]
fn publisher_to_subscribers_through_relay() {
    init_tracing();
    let cfg = RelayConfig::from_toml_str(
        r#"
        [fanout]
        max_subscribers = 4
        pli_interval_ms = 60000
        "#,
    )
    .unwrap();

    let ingress = Ingress::new(111, vec![222, 223]);
    let fanout = FanOut::new(cfg.fanout);
    let weak = Arc::downgrade(&ingress);
    fanout.attach_publisher(weak).unwrap();
    assert_eq!(fanout.audio_sink_ssrc(), 111);
    assert!(fanout.is_video_sink_ssrc(222));

    let low = Egress::new();
    let high = Egress::new();
    let weak = Arc::downgrade(&low);
    fanout
        .add_subscriber_with_tier(SubscriberId(1), weak, LayerTier::new(Some(0), None))
        .unwrap();
    let weak = Arc::downgrade(&high);
    fanout
        .add_subscriber_with_tier(SubscriberId(2), weak, LayerTier::new(Some(1), None))
        .unwrap();

    // First subscriber triggered a PLI; the second fell inside the interval.
    assert_eq!(ingress.plis.load(Ordering::SeqCst), 1);
    assert_eq!(fanout.stats().pli_suppressed, 1);

    let base = video_packet(&[0, 1]);
    ingress.push_video(base.clone()).unwrap();
    ingress.push_video(video_packet(&[1])).unwrap();
    let audio = Packet::with_timestamp(0, b"opus", 4, PacketKind::Audio, 0)
        .unwrap()
        .share();
    ingress.push_audio(audio).unwrap();

    assert_eq!(low.video_count(), 1);
    assert_eq!(high.video_count(), 2);
    assert!(Arc::ptr_eq(&low.video.lock().unwrap()[0], &base));
    assert!(Arc::ptr_eq(&high.video.lock().unwrap()[0], &base));
    assert_eq!(low.audio.load(Ordering::SeqCst), 1);
    assert_eq!(high.audio.load(Ordering::SeqCst), 1);

    // Feedback from a subscriber reaches the publisher.
    assert_eq!(high.report(feedback_packet()), Ok(4));
    assert_eq!(ingress.feedback.lock().unwrap().len(), 1);
    assert_eq!(fanout.stats().feedback_packets, 1);

    // Detached subscribers stop receiving media and feedback routing.
    fanout.remove_subscriber(SubscriberId(2)).unwrap();
    assert_eq!(high.report(feedback_packet()), Err(DeliveryError::NoRoute));
    ingress.push_video(video_packet(&[1])).unwrap();
    assert_eq!(high.video_count(), 2);

    // Closing the relay detaches it from the publisher.
    fanout.close();
    assert!(ingress.video_sink().is_none());
    assert_eq!(ingress.push_video(video_packet(&[0])), Err(DeliveryError::NoRoute));
}

#[test]
fn dropped_sink_association_never_dangles() {
    let ingress = Ingress::new(1, vec![2]);
    let egress = Egress::new();
    let weak = Arc::downgrade(&egress);
    ingress.set_video_sink(weak);
    assert!(ingress.video_sink().is_some());

    drop(egress);
    assert!(ingress.video_sink().is_none());
    assert_eq!(ingress.push_video(video_packet(&[])), Err(DeliveryError::NoRoute));
}

#[test]
fn passthrough_relays_media_pli_and_feedback() {
    init_tracing();
    let ingress = Ingress::new(5, vec![6, 7]);
    let relay = Passthrough::new();
    let weak = Arc::downgrade(&ingress);
    relay.attach_upstream(weak).unwrap();

    assert_eq!(relay.audio_source_ssrc(), 5);
    assert_eq!(relay.video_source_ssrc_list(), vec![6, 7]);
    assert!(relay.is_video_sink_ssrc(6));

    let egress = Egress::new();
    let weak = Arc::downgrade(&egress);
    relay.set_video_sink(weak);
    let weak = relay.feedback_sink().map(|sink| Arc::downgrade(&sink));
    egress.feedback.set_feedback_sink(weak.unwrap());

    ingress.push_video(video_packet(&[])).unwrap();
    assert_eq!(egress.video_count(), 1);

    assert_eq!(relay.send_pli(), Ok(0));
    assert_eq!(ingress.plis.load(Ordering::SeqCst), 1);

    assert_eq!(egress.report(feedback_packet()), Ok(4));
    assert_eq!(ingress.feedback.lock().unwrap().len(), 1);

    relay.close();
    assert!(ingress.video_sink().is_none());
    assert!(ingress.audio_sink().is_none());
    assert_eq!(ingress.push_video(video_packet(&[])), Err(DeliveryError::NoRoute));
    assert_eq!(egress.report(feedback_packet()), Err(DeliveryError::Closed));
}

#[test]
fn fanout_config_defaults_apply() {
    let fanout = FanOut::new(FanOutConfig::default());
    assert_eq!(fanout.config().max_subscribers, 64);
    assert_eq!(fanout.subscriber_count(), 0);
}
