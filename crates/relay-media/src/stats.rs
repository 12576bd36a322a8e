//! # Delivery Statistics
//!
//! Lock-free counters a relay stage bumps on its delivery path, and a
//! serializable snapshot for JSON export.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a stage's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Audio packets accepted.
    pub audio_packets: u64,
    /// Video packets accepted.
    pub video_packets: u64,
    /// Payload bytes accepted (audio + video).
    pub bytes: u64,
    /// Deliveries a downstream sink refused or failed.
    pub rejected: u64,
    /// Video packets withheld from a subscriber by layer filtering.
    pub dropped_by_layer: u64,
    /// Feedback packets routed upstream.
    pub feedback_packets: u64,
    /// Keyframe requests forwarded upstream.
    pub pli_requests: u64,
    /// Keyframe requests suppressed by rate limiting.
    pub pli_suppressed: u64,
}

impl DeliveryStats {
    /// Fraction of delivery attempts that failed.
    pub fn reject_rate(&self) -> f64 {
        let attempts = self.audio_packets + self.video_packets + self.rejected;
        if attempts == 0 {
            0.0
        } else {
            self.rejected as f64 / attempts as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct DeliveryCounters {
    audio_packets: AtomicU64,
    video_packets: AtomicU64,
    bytes: AtomicU64,
    rejected: AtomicU64,
    dropped_by_layer: AtomicU64,
    feedback_packets: AtomicU64,
    pli_requests: AtomicU64,
    pli_suppressed: AtomicU64,
}

impl DeliveryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_audio(&self, bytes: usize) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_video(&self, bytes: usize) {
        self.video_packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_layer_drop(&self) {
        self.dropped_by_layer.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feedback(&self) {
        self.feedback_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pli(&self, forwarded: bool) {
        if forwarded {
            self.pli_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.pli_suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            video_packets: self.video_packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped_by_layer: self.dropped_by_layer.load(Ordering::Relaxed),
            feedback_packets: self.feedback_packets.load(Ordering::Relaxed),
            pli_requests: self.pli_requests.load(Ordering::Relaxed),
            pli_suppressed: self.pli_suppressed.load(Ordering::Relaxed),
        }
    }
}
