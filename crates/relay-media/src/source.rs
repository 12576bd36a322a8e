//! # MediaSource
//!
//! Producer-facing capability: one audio SSRC, an ordered simulcast list of
//! video SSRCs (index 0 is the primary stream, the list is never empty), a
//! keyframe-request hook and non-owning links to the sinks it feeds.
//!
//! Paired sinks are held as `Weak`: when a sink is dropped the association
//! simply stops resolving, it never dangles.

use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::error::{DeliveryResult, MediaError};
use crate::feedback::FeedbackSink;
use crate::monitor::Monitored;
use crate::sink::MediaSink;

pub trait MediaSource: Monitored {
    /// Keyframe-request hook behind [`MediaSource::send_pli`].
    fn on_send_pli(&self) -> DeliveryResult;

    /// Ask the producer to emit (or request upstream) a fresh keyframe.
    fn send_pli(&self) -> DeliveryResult {
        let _in_flight = self.monitor().enter().inspect_err(|_| {
            debug!("pli rejected, source closed");
        })?;
        debug!(ssrc = self.video_source_ssrc(), "send pli");
        self.on_send_pli()
    }

    // ── Audio SSRC ──────────────────────────────────────────────────────

    fn audio_source_ssrc(&self) -> u32 {
        self.monitor().with(|s| s.source.audio_ssrc)
    }

    fn set_audio_source_ssrc(&self, ssrc: u32) {
        debug!(ssrc, "audio source ssrc");
        self.monitor().with(|s| s.source.audio_ssrc = ssrc);
    }

    fn is_audio_source_ssrc(&self, ssrc: u32) -> bool {
        self.monitor().with(|s| s.source.audio_ssrc == ssrc)
    }

    // ── Video SSRCs (simulcast) ─────────────────────────────────────────

    /// Primary (index 0) video SSRC.
    fn video_source_ssrc(&self) -> u32 {
        self.monitor().with(|s| s.source.video_ssrcs[0])
    }

    /// Replace the primary video SSRC; the rest of the list is untouched.
    fn set_video_source_ssrc(&self, ssrc: u32) {
        debug!(ssrc, "video source ssrc");
        self.monitor().with(|s| s.source.video_ssrcs[0] = ssrc);
    }

    /// Snapshot of the full simulcast list, independent of internal state.
    fn video_source_ssrc_list(&self) -> Vec<u32> {
        self.monitor().with(|s| s.source.video_ssrcs.clone())
    }

    fn set_video_source_ssrc_list(&self, ssrcs: Vec<u32>) -> Result<(), MediaError> {
        if ssrcs.is_empty() {
            warn!("refusing empty video ssrc list");
            return Err(MediaError::EmptySsrcList);
        }
        debug!(?ssrcs, "video source ssrc list");
        self.monitor().with(|s| s.source.video_ssrcs = ssrcs);
        Ok(())
    }

    /// Whether `ssrc` is one of this source's simulcast streams.
    fn is_video_source_ssrc(&self, ssrc: u32) -> bool {
        self.monitor().with(|s| s.source.video_ssrcs.contains(&ssrc))
    }

    // ── Associations ────────────────────────────────────────────────────

    /// Where this source accepts feedback from the stages it feeds.
    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        self.monitor()
            .with(|s| s.source.feedback_sink.as_ref().and_then(Weak::upgrade))
    }

    fn set_feedback_sink(&self, sink: Weak<dyn FeedbackSink>) {
        self.monitor().with(|s| s.source.feedback_sink = Some(sink));
    }

    fn clear_feedback_sink(&self) {
        self.monitor().with(|s| s.source.feedback_sink = None);
    }

    fn audio_sink(&self) -> Option<Arc<dyn MediaSink>> {
        self.monitor()
            .with(|s| s.source.audio_sink.as_ref().and_then(Weak::upgrade))
    }

    fn set_audio_sink(&self, sink: Weak<dyn MediaSink>) {
        self.monitor().with(|s| s.source.audio_sink = Some(sink));
    }

    fn clear_audio_sink(&self) {
        self.monitor().with(|s| s.source.audio_sink = None);
    }

    fn video_sink(&self) -> Option<Arc<dyn MediaSink>> {
        self.monitor()
            .with(|s| s.source.video_sink.as_ref().and_then(Weak::upgrade))
    }

    fn set_video_sink(&self, sink: Weak<dyn MediaSink>) {
        self.monitor().with(|s| s.source.video_sink = Some(sink));
    }

    fn clear_video_sink(&self) {
        self.monitor().with(|s| s.source.video_sink = None);
    }
}

/// Clear `source`'s audio/video links that currently point at `sink`.
/// Links to any other sink are left alone.
pub fn detach_sink<S: ?Sized>(source: &dyn MediaSource, sink: &S) {
    let target = sink as *const S;
    if source
        .audio_sink()
        .is_some_and(|s| std::ptr::addr_eq(Arc::as_ptr(&s), target))
    {
        source.clear_audio_sink();
    }
    if source
        .video_sink()
        .is_some_and(|s| std::ptr::addr_eq(Arc::as_ptr(&s), target))
    {
        source.clear_video_sink();
    }
}
