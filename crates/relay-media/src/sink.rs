//! # MediaSink
//!
//! Consumer-facing capability. Transports, mixers and relay stages implement
//! the two delivery hooks; the public `deliver_*` wrappers add the closed
//! check, in-flight tracking and tracing so hooks never repeat them.
//!
//! Hooks run on a shared delivery path and must return in bounded time: hand
//! work to a later stage instead of blocking. They must not call `close()` on
//! their own object.

use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::error::DeliveryResult;
use crate::feedback::FeedbackSource;
use crate::monitor::Monitored;
use crate::packet::SharedPacket;

pub trait MediaSink: Monitored {
    /// Audio delivery hook.
    fn on_audio_data(&self, packet: SharedPacket) -> DeliveryResult;

    /// Video delivery hook.
    fn on_video_data(&self, packet: SharedPacket) -> DeliveryResult;

    fn deliver_audio_data(&self, packet: SharedPacket) -> DeliveryResult {
        let _in_flight = self.monitor().enter().inspect_err(|_| {
            debug!(component = packet.component(), "audio rejected, sink closed");
        })?;
        trace!(component = packet.component(), len = packet.len(), "deliver audio");
        self.on_audio_data(packet)
    }

    fn deliver_video_data(&self, packet: SharedPacket) -> DeliveryResult {
        let _in_flight = self.monitor().enter().inspect_err(|_| {
            debug!(component = packet.component(), "video rejected, sink closed");
        })?;
        trace!(
            component = packet.component(),
            len = packet.len(),
            keyframe = packet.is_keyframe(),
            "deliver video"
        );
        self.on_video_data(packet)
    }

    // ── SSRC identity ───────────────────────────────────────────────────

    fn audio_sink_ssrc(&self) -> u32 {
        self.monitor().with(|s| s.sink.audio_ssrc)
    }

    fn set_audio_sink_ssrc(&self, ssrc: u32) {
        debug!(ssrc, "audio sink ssrc");
        self.monitor().with(|s| s.sink.audio_ssrc = ssrc);
    }

    fn video_sink_ssrc(&self) -> u32 {
        self.monitor().with(|s| s.sink.video_ssrc)
    }

    fn set_video_sink_ssrc(&self, ssrc: u32) {
        debug!(ssrc, "video sink ssrc");
        self.monitor().with(|s| s.sink.video_ssrc = ssrc);
    }

    /// Whether an inbound report for `ssrc` is addressed to this sink's audio.
    fn is_audio_sink_ssrc(&self, ssrc: u32) -> bool {
        self.monitor().with(|s| s.sink.audio_ssrc == ssrc)
    }

    fn is_video_sink_ssrc(&self, ssrc: u32) -> bool {
        self.monitor().with(|s| s.sink.video_ssrc == ssrc)
    }

    // ── Feedback ────────────────────────────────────────────────────────

    /// The feedback path this sink offers upstream, if it offers one and the
    /// owner is still alive.
    fn feedback_source(&self) -> Option<Arc<FeedbackSource>> {
        self.monitor()
            .with(|s| s.sink.feedback_source.as_ref().and_then(Weak::upgrade))
    }

    /// Associate (or, with `None`, clear) this sink's feedback path. The sink
    /// does not take ownership.
    fn set_feedback_source(&self, source: Option<&Arc<FeedbackSource>>) {
        let weak = source.map(Arc::downgrade);
        self.monitor().with(|s| s.sink.feedback_source = weak);
    }
}
