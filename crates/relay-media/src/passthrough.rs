//! # Relay passthrough
//!
//! A stage that is both a [`MediaSink`] (for whatever feeds it) and a
//! [`MediaSource`] (for whatever it feeds). Both roles share one [`Monitor`],
//! so the sink-side and source-side identity change under a single lock.
//!
//! Media is forwarded to the paired audio/video sinks untouched. Feedback
//! arriving from downstream is pushed upstream through the passthrough's own
//! [`FeedbackSource`], and PLI requests are relayed to the upstream source.

use arc_swap::ArcSwapOption;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::error::{DeliveryError, DeliveryResult};
use crate::feedback::{FeedbackSink, FeedbackSource};
use crate::monitor::{Monitor, Monitored};
use crate::packet::SharedPacket;
use crate::sink::MediaSink;
use crate::source::{detach_sink, MediaSource};
use crate::stats::{DeliveryCounters, DeliveryStats};

struct Upstream {
    source: Weak<dyn MediaSource>,
}

pub struct Passthrough {
    monitor: Monitor,
    me: Weak<Passthrough>,
    feedback: Arc<FeedbackSource>,
    upstream: ArcSwapOption<Upstream>,
    counters: DeliveryCounters,
}

impl Passthrough {
    pub fn new() -> Arc<Self> {
        let passthrough = Arc::new_cyclic(|me: &Weak<Passthrough>| Passthrough {
            monitor: Monitor::new(),
            me: me.clone(),
            feedback: Arc::new(FeedbackSource::new()),
            upstream: ArcSwapOption::empty(),
            counters: DeliveryCounters::new(),
        });

        // Downstream stages reach us for feedback through the source role;
        // upstream stages register into our sink-side feedback source.
        let me: Weak<dyn FeedbackSink> = passthrough.me.clone();
        passthrough.set_feedback_sink(me);
        passthrough.set_feedback_source(Some(&passthrough.feedback));
        passthrough
    }

    /// Sit behind `upstream`: it delivers into this stage, its feedback sink
    /// receives what this stage relays, and its SSRCs become ours both as
    /// the expected sink SSRCs and as the SSRCs presented downstream.
    ///
    /// Fails with [`DeliveryError::Closed`] on a closed passthrough. The call
    /// is admitted like a delivery, so a concurrent `close()` runs its
    /// teardown only after the wiring is complete.
    pub fn attach_upstream(&self, upstream: Weak<dyn MediaSource>) -> Result<(), DeliveryError> {
        let _in_flight = self.monitor.enter()?;
        if let Some(source) = upstream.upgrade() {
            let me: Weak<dyn MediaSink> = self.me.clone();
            source.set_audio_sink(me.clone());
            source.set_video_sink(me);

            match source.feedback_sink() {
                Some(sink) => self.feedback.set_feedback_sink(Arc::downgrade(&sink)),
                None => self.feedback.clear_feedback_sink(),
            }

            let audio = source.audio_source_ssrc();
            let video = source.video_source_ssrc_list();
            self.monitor.with(|s| {
                s.sink.audio_ssrc = audio;
                s.sink.video_ssrc = video[0];
                s.source.audio_ssrc = audio;
                s.source.video_ssrcs = video;
            });
            info!(audio_ssrc = audio, "passthrough attached upstream");
        }
        self.upstream
            .store(Some(Arc::new(Upstream { source: upstream })));
        Ok(())
    }

    pub fn upstream(&self) -> Option<Arc<dyn MediaSource>> {
        self.upstream
            .load_full()
            .and_then(|upstream| upstream.source.upgrade())
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    fn forward(
        &self,
        target: Option<Arc<dyn MediaSink>>,
        packet: SharedPacket,
        deliver: impl FnOnce(&dyn MediaSink, SharedPacket) -> DeliveryResult,
    ) -> DeliveryResult {
        let Some(target) = target else {
            self.counters.record_rejected();
            return Err(DeliveryError::NoRoute);
        };
        deliver(target.as_ref(), packet).inspect_err(|_| self.counters.record_rejected())
    }
}

impl Monitored for Passthrough {
    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn on_close(&self) {
        self.feedback.clear_feedback_sink();
        if let Some(source) = self.upstream.swap(None).and_then(|u| u.source.upgrade()) {
            detach_sink(source.as_ref(), self);
        }
        self.clear_audio_sink();
        self.clear_video_sink();
        debug!("passthrough closed");
    }
}

impl MediaSink for Passthrough {
    fn on_audio_data(&self, packet: SharedPacket) -> DeliveryResult {
        let len = packet.len();
        self.forward(self.audio_sink(), packet, |sink, p| sink.deliver_audio_data(p))?;
        self.counters.record_audio(len);
        Ok(len)
    }

    fn on_video_data(&self, packet: SharedPacket) -> DeliveryResult {
        let len = packet.len();
        self.forward(self.video_sink(), packet, |sink, p| sink.deliver_video_data(p))?;
        self.counters.record_video(len);
        Ok(len)
    }
}

impl MediaSource for Passthrough {
    fn on_send_pli(&self) -> DeliveryResult {
        let upstream = self.upstream().ok_or(DeliveryError::NoRoute)?;
        let result = upstream.send_pli();
        match result {
            Ok(_) => self.counters.record_pli(true),
            Err(_) => self.counters.record_rejected(),
        }
        result
    }
}

impl FeedbackSink for Passthrough {
    fn on_feedback(&self, packet: SharedPacket) -> DeliveryResult {
        let _in_flight = self.monitor.enter()?;
        let result = self.feedback.deliver_feedback(packet);
        if result.is_ok() {
            self.counters.record_feedback();
        }
        result
    }
}
