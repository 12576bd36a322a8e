//! # One-to-many relay stage
//!
//! [`FanOut`] is the sink a publisher feeds. Every packet it accepts is
//! handed to each attached subscriber as another `Arc` clone of the same
//! packet, so the payload is never copied.
//!
//! ## Layer tiers
//!
//! Each subscriber has a [`LayerTier`]. Video packets tagged with
//! scalable-video layers are forwarded only when they belong to the
//! subscriber's spatial and temporal tier. Untagged packets carry no layer
//! information and go to everyone; audio is never filtered.
//!
//! ## Feedback
//!
//! `FanOut` is also a [`FeedbackSink`]: attached subscribers that offer a
//! feedback path are registered to it, and whatever they report is routed to
//! the publisher's feedback sink. Keyframe requests go through
//! [`FanOut::request_keyframe`], which forwards at most one PLI per
//! `pli_interval` to the publisher.
//!
//! The subscriber list is copy-on-write (`ArcSwap`): the delivery path reads
//! a snapshot without locking, so a slow subscriber never blocks attach or
//! detach and no lock is held while calling into another stage.

use arc_swap::{ArcSwap, ArcSwapOption};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::clock;
use crate::config::FanOutConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::feedback::FeedbackSink;
use crate::monitor::{InFlight, Monitor, Monitored};
use crate::packet::{LayerId, Packet, SharedPacket};
use crate::sink::MediaSink;
use crate::source::{detach_sink, MediaSource};
use crate::stats::{DeliveryCounters, DeliveryStats};

const NEVER: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FanOutError {
    #[error("subscriber limit of {max} reached")]
    LimitReached { max: usize },
    #[error("subscriber {0} already attached")]
    Duplicate(SubscriberId),
    #[error("unknown subscriber {0}")]
    Unknown(SubscriberId),
    #[error("fan-out is closed")]
    Closed,
}

/// Scalable-video tier a subscriber receives. `None` on an axis accepts
/// every layer on that axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerTier {
    pub spatial: Option<LayerId>,
    pub temporal: Option<LayerId>,
}

impl LayerTier {
    pub fn new(spatial: Option<LayerId>, temporal: Option<LayerId>) -> Self {
        Self { spatial, temporal }
    }

    /// Whether a video packet should reach a subscriber on this tier.
    pub fn admits(&self, packet: &Packet) -> bool {
        let spatial = match self.spatial {
            Some(layer) if !packet.compatible_spatial_layers().is_empty() => {
                packet.belongs_to_spatial_layer(layer)
            }
            _ => true,
        };
        let temporal = match self.temporal {
            Some(layer) if !packet.compatible_temporal_layers().is_empty() => {
                packet.belongs_to_temporal_layer(layer)
            }
            _ => true,
        };
        spatial && temporal
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    sink: Weak<dyn MediaSink>,
    tier: LayerTier,
}

struct Publisher {
    source: Weak<dyn MediaSource>,
}

pub struct FanOut {
    monitor: Monitor,
    me: Weak<FanOut>,
    config: FanOutConfig,
    subscribers: ArcSwap<Vec<Subscriber>>,
    publisher: ArcSwapOption<Publisher>,
    last_pli_ms: AtomicU64,
    counters: DeliveryCounters,
}

impl FanOut {
    pub fn new(config: FanOutConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| FanOut {
            monitor: Monitor::new(),
            me: me.clone(),
            config,
            subscribers: ArcSwap::from_pointee(Vec::new()),
            publisher: ArcSwapOption::empty(),
            last_pli_ms: AtomicU64::new(NEVER),
            counters: DeliveryCounters::new(),
        })
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    // ── Publisher ───────────────────────────────────────────────────────

    /// Make `publisher` the source of this fan-out: it is pointed at this
    /// stage as its audio and video sink, and its SSRC identity is mirrored
    /// into this sink's expected SSRCs.
    ///
    /// Wiring is admitted like a delivery: a concurrent `close()` tears down
    /// only after it completes, and a closed fan-out refuses it.
    pub fn attach_publisher(&self, publisher: Weak<dyn MediaSource>) -> Result<(), FanOutError> {
        let _in_flight = self.admit()?;
        if let Some(source) = publisher.upgrade() {
            let me: Weak<dyn MediaSink> = self.me.clone();
            source.set_audio_sink(me.clone());
            source.set_video_sink(me);
            self.set_audio_sink_ssrc(source.audio_source_ssrc());
            self.set_video_sink_ssrc(source.video_source_ssrc());
            info!(
                audio_ssrc = source.audio_source_ssrc(),
                video_ssrc = source.video_source_ssrc(),
                "publisher attached"
            );
        }
        self.publisher
            .store(Some(Arc::new(Publisher { source: publisher })));
        Ok(())
    }

    pub fn publisher(&self) -> Option<Arc<dyn MediaSource>> {
        self.publisher
            .load_full()
            .and_then(|publisher| publisher.source.upgrade())
    }

    /// Forward a keyframe request to the publisher, at most once per
    /// `pli_interval`. A suppressed request reports `Ok(0)`.
    pub fn request_keyframe(&self) -> DeliveryResult {
        let _in_flight = self.monitor.enter()?;
        let publisher = self.publisher().ok_or(DeliveryError::NoRoute)?;

        let now = clock::now_ms();
        let interval = u64::try_from(self.config.pli_interval.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_pli_ms.load(Ordering::Acquire);
        let due = last == NEVER || now.saturating_sub(last) >= interval;
        if !due
            || self
                .last_pli_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            trace!("keyframe request suppressed");
            self.counters.record_pli(false);
            return Ok(0);
        }

        let result = publisher.send_pli();
        match result {
            Ok(_) => self.counters.record_pli(true),
            Err(_) => self.counters.record_rejected(),
        }
        result
    }

    // ── Subscribers ─────────────────────────────────────────────────────

    /// Attach a subscriber on the configured default tier.
    pub fn add_subscriber(
        &self,
        id: SubscriberId,
        sink: Weak<dyn MediaSink>,
    ) -> Result<(), FanOutError> {
        let tier = LayerTier::new(
            self.config.default_spatial_layer,
            self.config.default_temporal_layer,
        );
        self.add_subscriber_with_tier(id, sink, tier)
    }

    pub fn add_subscriber_with_tier(
        &self,
        id: SubscriberId,
        sink: Weak<dyn MediaSink>,
        tier: LayerTier,
    ) -> Result<(), FanOutError> {
        let _in_flight = self.admit()?;

        let max = self.config.max_subscribers;
        let mut outcome = Ok(());
        self.subscribers.rcu(|current| {
            if current.iter().any(|s| s.id == id) {
                outcome = Err(FanOutError::Duplicate(id));
                return Vec::clone(current);
            }
            if current.len() >= max {
                outcome = Err(FanOutError::LimitReached { max });
                return Vec::clone(current);
            }
            outcome = Ok(());
            let mut next = Vec::clone(current);
            next.push(Subscriber {
                id,
                sink: sink.clone(),
                tier,
            });
            next
        });
        outcome?;

        if let Some(feedback) = sink.upgrade().and_then(|s| s.feedback_source()) {
            let me: Weak<dyn FeedbackSink> = self.me.clone();
            feedback.set_feedback_sink(me);
        }
        info!(subscriber = %id, ?tier, "subscriber attached");

        // A new subscriber cannot decode until the next keyframe.
        if let Err(e) = self.request_keyframe() {
            debug!(subscriber = %id, error = %e, "initial keyframe request not sent");
        }
        Ok(())
    }

    pub fn remove_subscriber(&self, id: SubscriberId) -> Result<(), FanOutError> {
        let mut removed = None;
        self.subscribers.rcu(|current| {
            removed = current.iter().find(|s| s.id == id).cloned();
            current.iter().filter(|s| s.id != id).cloned().collect::<Vec<_>>()
        });
        let removed = removed.ok_or(FanOutError::Unknown(id))?;

        if let Some(feedback) = removed.sink.upgrade().and_then(|s| s.feedback_source()) {
            feedback.clear_feedback_sink();
        }
        info!(subscriber = %id, "subscriber detached");
        Ok(())
    }

    pub fn set_subscriber_tier(&self, id: SubscriberId, tier: LayerTier) -> Result<(), FanOutError> {
        let mut found = false;
        self.subscribers.rcu(|current| {
            found = false;
            current
                .iter()
                .map(|s| {
                    let mut s = s.clone();
                    if s.id == id {
                        s.tier = tier;
                        found = true;
                    }
                    s
                })
                .collect::<Vec<_>>()
        });
        if !found {
            return Err(FanOutError::Unknown(id));
        }
        debug!(subscriber = %id, ?tier, "subscriber tier changed");
        Ok(())
    }

    pub fn subscriber_tier(&self, id: SubscriberId) -> Option<LayerTier> {
        self.subscribers
            .load()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.tier)
    }

    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.load().iter().map(|s| s.id).collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }

    /// Drop subscribers whose sinks no longer exist. Returns how many went.
    pub fn prune(&self) -> usize {
        let mut pruned = 0;
        self.subscribers.rcu(|current| {
            let alive: Vec<Subscriber> = current
                .iter()
                .filter(|s| s.sink.strong_count() > 0)
                .cloned()
                .collect();
            pruned = current.len() - alive.len();
            alive
        });
        if pruned > 0 {
            debug!(pruned, "dropped dead subscribers");
        }
        pruned
    }

    fn admit(&self) -> Result<InFlight<'_>, FanOutError> {
        self.monitor.enter().map_err(|_| FanOutError::Closed)
    }

    fn fan_out(
        &self,
        packet: &SharedPacket,
        filter: impl Fn(&LayerTier) -> bool,
        deliver: impl Fn(&dyn MediaSink, SharedPacket) -> DeliveryResult,
    ) {
        let subscribers = self.subscribers.load();
        let mut dead = 0usize;
        for sub in subscribers.iter() {
            if !filter(&sub.tier) {
                self.counters.record_layer_drop();
                continue;
            }
            let Some(sink) = sub.sink.upgrade() else {
                dead += 1;
                continue;
            };
            if let Err(e) = deliver(sink.as_ref(), Arc::clone(packet)) {
                self.counters.record_rejected();
                trace!(subscriber = %sub.id, code = e.code(), "subscriber refused packet");
            }
        }
        drop(subscribers);
        if dead > 0 {
            self.prune();
        }
    }
}

impl Monitored for FanOut {
    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn on_close(&self) {
        let subscribers = self.subscribers.swap(Arc::new(Vec::new()));
        for sub in subscribers.iter() {
            if let Some(feedback) = sub.sink.upgrade().and_then(|s| s.feedback_source()) {
                feedback.clear_feedback_sink();
            }
        }

        if let Some(publisher) = self.publisher.swap(None).and_then(|p| p.source.upgrade()) {
            detach_sink(publisher.as_ref(), self);
        }
        info!(subscribers = subscribers.len(), "fan-out closed");
    }
}

impl MediaSink for FanOut {
    fn on_audio_data(&self, packet: SharedPacket) -> DeliveryResult {
        self.counters.record_audio(packet.len());
        self.fan_out(&packet, |_| true, |sink, p| sink.deliver_audio_data(p));
        Ok(packet.len())
    }

    fn on_video_data(&self, packet: SharedPacket) -> DeliveryResult {
        self.counters.record_video(packet.len());
        self.fan_out(
            &packet,
            |tier| tier.admits(&packet),
            |sink, p| sink.deliver_video_data(p),
        );
        Ok(packet.len())
    }
}

impl FeedbackSink for FanOut {
    fn on_feedback(&self, packet: SharedPacket) -> DeliveryResult {
        let _in_flight = self.monitor.enter()?;
        let target = self
            .publisher()
            .and_then(|p| p.feedback_sink())
            .ok_or(DeliveryError::NoRoute)?;
        self.counters.record_feedback();
        target.deliver_feedback(packet)
    }
}
