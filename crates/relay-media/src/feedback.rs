//! # Feedback path
//!
//! Feedback (loss reports, keyframe requests, bandwidth estimates) travels
//! opposite to media. A [`FeedbackSink`] accepts it; a [`FeedbackSource`] is
//! the slot through which a stage reaches whichever sink is registered
//! upstream of it.
//!
//! The registration slot is an `ArcSwapOption`, so replacing the sink is
//! atomic with respect to concurrent [`FeedbackSource::deliver_feedback`]
//! calls: a delivery sees either the old sink or the new one, never a torn
//! reference. The slot stores a `Weak`, so registering never extends the
//! sink's lifetime.

use arc_swap::ArcSwapOption;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::error::{DeliveryError, DeliveryResult};
use crate::packet::SharedPacket;

/// Accepts feedback packets. Implemented by congestion-control and
/// transport stages.
pub trait FeedbackSink: Send + Sync {
    fn deliver_feedback(&self, packet: SharedPacket) -> DeliveryResult {
        trace!(
            component = packet.component(),
            len = packet.len(),
            "deliver feedback"
        );
        self.on_feedback(packet)
    }

    /// Implementer hook behind [`FeedbackSink::deliver_feedback`].
    fn on_feedback(&self, packet: SharedPacket) -> DeliveryResult;
}

struct Registration {
    sink: Weak<dyn FeedbackSink>,
}

/// Holds zero or one registered [`FeedbackSink`].
#[derive(Default)]
pub struct FeedbackSource {
    slot: ArcSwapOption<Registration>,
}

impl FeedbackSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered sink.
    pub fn set_feedback_sink(&self, sink: Weak<dyn FeedbackSink>) {
        debug!("feedback sink registered");
        self.slot.store(Some(Arc::new(Registration { sink })));
    }

    pub fn clear_feedback_sink(&self) {
        self.slot.store(None);
    }

    /// The registered sink, if any and still alive.
    pub fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        self.slot.load_full().and_then(|reg| reg.sink.upgrade())
    }

    pub fn has_feedback_sink(&self) -> bool {
        self.feedback_sink().is_some()
    }

    /// Forward `packet` to the registered sink.
    pub fn deliver_feedback(&self, packet: SharedPacket) -> DeliveryResult {
        match self.feedback_sink() {
            Some(sink) => sink.deliver_feedback(packet),
            None => {
                debug!(component = packet.component(), "feedback dropped, no sink");
                Err(DeliveryError::NoRoute)
            }
        }
    }
}

impl std::fmt::Debug for FeedbackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackSource")
            .field("registered", &self.has_feedback_sink())
            .finish()
    }
}
