//! # Exclusive-access state guard
//!
//! Every sink/source object owns exactly one [`Monitor`]: a single mutex over
//! all of its mutable identity state plus its open/closed lifecycle. A stage
//! that plays both roles embeds one monitor and exposes it to both trait
//! impls through [`Monitored`], so both roles contend on the same lock.
//!
//! Deliveries enter through [`Monitor::enter`], which checks the closed flag
//! under the lock and registers the call as in flight. [`Monitor::close`]
//! flips the flag and then waits until every in-flight call has returned, so
//! once `close` returns no delivery hook is running and none can start.

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::DeliveryError;
use crate::feedback::{FeedbackSink, FeedbackSource};
use crate::sink::MediaSink;

/// Access to the per-instance guard. Implemented once per object, shared by
/// its [`MediaSink`] and [`crate::source::MediaSource`] impls.
pub trait Monitored: Send + Sync {
    fn monitor(&self) -> &Monitor;

    /// Teardown hook, run exactly once by the first `close()` after all
    /// in-flight deliveries have drained.
    fn on_close(&self) {}

    /// Close the object. Idempotent; must be its last call. Afterwards every
    /// delivery-style call fails with [`DeliveryError::Closed`].
    fn close(&self) {
        if self.monitor().close() {
            tracing::debug!("media object closed");
            self.on_close();
        }
    }

    fn is_closed(&self) -> bool {
        self.monitor().is_closed()
    }
}

/// Consumer-side identity: SSRCs the sink expects, optional feedback path.
#[derive(Debug, Default)]
pub(crate) struct SinkState {
    pub(crate) audio_ssrc: u32,
    pub(crate) video_ssrc: u32,
    pub(crate) feedback_source: Option<Weak<FeedbackSource>>,
}

/// Producer-side identity: one audio SSRC, simulcast video SSRCs (index 0 is
/// primary, never empty) and non-owning links to paired sinks.
pub(crate) struct SourceState {
    pub(crate) audio_ssrc: u32,
    pub(crate) video_ssrcs: Vec<u32>,
    pub(crate) audio_sink: Option<Weak<dyn MediaSink>>,
    pub(crate) video_sink: Option<Weak<dyn MediaSink>>,
    pub(crate) feedback_sink: Option<Weak<dyn FeedbackSink>>,
}

impl Default for SourceState {
    fn default() -> Self {
        SourceState {
            audio_ssrc: 0,
            video_ssrcs: vec![0],
            audio_sink: None,
            video_sink: None,
            feedback_sink: None,
        }
    }
}

impl std::fmt::Debug for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceState")
            .field("audio_ssrc", &self.audio_ssrc)
            .field("video_ssrcs", &self.video_ssrcs)
            .field("audio_sink", &self.audio_sink.is_some())
            .field("video_sink", &self.video_sink.is_some())
            .field("feedback_sink", &self.feedback_sink.is_some())
            .finish()
    }
}

/// Everything the monitor guards.
#[derive(Debug, Default)]
pub(crate) struct MediaState {
    pub(crate) sink: SinkState,
    pub(crate) source: SourceState,
    closed: bool,
    in_flight: usize,
}

#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<MediaState>,
    drained: Condvar,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the state. The guarded fields are plain values, so a panic in
    /// another holder cannot leave them half-written; poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, MediaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the state.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut MediaState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Admit one delivery-style call. Fails with [`DeliveryError::Closed`]
    /// once the object has been closed.
    pub fn enter(&self) -> Result<InFlight<'_>, DeliveryError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DeliveryError::Closed);
        }
        state.in_flight += 1;
        drop(state);
        reentry::entered(self);
        Ok(InFlight {
            monitor: self,
            _thread_bound: PhantomData,
        })
    }

    /// Mark the object closed and wait for in-flight calls to finish.
    ///
    /// Returns `true` only for the call that performed the transition.
    /// Must not be called from inside a delivery hook of the same object:
    /// that would wait on itself forever. Debug builds panic instead.
    pub fn close(&self) -> bool {
        debug_assert!(
            !reentry::is_entered(self),
            "close() called from inside an admitted call on the same object"
        );
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        while state.in_flight > 0 {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    fn leave(&self) {
        reentry::left(self);
        let mut state = self.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

/// Registration of an admitted call; released on drop (including unwinding).
/// Bound to the thread that entered.
#[must_use]
pub struct InFlight<'a> {
    monitor: &'a Monitor,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.monitor.leave();
    }
}

// ─── Re-entry tracking ──────────────────────────────────────────────────────

/// Per-thread record of the monitors this thread is inside. Debug builds
/// only; release builds compile it away.
#[cfg(debug_assertions)]
mod reentry {
    use super::Monitor;
    use std::cell::RefCell;

    thread_local! {
        static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    fn key(monitor: &Monitor) -> usize {
        monitor as *const Monitor as usize
    }

    pub(super) fn entered(monitor: &Monitor) {
        ENTERED.with(|e| e.borrow_mut().push(key(monitor)));
    }

    pub(super) fn left(monitor: &Monitor) {
        ENTERED.with(|e| {
            let mut e = e.borrow_mut();
            if let Some(pos) = e.iter().rposition(|k| *k == key(monitor)) {
                e.swap_remove(pos);
            }
        });
    }

    pub(super) fn is_entered(monitor: &Monitor) -> bool {
        ENTERED.with(|e| e.borrow().contains(&key(monitor)))
    }
}

#[cfg(not(debug_assertions))]
mod reentry {
    use super::Monitor;

    pub(super) fn entered(_: &Monitor) {}

    pub(super) fn left(_: &Monitor) {}

    pub(super) fn is_entered(_: &Monitor) -> bool {
        false
    }
}
