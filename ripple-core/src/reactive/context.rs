//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when an observable slot is
//! read, the current computation is added to that slot's subscriber set.
//!
//! # Implementation
//!
//! Each runtime owns a single active-subscriber slot. Entering a context
//! swaps the new subscriber into the slot and keeps the previous occupant in
//! the returned guard; dropping the guard puts it back. Nested computations
//! therefore restore their caller as the active subscriber when they finish,
//! including when they unwind from a panic.

use std::sync::Arc;

use parking_lot::Mutex;

use super::subscriber::{Subscriber, SubscriberId};

/// The single active-subscriber slot of a runtime.
pub(crate) struct TrackingSlot {
    active: Mutex<Option<Arc<dyn Subscriber>>>,
}

impl TrackingSlot {
    pub(crate) fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// The subscriber currently collecting dependencies, if any.
    pub(crate) fn current(&self) -> Option<Arc<dyn Subscriber>> {
        self.active.lock().clone()
    }

    pub(crate) fn current_id(&self) -> Option<SubscriberId> {
        self.active.lock().as_ref().map(|s| s.subscriber_id())
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    fn replace(&self, next: Option<Arc<dyn Subscriber>>) -> Option<Arc<dyn Subscriber>> {
        std::mem::replace(&mut *self.active.lock(), next)
    }
}

/// Guard that restores the previous active subscriber when dropped.
///
/// Entering with `None` suspends tracking for the guard's lifetime.
pub struct ReactiveContext<'a> {
    slot: &'a TrackingSlot,
    entered: Option<SubscriberId>,
    previous: Option<Arc<dyn Subscriber>>,
}

impl<'a> ReactiveContext<'a> {
    pub(crate) fn enter(slot: &'a TrackingSlot, subscriber: Option<Arc<dyn Subscriber>>) -> Self {
        let entered = subscriber.as_ref().map(|s| s.subscriber_id());
        let previous = slot.replace(subscriber);
        Self {
            slot,
            entered,
            previous,
        }
    }

    /// The subscriber this context made active, if any.
    pub fn subscriber(&self) -> Option<SubscriberId> {
        self.entered
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        let current = self.slot.replace(self.previous.take());

        // Catch contexts dropped out of order.
        debug_assert_eq!(
            current.as_ref().map(|s| s.subscriber_id()),
            self.entered,
            "ReactiveContext mismatch"
        );
    }
}
