//! Subscriber types for the reactive system.
//!
//! A Subscriber is any computation that can sit in a subscriber set: plain
//! effects, the effects backing computed values, and watchers. Subscriber
//! sets hold them weakly and erase their result type, so everything the
//! graph needs from them goes through the object-safe [`Subscriber`] trait.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::graph::Dep;

/// Unique identifier for a subscriber.
///
/// Subscriber sets are keyed by this ID, so tracking the same effect twice
/// against one slot keeps a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduling override invoked instead of running an effect directly.
///
/// It receives a type-erased handle to the triggered effect.
pub type ScheduleFn = Arc<dyn Fn(&EffectRef) + Send + Sync>;

/// A computation that can be registered in subscriber sets.
pub trait Subscriber: Send + Sync {
    /// Get the subscriber ID.
    fn subscriber_id(&self) -> SubscriberId;

    /// Whether the subscriber is still live. Stopped subscribers are never
    /// tracked and never triggered.
    fn is_active(&self) -> bool;

    /// Whether this subscriber backs a computed value. Computed subscribers
    /// are triggered before plain ones within one notification.
    fn is_computed(&self) -> bool;

    /// The scheduling override, if any.
    fn scheduler(&self) -> Option<ScheduleFn>;

    /// Run the computation, discarding its result. No-op once stopped.
    fn run_erased(&self);

    /// Stop the subscriber and leave every subscriber set it joined.
    fn stop(&self);

    /// Record that the subscriber was added to `dep`.
    fn joined(&self, dep: &Dep);
}

/// Trigger a subscriber: hand it to its scheduling override when it has one,
/// otherwise run it synchronously.
pub(crate) fn trigger_subscriber(subscriber: Arc<dyn Subscriber>) {
    if !subscriber.is_active() {
        return;
    }
    match subscriber.scheduler() {
        Some(schedule) => schedule(&EffectRef(subscriber)),
        None => subscriber.run_erased(),
    }
}

/// Type-erased strong handle to an effect.
#[derive(Clone)]
pub struct EffectRef(pub(crate) Arc<dyn Subscriber>);

impl EffectRef {
    /// Get the effect's subscriber ID.
    pub fn id(&self) -> SubscriberId {
        self.0.subscriber_id()
    }

    /// Run the effect, discarding its result.
    pub fn run(&self) {
        self.0.run_erased();
    }

    /// Stop the effect.
    pub fn stop(&self) {
        self.0.stop();
    }

    /// Whether the effect is still live.
    pub fn is_active(&self) -> bool {
        self.0.is_active()
    }

    /// Whether the effect backs a computed value.
    pub fn is_computed(&self) -> bool {
        self.0.is_computed()
    }

    /// Downgrade to a handle that does not keep the effect alive.
    pub fn downgrade(&self) -> WeakEffectRef {
        WeakEffectRef(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for EffectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRef")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("computed", &self.is_computed())
            .finish()
    }
}

/// Type-erased weak handle to an effect.
#[derive(Clone)]
pub struct WeakEffectRef(Weak<dyn Subscriber>);

impl WeakEffectRef {
    /// Upgrade to a strong handle if the effect is still alive.
    pub fn upgrade(&self) -> Option<EffectRef> {
        self.0.upgrade().map(EffectRef)
    }
}

impl fmt::Debug for WeakEffectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEffectRef")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}
