//! Subscriber Sets
//!
//! A [`Dep`] is the set of subscribers interested in one observable slot:
//! one key of one observed container, one signal, or one computed value.
//!
//! Members are held weakly and in insertion order. Dropped effects are
//! pruned lazily on the next notification, and stopped effects remove
//! themselves eagerly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::map::Entry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::reactive::{trigger_subscriber, Subscriber, SubscriberId};

/// Unique identifier for a subscriber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(u64);

impl DepId {
    /// Generate a new unique dep ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for DepId {
    fn default() -> Self {
        Self::new()
    }
}

struct DepInner {
    id: DepId,
    subscribers: Mutex<IndexMap<SubscriberId, Weak<dyn Subscriber>>>,
}

/// A set of subscribers for one observable slot.
///
/// Cloning a `Dep` yields another handle to the same set.
#[derive(Clone)]
pub struct Dep {
    inner: Arc<DepInner>,
}

impl Dep {
    /// Create an empty subscriber set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                id: DepId::new(),
                subscribers: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Get the set's unique ID.
    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Add a subscriber to the set.
    ///
    /// Returns `true` if it was not already a member. Stopped subscribers
    /// are never added.
    pub fn track(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        if !subscriber.is_active() {
            return false;
        }

        let inserted = {
            let mut subscribers = self.inner.subscribers.lock();
            match subscribers.entry(subscriber.subscriber_id()) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::downgrade(subscriber));
                    true
                }
                Entry::Occupied(_) => false,
            }
        };

        if inserted {
            subscriber.joined(self);
        }
        inserted
    }

    /// Remove a subscriber from the set.
    pub fn remove(&self, id: SubscriberId) {
        self.inner.subscribers.lock().shift_remove(&id);
    }

    /// Whether the set contains a live subscriber with this ID.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.inner
            .subscribers
            .lock()
            .get(&id)
            .map_or(false, |weak| weak.strong_count() > 0)
    }

    /// Trigger every live member.
    ///
    /// Members backing computed values are triggered before plain members,
    /// so a plain effect never reads a computed value that is about to be
    /// invalidated by the same write. Iteration runs over a snapshot taken
    /// before any member is triggered.
    pub fn notify(&self) {
        let snapshot: Vec<Arc<dyn Subscriber>> = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|_, weak| weak.strong_count() > 0);
            subscribers.values().filter_map(Weak::upgrade).collect()
        };

        if snapshot.is_empty() {
            return;
        }

        trace!(dep = self.id().raw(), subscribers = snapshot.len(), "notify");

        let (computed, plain): (Vec<_>, Vec<_>) =
            snapshot.into_iter().partition(|s| s.is_computed());

        for subscriber in computed.into_iter().chain(plain) {
            trigger_subscriber(subscriber);
        }
    }

    /// Drop members whose effect no longer exists and return how many live
    /// members remain.
    pub fn prune(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|_, weak| weak.strong_count() > 0);
        subscribers.len()
    }

    /// Number of live members.
    pub fn len(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether the set has no live members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Downgrade to a handle that does not keep the set alive.
    pub fn downgrade(&self) -> WeakDep {
        WeakDep(Arc::downgrade(&self.inner))
    }

    /// Whether two handles refer to the same set.
    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Weak handle to a subscriber set, held by effects to leave their sets on
/// stop.
#[derive(Clone)]
pub struct WeakDep(Weak<DepInner>);

impl WeakDep {
    /// Upgrade to a strong handle if the set still exists.
    pub fn upgrade(&self) -> Option<Dep> {
        self.0.upgrade().map(|inner| Dep { inner })
    }

    /// Whether the set has been dropped.
    pub fn is_dropped(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDep")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}
