//! Dependency Registry
//!
//! Two-level map from an observed container to its keys to the subscriber
//! set for each key. Entries are created on the first tracked read of a
//! slot and never ahead of time.
//!
//! The registry is keyed by container ID and holds containers weakly, so it
//! never keeps a container alive. Entries for dropped containers and empty
//! subscriber sets are removed by [`Registry::sweep`].

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use super::dep::Dep;
use crate::reactive::{Container, ContainerId, PropKey, Subscriber, WeakContainer};

struct TargetDeps {
    target: WeakContainer,
    deps: IndexMap<PropKey, Dep>,
}

/// Registry of subscriber sets for observed container slots.
pub struct Registry {
    targets: DashMap<ContainerId, TargetDeps>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
        }
    }

    /// Get the subscriber set for `(target, key)`, creating it on first
    /// access.
    pub fn record(&self, target: &Container, key: &PropKey) -> Dep {
        let mut entry = self
            .targets
            .entry(target.id())
            .or_insert_with(|| TargetDeps {
                target: target.downgrade(),
                deps: IndexMap::new(),
            });
        entry.deps.entry(key.clone()).or_default().clone()
    }

    /// Get the subscriber set for `(target, key)` if that slot was ever
    /// tracked.
    pub fn lookup(&self, target: ContainerId, key: &PropKey) -> Option<Dep> {
        self.targets
            .get(&target)
            .and_then(|entry| entry.deps.get(key).cloned())
    }

    /// Add `subscriber` to the set for `(target, key)`.
    pub fn track(&self, target: &Container, key: &PropKey, subscriber: &Arc<dyn Subscriber>) {
        let dep = self.record(target, key);
        dep.track(subscriber);
    }

    /// Notify the set for `(target, key)`. No-op for slots never tracked.
    pub fn trigger(&self, target: ContainerId, key: &PropKey) {
        // The map guard must be released before any subscriber runs.
        let dep = self.lookup(target, key);
        if let Some(dep) = dep {
            dep.notify();
        }
    }

    /// Remove entries for dropped containers and subscriber sets with no
    /// live members. Returns the number of sets removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        self.targets.retain(|_, entry| {
            if entry.target.is_dropped() {
                removed += entry.deps.len();
                return false;
            }
            let before = entry.deps.len();
            entry.deps.retain(|_, dep| dep.prune() > 0);
            removed += before - entry.deps.len();
            !entry.deps.is_empty()
        });
        removed
    }

    /// Number of containers with at least one tracked slot.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Number of tracked slots for one container.
    pub fn dep_count(&self, target: ContainerId) -> usize {
        self.targets.get(&target).map_or(0, |entry| entry.deps.len())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
