//! Reactive Runtime
//!
//! The runtime is the context object that connects signals, computed values,
//! observed containers and effects. It owns every piece of shared state the
//! reactive system needs:
//!
//! - the active-subscriber slot used for dependency tracking
//! - the registry of subscriber sets for observed container slots
//! - the identity map from raw containers to their observed wrappers
//! - the job scheduler
//!
//! # How It Works
//!
//! 1. An effect runs with itself installed as the active subscriber.
//!
//! 2. Every tracked read (`Observed::get`, `Signal::get`, `Computed::get`)
//!    asks the runtime for the active subscriber and adds it to the slot's
//!    subscriber set.
//!
//! 3. Every write asks the runtime to notify the slot's subscriber set.
//!    Effects with a scheduling override usually answer by queuing a job on
//!    the runtime's scheduler.
//!
//! # Thread Safety
//!
//! `Runtime` is a cheap handle and is `Send + Sync`. Each thread has its own
//! default runtime behind [`Runtime::current`], so independent threads never
//! share a tracking slot. A runtime shared between threads has one tracking
//! slot, so concurrent effect runs on it would see each other's reads.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::computed::Computed;
use super::context::{ReactiveContext, TrackingSlot};
use super::effect::Effect;
use super::observed::{Observed, WeakObserved};
use super::signal::{Signal, SignalValue};
use super::subscriber::{Subscriber, SubscriberId};
use super::value::{Container, ContainerId, PropKey, Value};
use super::watch::{self, WatchHandle, WatchOptions, WatchSource};
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::graph::{Dep, Job, Registry, Scheduler};

thread_local! {
    static CURRENT: Runtime = Runtime::new();
}

struct RuntimeInner {
    config: RuntimeConfig,
    tracking: TrackingSlot,
    registry: Registry,
    wrappers: DashMap<ContainerId, WeakObserved>,
    scheduler: Scheduler,
}

impl RuntimeInner {
    fn sweep(&self) -> usize {
        let deps = self.registry.sweep();
        let before = self.wrappers.len();
        self.wrappers.retain(|_, wrapper| !wrapper.is_dropped());
        let wrappers = before.saturating_sub(self.wrappers.len());
        if deps + wrappers > 0 {
            debug!(deps, wrappers, "swept dead entries");
        }
        deps + wrappers
    }
}

/// Handle to a reactive runtime.
///
/// Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create a runtime from a validated configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, ReactiveError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<RuntimeInner>| {
            let this = this.clone();
            let interval = config.sweep_interval;
            let settled = AtomicU64::new(0);
            let scheduler = Scheduler::with_settled_hook(&config, move || {
                let n = settled.fetch_add(1, Ordering::Relaxed) + 1;
                if interval == 0 || n % interval != 0 {
                    return;
                }
                if let Some(inner) = this.upgrade() {
                    inner.sweep();
                }
            });
            RuntimeInner {
                config,
                tracking: TrackingSlot::new(),
                registry: Registry::new(),
                wrappers: DashMap::new(),
                scheduler,
            }
        });
        Self { inner }
    }

    /// The calling thread's default runtime.
    pub fn current() -> Self {
        CURRENT.with(Runtime::clone)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Whether a subscriber is currently collecting dependencies.
    pub fn is_tracking(&self) -> bool {
        self.inner.tracking.is_active()
    }

    /// ID of the subscriber currently collecting dependencies.
    pub fn active_subscriber(&self) -> Option<SubscriberId> {
        self.inner.tracking.current_id()
    }

    pub(crate) fn active(&self) -> Option<Arc<dyn Subscriber>> {
        self.inner.tracking.current()
    }

    /// Install `subscriber` as the active subscriber until the returned
    /// guard is dropped.
    pub(crate) fn enter(&self, subscriber: Option<Arc<dyn Subscriber>>) -> ReactiveContext<'_> {
        ReactiveContext::enter(&self.inner.tracking, subscriber)
    }

    /// Run `f` with tracking suspended.
    pub fn untracked<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _ctx = self.enter(None);
        f()
    }

    /// Add the active subscriber, if any, to `dep`.
    pub fn track_dep(&self, dep: &Dep) {
        if let Some(subscriber) = self.active() {
            dep.track(&subscriber);
        }
    }

    /// Record that the active subscriber read `key` of `target`.
    ///
    /// Without an active subscriber nothing is recorded, not even an empty
    /// subscriber set.
    pub fn track(&self, target: &Container, key: &PropKey) {
        let Some(subscriber) = self.active() else {
            return;
        };
        trace!(
            target = target.id().raw(),
            key = %key,
            subscriber = subscriber.subscriber_id().raw(),
            "track"
        );
        self.inner.registry.track(target, key, &subscriber);
    }

    /// Notify the subscribers of `key` of `target`. No-op for slots never
    /// tracked.
    pub fn trigger(&self, target: ContainerId, key: &PropKey) {
        trace!(target = target.raw(), key = %key, "trigger");
        self.inner.registry.trigger(target, key);
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    // ------------------------------------------------------------------
    // Observed containers
    // ------------------------------------------------------------------

    /// Get the observed wrapper for `target`.
    ///
    /// Repeated calls for the same container return the same wrapper for as
    /// long as some handle to it is alive.
    pub fn reactive(&self, target: Container) -> Observed {
        match self.inner.wrappers.entry(target.id()) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = entry.get().upgrade() {
                    return existing;
                }
                let observed = Observed::new(self.clone(), target);
                entry.insert(observed.downgrade());
                observed
            }
            Entry::Vacant(entry) => {
                let observed = Observed::new(self.clone(), target);
                entry.insert(observed.downgrade());
                observed
            }
        }
    }

    /// Wrap `value` if it is a raw container; return anything else as is.
    pub fn to_reactive(&self, value: Value) -> Value {
        match value {
            Value::Object(container) => Value::Observed(self.reactive(container)),
            other => other,
        }
    }

    /// Number of live observed wrappers.
    pub fn wrapper_count(&self) -> usize {
        self.inner
            .wrappers
            .iter()
            .filter(|entry| !entry.value().is_dropped())
            .count()
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Create a signal on this runtime.
    pub fn signal<T: SignalValue>(&self, value: T) -> Signal<T> {
        Signal::new(self, value)
    }

    /// Create a computed value on this runtime.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new(self, getter)
    }

    /// Create an effect on this runtime and run it once.
    pub fn effect<T, F>(&self, body: F) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Effect::new(self, body)
    }

    /// Create an effect, run it once, and return it with the result of that
    /// first run.
    pub fn run_tracked<T, F>(&self, body: F) -> (Effect<T>, T)
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Effect::new_lazy(self, body);
        let value = effect.run_initial();
        (effect, value)
    }

    /// Watch `source` and call `callback` with the new and previous value
    /// after each change, deferred to the job queue.
    pub fn watch<F>(&self, source: WatchSource, callback: F, options: WatchOptions) -> WatchHandle
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        watch::watch(self, source, callback, options)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Queue a job on this runtime's scheduler.
    pub fn queue_job(&self, job: Job) {
        self.inner.scheduler.queue_job(job);
    }

    /// Run every pending job now.
    pub fn flush(&self) -> Result<usize, ReactiveError> {
        self.inner.scheduler.flush()
    }

    /// Wait until queued work has been flushed.
    pub fn next_tick(&self) -> impl Future<Output = ()> + '_ {
        self.inner.scheduler.next_tick()
    }

    /// Remove registry entries for dropped containers, subscriber sets with
    /// no live members, and dead wrapper-map entries. Returns the number of
    /// entries removed.
    ///
    /// Runs automatically after every `sweep_interval` flushes.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("targets", &self.inner.registry.target_count())
            .field("wrappers", &self.inner.wrappers.len())
            .field("tracking", &self.is_tracking())
            .finish()
    }
}
