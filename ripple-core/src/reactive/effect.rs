//! Effect Implementation
//!
//! An Effect is a re-runnable computation that re-executes whenever an
//! observable slot it read changes.
//!
//! # How Effects Work
//!
//! 1. `run()` makes the effect the runtime's active subscriber, executes
//!    the body, and restores whatever was active before. Every tracked read
//!    in between adds the effect to that slot's subscriber set.
//!
//! 2. When one of those slots is written, the effect is triggered. Without
//!    a scheduling override it runs again synchronously, inside the write.
//!    With one, the override is called instead and decides when to run
//!    (usually by queuing a job, see [`Effect::queued`]).
//!
//! 3. `stop()` marks the effect dead and removes it from every subscriber
//!    set it joined. A stopped effect is never tracked, triggered or run,
//!    including from a job queued before the stop.
//!
//! # Ownership
//!
//! Subscriber sets hold effects weakly. An effect lives as long as some
//! `Effect` handle does; dropping the last one disposes it.
//!
//! # Re-entrancy
//!
//! Triggering an effect while it is already running is allowed and runs it
//! again, nested. An effect without a scheduling override that writes a
//! slot it also reads will therefore recurse; that is the caller's problem.
//! Computed values are immune because their override only flips a dirty
//! flag.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::runtime::Runtime;
use super::subscriber::{EffectRef, ScheduleFn, Subscriber, SubscriberId};
use crate::graph::{Dep, Job, WeakDep};

pub(crate) struct EffectInner<T> {
    id: SubscriberId,
    runtime: Runtime,
    body: Box<dyn Fn() -> T + Send + Sync>,
    scheduler: Option<ScheduleFn>,
    computed: bool,
    active: AtomicBool,
    /// Subscriber sets this effect joined, used to leave them on stop.
    deps: Mutex<SmallVec<[WeakDep; 4]>>,
    run_count: AtomicUsize,
    this: Weak<EffectInner<T>>,
}

impl<T: 'static> EffectInner<T> {
    fn execute(self: &Arc<Self>) -> T {
        let subscriber: Arc<dyn Subscriber> = self.clone();
        let value = {
            let _ctx = self.runtime.enter(Some(subscriber));
            (self.body)()
        };
        self.run_count.fetch_add(1, Ordering::Relaxed);
        value
    }
}

impl<T: 'static> Subscriber for EffectInner<T> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn is_computed(&self) -> bool {
        self.computed
    }

    fn scheduler(&self) -> Option<ScheduleFn> {
        self.scheduler.clone()
    }

    fn run_erased(&self) {
        if !self.is_active() {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            this.execute();
        }
    }

    fn stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let deps = mem::take(&mut *self.deps.lock());
        for dep in deps.iter().filter_map(WeakDep::upgrade) {
            dep.remove(self.id);
        }
        trace!(effect = self.id.raw(), left = deps.len(), "effect stopped");
    }

    fn joined(&self, dep: &Dep) {
        let mut deps = self.deps.lock();
        deps.retain(|weak| !weak.is_dropped());
        deps.push(dep.downgrade());
    }
}

/// A re-runnable tracked computation returning `T`.
///
/// Cloning yields another handle to the same effect.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// let c = count.clone();
/// let effect = Effect::new(&rt, move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
#[must_use = "dropping the last handle disposes the effect"]
pub struct Effect<T: 'static> {
    inner: Arc<EffectInner<T>>,
}

impl<T: 'static> Effect<T> {
    pub(crate) fn build(
        runtime: &Runtime,
        body: Box<dyn Fn() -> T + Send + Sync>,
        scheduler: Option<ScheduleFn>,
        computed: bool,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| EffectInner {
            id: SubscriberId::new(),
            runtime: runtime.clone(),
            body,
            scheduler,
            computed,
            active: AtomicBool::new(true),
            deps: Mutex::new(SmallVec::new()),
            run_count: AtomicUsize::new(0),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Create an effect and run it once to collect its dependencies.
    pub fn new<F>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(runtime, body);
        effect.inner.execute();
        effect
    }

    /// Create an effect without running it.
    pub fn new_lazy<F>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(runtime, Box::new(body), None, false)
    }

    /// Create an effect with a scheduling override, without running it.
    ///
    /// When a dependency changes, `scheduler` is called with a handle to the
    /// effect instead of the effect running directly.
    pub fn with_scheduler<F, S>(runtime: &Runtime, body: F, scheduler: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(&EffectRef) + Send + Sync + 'static,
    {
        Self::build(runtime, Box::new(body), Some(Arc::new(scheduler)), false)
    }

    /// Create an effect whose re-runs are deferred to the runtime's job
    /// queue, and run it once.
    ///
    /// Every trigger queues the same job, so any number of dependency
    /// writes before the next flush cause a single re-run.
    pub fn queued<F>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let job_slot: Arc<OnceLock<Job>> = Arc::new(OnceLock::new());

        let effect = {
            let job_slot = job_slot.clone();
            let queue = runtime.clone();
            Self::with_scheduler(runtime, body, move |_: &EffectRef| {
                if let Some(job) = job_slot.get() {
                    queue.queue_job(job.clone());
                }
            })
        };

        let weak = effect.downgrade();
        let _ = job_slot.set(Job::new(move || {
            if let Some(effect) = weak.upgrade() {
                effect.run();
            }
        }));

        effect.inner.execute();
        effect
    }

    /// Run the body with tracking and return its result.
    ///
    /// Returns `None` without running anything once the effect is stopped.
    pub fn run(&self) -> Option<T> {
        if !self.is_active() {
            return None;
        }
        Some(self.inner.execute())
    }

    /// Run the body unconditionally. Only for freshly built effects.
    pub(crate) fn run_initial(&self) -> T {
        self.inner.execute()
    }

    /// Stop the effect. Idempotent.
    pub fn stop(&self) {
        Subscriber::stop(&*self.inner);
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Get the effect's subscriber ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Number of live subscriber sets the effect is a member of.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .deps
            .lock()
            .iter()
            .filter_map(WeakDep::upgrade)
            .filter(|dep| dep.contains(self.inner.id))
            .count()
    }

    /// The runtime this effect tracks against.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Type-erased handle to this effect.
    pub fn erased(&self) -> EffectRef {
        EffectRef(self.inner.clone())
    }

    /// Downgrade to a handle that does not keep the effect alive.
    pub fn downgrade(&self) -> WeakEffect<T> {
        WeakEffect(Arc::downgrade(&self.inner))
    }
}

impl<T: 'static> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("computed", &self.inner.computed)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Weak handle to an [`Effect`].
pub struct WeakEffect<T: 'static>(Weak<EffectInner<T>>);

impl<T: 'static> WeakEffect<T> {
    /// Upgrade to a strong handle if the effect is still alive.
    pub fn upgrade(&self) -> Option<Effect<T>> {
        self.0.upgrade().map(|inner| Effect { inner })
    }
}

impl<T: 'static> Clone for WeakEffect<T> {
    fn clone(&self) -> Self {
        Self(Weak::clone(&self.0))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
