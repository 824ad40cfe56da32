//! Watchers
//!
//! A watcher calls a callback with the new and previous value of a source
//! after the source changes. It is an ordinary effect with a scheduling
//! override: a trigger queues the watcher's job, and the job re-evaluates
//! the source and calls the callback during the next flush.
//!
//! Sources are either an observed container, watched deeply, or a getter.
//! Deep watching reads every key of every nested container reachable from
//! the value, so a write anywhere below it triggers the watcher. Keys added
//! after the last evaluation are not covered until the next one.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::warn;

use super::effect::Effect;
use super::observed::Observed;
use super::runtime::Runtime;
use super::subscriber::EffectRef;
use super::value::{ContainerId, Value};
use crate::error::call_with_error_handling;
use crate::graph::Job;

type SourceFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// What a watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    /// An observed container. Always watched deeply.
    Reactive(Observed),
    /// A tracked getter.
    Getter(SourceFn),
}

impl WatchSource {
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::Getter(Arc::new(getter))
    }
}

impl From<Observed> for WatchSource {
    fn from(observed: Observed) -> Self {
        Self::Reactive(observed)
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reactive(observed) => f.debug_tuple("Reactive").field(observed).finish(),
            Self::Getter(_) => f.write_str("Getter(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Run the callback once at creation, with no previous value.
    pub immediate: bool,
    /// Track every nested key and call back on every trigger.
    pub deep: bool,
}

impl WatchOptions {
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }
}

/// Handle to a watcher. Dropping the last handle disposes the watcher.
#[must_use = "dropping the handle disposes the watcher"]
#[derive(Clone, Debug)]
pub struct WatchHandle {
    effect: Effect<Value>,
}

impl WatchHandle {
    /// Stop the watcher. Idempotent; a job already queued becomes a no-op.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    /// The effect evaluating the source.
    pub fn effect(&self) -> &Effect<Value> {
        &self.effect
    }
}

pub(crate) fn watch<F>(
    runtime: &Runtime,
    source: WatchSource,
    callback: F,
    options: WatchOptions,
) -> WatchHandle
where
    F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
{
    let (getter, deep): (SourceFn, bool) = match source {
        WatchSource::Reactive(observed) => {
            let value = Value::Observed(observed);
            (Arc::new(move || value.clone()), true)
        }
        WatchSource::Getter(getter) => (getter, options.deep),
    };

    let job_slot: Arc<OnceLock<Job>> = Arc::new(OnceLock::new());

    let effect = {
        let job_slot = job_slot.clone();
        let queue = runtime.clone();
        Effect::with_scheduler(
            runtime,
            move || {
                let value = getter();
                if deep {
                    traverse(&value, &mut HashSet::new());
                }
                value
            },
            move |_: &EffectRef| {
                if let Some(job) = job_slot.get() {
                    queue.queue_job(job.clone());
                }
            },
        )
    };

    let old: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));

    let job = {
        let weak = effect.downgrade();
        let old = old.clone();
        Job::new(move || {
            let Some(effect) = weak.upgrade() else {
                return;
            };
            let Some(new) = effect.run() else {
                return;
            };

            let previous = old.lock().replace(new.clone());
            let changed = previous.as_ref().map_or(true, |prev| !new.same_value(prev));
            if !(deep || changed) {
                return;
            }

            if let Err(err) = call_with_error_handling(|| callback(&new, previous.as_ref())) {
                warn!(effect = effect.id().raw(), error = %err, "watch callback failed");
            }
        })
    };
    let _ = job_slot.set(job.clone());

    if options.immediate {
        job.run();
    } else {
        *old.lock() = Some(effect.run_initial());
    }

    WatchHandle { effect }
}

/// Read every key of every observed container reachable from `value`.
fn traverse(value: &Value, seen: &mut HashSet<ContainerId>) {
    let Value::Observed(observed) = value else {
        return;
    };
    if !seen.insert(observed.id()) {
        return;
    }
    for key in observed.keys() {
        traverse(&observed.get(key), seen);
    }
}
