//! Observed Containers
//!
//! An [`Observed`] is the tracking view of a [`Container`]. Every keyed read
//! records a dependency of the active effect on `(container, key)`, and
//! every keyed write notifies that slot's subscribers.
//!
//! Nested containers are wrapped on read, not when the outer container is
//! wrapped, so reactivity reaches only as deep as the code actually looks.
//!
//! Wrapping is identity-preserving: the runtime keeps a weak
//! container-to-wrapper map, so wrapping the same container twice yields the
//! same `Observed` for as long as any handle to it is alive.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::trace;

use super::runtime::Runtime;
use super::value::{Container, ContainerId, PropKey, Value};

/// Reserved key that reads as `true` on every observed container, without
/// touching the container or tracking anything.
pub const IS_REACTIVE_KEY: &str = "__v_isReactive";

pub(crate) struct ObservedInner {
    target: Container,
    runtime: Runtime,
}

/// A container with read tracking and write notification.
#[derive(Clone)]
pub struct Observed {
    inner: Arc<ObservedInner>,
}

impl Observed {
    pub(crate) fn new(runtime: Runtime, target: Container) -> Self {
        Self {
            inner: Arc::new(ObservedInner { target, runtime }),
        }
    }

    /// Read a slot.
    ///
    /// Tracks `(container, key)` against the active effect. A nested
    /// container comes back wrapped.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = key.into();
        if is_reactive_flag(&key) {
            return Value::Bool(true);
        }

        let value = self.inner.target.get(&key);
        self.inner.runtime.track(&self.inner.target, &key);

        match value {
            Value::Object(nested) => Value::Observed(self.inner.runtime.reactive(nested)),
            other => other,
        }
    }

    /// Write a slot and notify its subscribers.
    ///
    /// Observed values are stored as their raw container. Every write
    /// notifies unless the runtime was configured with
    /// `dedupe_container_writes` and the stored value is unchanged.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into().into_raw();
        let runtime = &self.inner.runtime;

        let previous = self.inner.target.set(key.clone(), value.clone());
        if runtime.config().dedupe_container_writes
            && previous.map_or(false, |previous| previous.same_value(&value))
        {
            trace!(container = self.id().raw(), key = %key, "unchanged write skipped");
            return;
        }

        runtime.trigger(self.inner.target.id(), &key);
    }

    /// The underlying container. Access through it is not tracked.
    pub fn raw(&self) -> Container {
        self.inner.target.clone()
    }

    /// ID of the underlying container.
    pub fn id(&self) -> ContainerId {
        self.inner.target.id()
    }

    /// Runtime this wrapper reports to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Keys of the underlying container. Not tracked.
    pub fn keys(&self) -> Vec<PropKey> {
        self.inner.target.keys()
    }

    /// Number of slots. Not tracked.
    pub fn len(&self) -> usize {
        self.inner.target.len()
    }

    /// Whether the container has no slots. Not tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.target.is_empty()
    }

    /// Whether two handles are the same wrapper.
    pub fn ptr_eq(&self, other: &Observed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakObserved {
        WeakObserved(Arc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("target", &self.inner.target)
            .finish()
    }
}

/// Weak wrapper handle held by the runtime's identity map.
#[derive(Clone)]
pub(crate) struct WeakObserved(Weak<ObservedInner>);

impl WeakObserved {
    pub(crate) fn upgrade(&self) -> Option<Observed> {
        self.0.upgrade().map(|inner| Observed { inner })
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.0.strong_count() == 0
    }
}

fn is_reactive_flag(key: &PropKey) -> bool {
    matches!(key, PropKey::Name(name) if &**name == IS_REACTIVE_KEY)
}

/// Whether `value` is an observed container.
///
/// Answers by reading the reserved marker key, which only observed
/// containers answer with `true`.
pub fn is_reactive(value: &Value) -> bool {
    match value {
        Value::Observed(observed) => observed.get(IS_REACTIVE_KEY).as_bool() == Some(true),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::reactive::Effect;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting_effect<F>(rt: &Runtime, read: F) -> (Effect<()>, Arc<AtomicI32>)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let effect = Effect::new(rt, move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            read();
        });
        (effect, runs)
    }

    #[test]
    fn wrapping_is_identity_preserving() {
        let rt = Runtime::new();
        let c = Container::object();
        let a = rt.reactive(c.clone());
        let b = rt.reactive(c);
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn rewrap_after_drop_wraps_same_container() {
        let rt = Runtime::new();
        let c = Container::object();
        let first_id = {
            let first = rt.reactive(c.clone());
            first.id()
        };
        let second = rt.reactive(c.clone());
        assert_eq!(second.id(), first_id);
        assert!(second.raw().ptr_eq(&c));
    }

    #[test]
    fn marker_key_reads_true() {
        let rt = Runtime::new();
        let obs = rt.reactive(Container::object());
        assert_eq!(obs.get(IS_REACTIVE_KEY), Value::Bool(true));
        assert!(is_reactive(&Value::Observed(obs.clone())));
        assert!(!is_reactive(&Value::Object(obs.raw())));
        assert!(!is_reactive(&Value::Int(1)));
    }

    #[test]
    fn read_tracks_and_write_triggers() {
        let rt = Runtime::new();
        let obs = rt.reactive(Container::from_entries([("a", 1), ("b", 2)]));

        let reader = obs.clone();
        let (_effect, runs) = counting_effect(&rt, move || {
            reader.get("a");
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        obs.set("a", 10);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Never read, never tracked.
        obs.set("b", 20);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn write_before_any_read_is_silent() {
        let rt = Runtime::new();
        let obs = rt.reactive(Container::object());
        obs.set("fresh", 1);
        assert_eq!(obs.get("fresh"), Value::Int(1));
    }

    #[test]
    fn nested_container_is_wrapped_on_read() {
        let rt = Runtime::new();
        let inner = Container::from_entries([("n", 1)]);
        let outer = rt.reactive(Container::from_entries([("inner", inner.clone())]));

        let nested = outer.get("inner");
        let nested = nested.as_observed().expect("nested value should be observed");
        assert!(nested.raw().ptr_eq(&inner));
        assert!(nested.ptr_eq(&rt.reactive(inner)));
    }

    #[test]
    fn nested_writes_trigger_deep_readers() {
        let rt = Runtime::new();
        let outer = rt.reactive(Container::from_entries([(
            "inner",
            Container::from_entries([("n", 1)]),
        )]));

        let reader = outer.clone();
        let (_effect, runs) = counting_effect(&rt, move || {
            if let Value::Observed(inner) = reader.get("inner") {
                inner.get("n");
            }
        });

        let inner = outer.get("inner");
        inner.as_observed().unwrap().set("n", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn observed_values_are_stored_raw() {
        let rt = Runtime::new();
        let outer = rt.reactive(Container::object());
        let child = rt.reactive(Container::object());
        outer.set("child", child.clone());
        assert!(matches!(outer.raw().get(&"child".into()), Value::Object(ref c) if c.ptr_eq(&child.raw())));
    }

    #[test]
    fn same_value_write_notifies_by_default() {
        let rt = Runtime::new();
        let obs = rt.reactive(Container::from_entries([("a", 1)]));
        let reader = obs.clone();
        let (_effect, runs) = counting_effect(&rt, move || {
            reader.get("a");
        });

        obs.set("a", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn same_value_write_skipped_when_deduped() {
        let config = RuntimeConfig::default().with_dedupe_container_writes(true);
        let rt = Runtime::with_config(config).unwrap();
        let obs = rt.reactive(Container::from_entries([("a", 1)]));
        let reader = obs.clone();
        let (_effect, runs) = counting_effect(&rt, move || {
            reader.get("a");
        });

        obs.set("a", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        obs.set("a", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disjoint_read_write_in_one_effect_terminates() {
        let rt = Runtime::new();
        let obs = rt.reactive(Container::from_entries([("input", 1), ("output", 0)]));
        let inner = obs.clone();
        let (_effect, runs) = counting_effect(&rt, move || {
            let input = inner.get("input").as_int().unwrap_or(0);
            inner.set("output", input * 2);
        });

        obs.set("input", 5);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(obs.raw().get(&"output".into()), Value::Int(10));
    }
}
