//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when one of
//! its dependencies changed and somebody reads it.
//!
//! # How Computed Values Work
//!
//! 1. The value starts dirty. The first read runs the getter through a
//!    backing effect, caches the result and marks the value clean.
//!
//! 2. When a dependency changes, the backing effect's scheduling override
//!    marks the value dirty and notifies the computed value's own
//!    subscribers. Nothing is recomputed at this point; if the value was
//!    already dirty, nothing happens at all.
//!
//! 3. The next read recomputes once. Reads while clean return the cache.
//!
//! # Why This Matters
//!
//! Marking dirty is cheap and does not cascade recomputation through a chain
//! of computed values. Only the values actually read recompute:
//!
//! - A signal changes
//! - 10 computed values depend on it
//! - Only the ones read again recompute
//!
//! Effects that read a computed value subscribe to the computed value
//! itself, not to its inputs.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::effect::Effect;
use super::runtime::Runtime;
use super::subscriber::{EffectRef, ScheduleFn};
use crate::graph::Dep;

type Getter<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

struct ComputedInner<T: 'static> {
    runtime: Runtime,
    getter: Getter<T>,
    setter: Setter<T>,
    value: RwLock<Option<T>>,
    dirty: AtomicBool,
    dep: Mutex<Option<Dep>>,
    effect: Effect<T>,
}

impl<T: Clone + Send + Sync + 'static> ComputedInner<T> {
    /// Scheduling override of the backing effect.
    fn invalidate(&self) {
        if self.dirty.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(effect = self.effect.id().raw(), "computed invalidated");
        self.notify();
    }

    fn notify(&self) {
        let dep = self.dep.lock().clone();
        if let Some(dep) = dep {
            dep.notify();
        }
    }

    fn track(&self) {
        if self.runtime.is_tracking() {
            let dep = self.dep.lock().get_or_insert_with(Dep::new).clone();
            self.runtime.track_dep(&dep);
        }
    }
}

/// Re-marks the value dirty if the getter unwinds.
struct DirtyOnUnwind<'a> {
    dirty: &'a AtomicBool,
    armed: bool,
}

impl Drop for DirtyOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.dirty.store(true, Ordering::Release);
        }
    }
}

/// A lazily recomputed, cached derived value.
///
/// Cloning yields another handle to the same value.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(2);
///
/// let c = count.clone();
/// let doubled = rt.computed(move || c.get() * 2);
/// assert_eq!(doubled.get(), 4);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a read-only computed value. Writes are accepted and ignored,
    /// apart from notifying subscribers.
    pub fn new<F>(runtime: &Runtime, getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_setter(runtime, getter, |_| {})
    }

    /// Create a writable computed value.
    pub fn with_setter<F, S>(runtime: &Runtime, getter: F, setter: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(getter);

        let inner = Arc::new_cyclic(|this: &Weak<ComputedInner<T>>| {
            let this = this.clone();
            let schedule: ScheduleFn = Arc::new(move |_: &EffectRef| {
                if let Some(inner) = this.upgrade() {
                    inner.invalidate();
                }
            });

            let body = getter.clone();
            let effect = Effect::build(runtime, Box::new(move || body()), Some(schedule), true);

            ComputedInner {
                runtime: runtime.clone(),
                getter,
                setter: Box::new(setter),
                value: RwLock::new(None),
                dirty: AtomicBool::new(true),
                dep: Mutex::new(None),
                effect,
            }
        });

        Self { inner }
    }

    /// Read the value, recomputing it first if dirty.
    ///
    /// # Panics
    ///
    /// Panics when read from inside its own first evaluation, when there is
    /// no value to return yet. Use [`Computed::try_get`] there.
    pub fn get(&self) -> T {
        match self.try_get() {
            Some(value) => value,
            None => panic!(
                "computed value read during its own first evaluation; use `Computed::try_get` there"
            ),
        }
    }

    /// Read the value, or `None` when read from inside its own first
    /// evaluation.
    pub fn try_get(&self) -> Option<T> {
        let inner = &self.inner;
        inner.track();

        if inner.dirty.swap(false, Ordering::AcqRel) {
            let mut guard = DirtyOnUnwind {
                dirty: &inner.dirty,
                armed: true,
            };
            let fresh = match inner.effect.run() {
                Some(value) => Some(value),
                // Stopped: keep serving the cache, or evaluate once untracked.
                None if inner.value.read().is_some() => None,
                None => Some(inner.runtime.untracked(|| (inner.getter)())),
            };
            guard.armed = false;

            if let Some(value) = fresh {
                *inner.value.write() = Some(value.clone());
                return Some(value);
            }
        }

        inner.value.read().clone()
    }

    /// Read the value without tracking the read.
    pub fn get_untracked(&self) -> T {
        self.inner.runtime.untracked(|| self.get())
    }

    /// Write the value through the setter and notify subscribers.
    pub fn set(&self, value: T) {
        (self.inner.setter)(value);
        self.inner.notify();
    }

    /// Whether the next read recomputes.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Stop the backing effect. The value keeps its last cache and no longer
    /// reacts to its inputs.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }

    /// The backing effect.
    pub fn effect(&self) -> &Effect<T> {
        &self.inner.effect
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.lock().as_ref().map_or(0, Dep::len)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &*self.inner.value.read())
            .field("dirty", &self.is_dirty())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computed_is_lazy() {
        let rt = Runtime::new();
        let signal = rt.signal(2);
        let calls = Arc::new(AtomicI32::new(0));

        let (s, calls_clone) = (signal.clone(), calls.clone());
        let doubled = rt.computed(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            s.get() * 2
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(doubled.is_dirty());

        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.get(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!doubled.is_dirty());
    }

    #[test]
    fn write_marks_dirty_without_recomputing() {
        let rt = Runtime::new();
        let signal = rt.signal(1);
        let calls = Arc::new(AtomicI32::new(0));

        let (s, calls_clone) = (signal.clone(), calls.clone());
        let plus_one = rt.computed(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            s.get() + 1
        });
        plus_one.get();

        signal.set(5);
        signal.set(6);
        assert!(plus_one.is_dirty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(plus_one.get(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn chained_computed_values() {
        let rt = Runtime::new();
        let signal = rt.signal(1);

        let s = signal.clone();
        let doubled = rt.computed(move || s.get() * 2);
        let d = doubled.clone();
        let quadrupled = rt.computed(move || d.get() * 2);

        assert_eq!(quadrupled.get(), 4);
        signal.set(3);
        assert!(quadrupled.is_dirty());
        assert_eq!(quadrupled.get(), 12);
    }

    #[test]
    fn effect_subscribes_to_computed_not_inputs() {
        let rt = Runtime::new();
        let signal = rt.signal(1);
        let s = signal.clone();
        let doubled = rt.computed(move || s.get() * 2);

        let seen = Arc::new(AtomicI32::new(0));
        let (d, seen_clone) = (doubled.clone(), seen.clone());
        let effect = Effect::new(&rt, move || {
            seen_clone.store(d.get(), Ordering::SeqCst);
        });

        assert_eq!(doubled.subscriber_count(), 1);
        assert_eq!(effect.dependency_count(), 1);

        signal.set(4);
        assert_eq!(seen.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn writable_computed_calls_setter_and_notifies() {
        let rt = Runtime::new();
        let signal = rt.signal(1);

        let (get_s, set_s) = (signal.clone(), signal.clone());
        let doubled = Computed::with_setter(
            &rt,
            move || get_s.get() * 2,
            move |v: i32| set_s.set(v / 2),
        );

        doubled.set(10);
        assert_eq!(signal.get_untracked(), 5);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn read_only_set_is_inert() {
        let rt = Runtime::new();
        let constant = rt.computed(|| 7);
        constant.set(1);
        assert_eq!(constant.get(), 7);
    }

    #[test]
    fn stopped_computed_returns_stale_value() {
        let rt = Runtime::new();
        let signal = rt.signal(1);
        let s = signal.clone();
        let doubled = rt.computed(move || s.get() * 2);
        assert_eq!(doubled.get(), 2);

        doubled.stop();
        signal.set(10);
        assert_eq!(doubled.get(), 2);

        // Never evaluated before the stop: evaluates once, untracked.
        let s = signal.clone();
        let fresh = rt.computed(move || s.get() + 1);
        fresh.stop();
        assert_eq!(fresh.get(), 11);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn panicking_getter_stays_dirty() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        let s = signal.clone();
        let checked = rt.computed(move || {
            let v = s.get();
            assert!(v >= 0, "negative input");
            v
        });

        signal.set(-1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| checked.get()));
        assert!(result.is_err());
        assert!(checked.is_dirty());
        assert!(!rt.is_tracking());

        signal.set(3);
        assert_eq!(checked.get(), 3);
    }

    #[test]
    fn self_read_during_first_evaluation() {
        let rt = Runtime::new();
        let slot: Arc<Mutex<Option<Computed<Option<i32>>>>> = Arc::new(Mutex::new(None));

        let slot_clone = slot.clone();
        let computed = rt.computed(move || {
            let me = slot_clone.lock().clone();
            me.and_then(|c| c.try_get()).flatten().or(Some(1))
        });
        *slot.lock() = Some(computed.clone());

        assert_eq!(computed.get(), Some(1));

        // Break the cycle so both can be dropped.
        slot.lock().take();
    }

    #[test]
    #[should_panic(expected = "use `Computed::try_get` there")]
    fn self_get_during_first_evaluation_points_to_try_get() {
        let rt = Runtime::new();
        let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));

        let slot_clone = slot.clone();
        let computed = rt.computed(move || {
            let me = slot_clone.lock().clone();
            me.map_or(0, |c| c.get() + 1)
        });
        *slot.lock() = Some(computed.clone());

        computed.get();
    }
}
