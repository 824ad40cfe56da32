//! Signal Implementation
//!
//! A Signal is a single observable value cell. It holds a value and tracks
//! which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while an effect is collecting dependencies, the
//!    effect joins the signal's subscriber set. The set is created on the
//!    first such read.
//!
//! 2. When a signal is written with a value that differs from the current
//!    one (by [`SignalValue::same_value`]), the subscribers are notified.
//!    Writing the same value is a no-op.
//!
//! 3. A signal holding a [`Value`] keeps two forms of it: the raw value, used
//!    for the change check, and the exposed value, which wraps a raw
//!    container in its observed wrapper so reads through the signal are
//!    tracked too.
//!
//! # Thread Safety
//!
//! Signals are `Send + Sync`. The value is protected by a `RwLock`, and the
//! subscriber set does its own locking.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::runtime::Runtime;
use super::value::{same_float, Value};
use crate::graph::Dep;

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Values a [`Signal`] can hold.
pub trait SignalValue: Clone + Send + Sync + 'static {
    /// Change check used by `set`. Floats treat NaN as equal to itself and
    /// distinguish `+0.0` from `-0.0`.
    fn same_value(&self, other: &Self) -> bool;

    /// Strip any observed wrapper, yielding the raw form.
    fn into_raw(self) -> Self {
        self
    }

    /// The form exposed to readers.
    fn to_reactive(&self, _runtime: &Runtime) -> Self {
        self.clone()
    }
}

macro_rules! impl_signal_value_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SignalValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_signal_value_eq!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char, (), String,
    &'static str, Arc<str>,
);

impl SignalValue for f32 {
    fn same_value(&self, other: &Self) -> bool {
        same_float(f64::from(*self), f64::from(*other))
    }
}

impl SignalValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        same_float(*self, *other)
    }
}

impl<T: SignalValue> SignalValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn into_raw(self) -> Self {
        self.map(SignalValue::into_raw)
    }

    fn to_reactive(&self, runtime: &Runtime) -> Self {
        self.as_ref().map(|v| v.to_reactive(runtime))
    }
}

impl<T: SignalValue> SignalValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }

    fn into_raw(self) -> Self {
        self.into_iter().map(SignalValue::into_raw).collect()
    }

    fn to_reactive(&self, runtime: &Runtime) -> Self {
        self.iter().map(|v| v.to_reactive(runtime)).collect()
    }
}

impl SignalValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        Value::same_value(self, other)
    }

    fn into_raw(self) -> Self {
        Value::into_raw(self)
    }

    fn to_reactive(&self, runtime: &Runtime) -> Self {
        runtime.to_reactive(self.clone())
    }
}

struct SignalInner<T> {
    id: u64,
    runtime: Runtime,
    raw: RwLock<T>,
    value: RwLock<T>,
    dep: Mutex<Option<Dep>>,
}

/// A reactive cell holding a value of type `T`.
///
/// Cloning yields another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Signal<T: SignalValue> {
    inner: Arc<SignalInner<T>>,
}

impl<T: SignalValue> Signal<T> {
    /// Create a signal on `runtime`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        let raw = value.into_raw();
        let exposed = raw.to_reactive(runtime);
        Self {
            inner: Arc::new(SignalInner {
                id: next_signal_id(),
                runtime: runtime.clone(),
                raw: RwLock::new(raw),
                value: RwLock::new(exposed),
                dep: Mutex::new(None),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        if self.inner.runtime.is_tracking() {
            let dep = self.inner.dep.lock().get_or_insert_with(Dep::new).clone();
            self.inner.runtime.track_dep(&dep);
        }
        self.inner.value.read().clone()
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Get the raw form of the current value.
    pub fn get_raw(&self) -> T {
        self.inner.raw.read().clone()
    }

    /// Set a new value and notify subscribers if it differs from the
    /// current one.
    pub fn set(&self, value: T) {
        let raw = value.into_raw();
        {
            let mut current = self.inner.raw.write();
            if current.same_value(&raw) {
                return;
            }
            *current = raw.clone();
        }
        *self.inner.value.write() = raw.to_reactive(&self.inner.runtime);
        self.notify();
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let current = self.inner.value.read();
            f(&*current)
        };
        self.set(next);
    }

    /// Notify subscribers without changing the value.
    pub fn notify(&self) {
        let dep = self.inner.dep.lock().clone();
        if let Some(dep) = dep {
            dep.notify();
        }
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.lock().as_ref().map_or(0, Dep::len)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }
}

impl<T: SignalValue> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: SignalValue + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
