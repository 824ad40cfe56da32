//! Dynamic Values and Containers
//!
//! Observed containers hold dynamically typed [`Value`]s under [`PropKey`]s.
//! A [`Container`] is the plain, untracked keyed structure (an object or an
//! array); wrapping it with [`Runtime::reactive`](super::Runtime::reactive)
//! yields an [`Observed`] that tracks reads and triggers on writes.
//!
//! Containers are shared handles: cloning one clones the handle, not the
//! data, and identity (not content) is what the runtime keys on.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Number};

use super::observed::Observed;

/// Unique identifier for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A property key: a named field or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    Name(Arc<str>),
    Index(usize),
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        PropKey::Name(Arc::from(name))
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        PropKey::Name(Arc::from(name))
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

impl From<&PropKey> for PropKey {
    fn from(key: &PropKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Name(name) => f.write_str(name),
            PropKey::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Shape of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Object,
    Array,
}

struct ContainerInner {
    id: ContainerId,
    kind: ContainerKind,
    slots: RwLock<IndexMap<PropKey, Value>>,
}

/// A plain mutable keyed structure. Reads and writes through this handle
/// are never tracked.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    fn with_kind(kind: ContainerKind) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                id: ContainerId::next(),
                kind,
                slots: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Create an empty object.
    pub fn object() -> Self {
        Self::with_kind(ContainerKind::Object)
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Self::with_kind(ContainerKind::Array)
    }

    /// Create an object from key/value pairs.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<PropKey>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let container = Self::object();
        {
            let mut slots = container.inner.slots.write();
            for (key, value) in entries {
                slots.insert(key.into(), value.into());
            }
        }
        container
    }

    /// Create an array from values.
    pub fn from_values<V, I>(values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let container = Self::array();
        {
            let mut slots = container.inner.slots.write();
            for (index, value) in values.into_iter().enumerate() {
                slots.insert(PropKey::Index(index), value.into());
            }
        }
        container
    }

    /// Get the container's unique ID.
    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// Get the container's shape.
    pub fn kind(&self) -> ContainerKind {
        self.inner.kind
    }

    /// Read a slot. Missing slots read as [`Value::Null`].
    pub fn get(&self, key: &PropKey) -> Value {
        self.inner.slots.read().get(key).cloned().unwrap_or(Value::Null)
    }

    /// Write a slot, returning the previous value if there was one.
    pub fn set(&self, key: PropKey, value: Value) -> Option<Value> {
        self.inner.slots.write().insert(key, value)
    }

    /// Append to an array, returning the new element's index. The index is
    /// one past the largest index present, so sparse arrays keep every
    /// element.
    pub fn push(&self, value: Value) -> usize {
        let mut slots = self.inner.slots.write();
        let index = slots
            .keys()
            .filter_map(|key| match key {
                PropKey::Index(index) => Some(index + 1),
                PropKey::Name(_) => None,
            })
            .max()
            .unwrap_or(0);
        slots.insert(PropKey::Index(index), value);
        index
    }

    /// Whether the slot exists.
    pub fn contains_key(&self, key: &PropKey) -> bool {
        self.inner.slots.read().contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<PropKey> {
        self.inner.slots.read().keys().cloned().collect()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.inner.slots.read().len()
    }

    /// Whether the container has no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles refer to the same container.
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Downgrade to a handle that does not keep the container alive.
    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.inner))
    }

    /// Render the container tree as JSON. A container reached again through
    /// a cycle renders as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<ContainerId>) -> serde_json::Value {
        if !seen.insert(self.id()) {
            return serde_json::Value::Null;
        }
        let entries: Vec<(PropKey, Value)> = self
            .inner
            .slots
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let json = match self.kind() {
            ContainerKind::Array => serde_json::Value::Array(
                entries
                    .iter()
                    .map(|(_, value)| value.to_json_inner(seen))
                    .collect(),
            ),
            ContainerKind::Object => {
                let mut map = Map::new();
                for (key, value) in &entries {
                    map.insert(key.to_string(), value.to_json_inner(seen));
                }
                serde_json::Value::Object(map)
            }
        };
        seen.remove(&self.id());
        json
    }

    /// Build a container tree from a JSON object or array. Other JSON values
    /// yield `None`.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match Value::from_json(json) {
            Value::Object(container) => Some(container),
            _ => None,
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("len", &self.len())
            .finish()
    }
}

/// Weak handle to a container.
#[derive(Clone)]
pub struct WeakContainer(Weak<ContainerInner>);

impl WeakContainer {
    /// Upgrade to a strong handle if the container is still alive.
    pub fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(|inner| Container { inner })
    }

    /// Whether the container has been dropped.
    pub fn is_dropped(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// A dynamically typed value stored in a container.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A plain, untracked container.
    Object(Container),
    /// A container seen through the tracking layer.
    Observed(Observed),
}

impl Value {
    /// Same-value equality: `NaN` equals `NaN`, `+0.0` differs from `-0.0`,
    /// containers compare by identity.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => same_float(*a, *b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Observed(a), Value::Observed(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether the value is a container, observed or not.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Observed(_))
    }

    /// Strip the tracking layer: observed containers become their raw
    /// container, everything else is returned as-is.
    pub fn into_raw(self) -> Value {
        match self {
            Value::Observed(observed) => Value::Object(observed.raw()),
            other => other,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_observed(&self) -> Option<&Observed> {
        match self {
            Value::Observed(observed) => Some(observed),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render as JSON without tracking.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<ContainerId>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Object(container) => container.to_json_inner(seen),
            Value::Observed(observed) => observed.raw().to_json_inner(seen),
        }
    }

    /// Build a value from JSON. Objects and arrays become fresh containers.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::Object(Container::from_values(items.iter().map(Value::from_json)))
            }
            serde_json::Value::Object(map) => Value::Object(Container::from_entries(
                map.iter().map(|(k, v)| (k.as_str(), Value::from_json(v))),
            )),
        }
    }
}

/// Same-value comparison for floats.
pub(crate) fn same_float(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    a.to_bits() == b.to_bits()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({:?})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Object(c) => write!(f, "Object(#{})", c.id().raw()),
            Value::Observed(o) => write!(f, "Observed(#{})", o.id().raw()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Container> for Value {
    fn from(container: Container) -> Self {
        Value::Object(container)
    }
}

impl From<Observed> for Value {
    fn from(observed: Observed) -> Self {
        Value::Observed(observed)
    }
}
