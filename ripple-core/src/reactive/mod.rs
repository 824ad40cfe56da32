//! Reactive Primitives
//!
//! This module implements the core reactive system: observed containers,
//! signals, computed values, effects and watchers. These primitives form the
//! foundation of Ripple's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Observed Containers
//!
//! An [`Observed`] wraps a keyed [`Container`]. Reading a key inside an
//! effect subscribes the effect to exactly that key; writing the key
//! re-runs (or reschedules) exactly the effects that read it.
//!
//! ## Signals
//!
//! A [`Signal`] is a single observable cell for values that cannot be
//! tracked by key. Writes that do not change the value are ignored.
//!
//! ## Computed Values
//!
//! A [`Computed`] is a derived value that caches its result. A change to one
//! of its inputs only marks it dirty; it recomputes on the next read.
//!
//! ## Effects
//!
//! An [`Effect`] is a computation that runs again whenever something it read
//! changes, either immediately or through a scheduling override that defers
//! it to the job queue.
//!
//! # Implementation Notes
//!
//! Dependency tracking goes through the [`Runtime`]'s active-subscriber
//! slot. While an effect runs it occupies the slot, and every tracked read
//! adds the occupant to the subscriber set of the slot being read.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod computed;
mod context;
mod effect;
mod observed;
mod runtime;
mod signal;
mod subscriber;
mod value;
mod watch;

pub use computed::Computed;
pub use context::ReactiveContext;
pub use effect::{Effect, WeakEffect};
pub use observed::{is_reactive, Observed, IS_REACTIVE_KEY};
pub use runtime::Runtime;
pub use signal::{Signal, SignalValue};
pub use subscriber::{EffectRef, ScheduleFn, Subscriber, SubscriberId, WeakEffectRef};
pub use value::{Container, ContainerId, ContainerKind, PropKey, Value, WeakContainer};
pub use watch::{WatchHandle, WatchOptions, WatchSource};

pub(crate) use subscriber::trigger_subscriber;
