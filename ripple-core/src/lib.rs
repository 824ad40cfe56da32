//! Ripple Core
//!
//! This crate provides the core runtime for the Ripple reactive dataflow
//! engine. It implements:
//!
//! - Observed containers with per-key dependency tracking
//! - Reactive primitives (signals, computed values, effects, watchers)
//! - Subscriber sets and the dependency registry
//! - A batching job scheduler flushed once per turn
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: reactive primitives, tracking context and the runtime
//! - `graph`: subscriber sets, dependency registry and job scheduler
//! - `config`: runtime configuration
//! - `error`: error types and panic containment for scheduled callbacks
//!
//! All state lives in a [`Runtime`]. Every thread has a default runtime,
//! used by the free functions at the crate root; independent runtimes can be
//! created explicitly, for example one per test.
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{computed, effect, signal};
//!
//! // Create a signal
//! let count = signal(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = computed(move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! let _effect = effect(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{FlushMode, RuntimeConfig};
pub use error::{call_with_error_handling, ReactiveError};
pub use graph::{Job, Scheduler};
pub use reactive::{
    is_reactive, Computed, Container, Effect, EffectRef, Observed, PropKey, Runtime, Signal,
    SignalValue, Value, WatchHandle, WatchOptions, WatchSource,
};

/// Create a signal on the current thread's runtime.
pub fn signal<T: SignalValue>(value: T) -> Signal<T> {
    Runtime::current().signal(value)
}

/// Create a computed value on the current thread's runtime.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Runtime::current().computed(getter)
}

/// Create an effect on the current thread's runtime and run it once.
pub fn effect<T, F>(body: F) -> Effect<T>
where
    T: 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Runtime::current().effect(body)
}

/// Wrap a container on the current thread's runtime.
pub fn reactive(target: Container) -> Observed {
    Runtime::current().reactive(target)
}

/// Watch a source on the current thread's runtime.
pub fn watch<F>(source: WatchSource, callback: F, options: WatchOptions) -> WatchHandle
where
    F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
{
    Runtime::current().watch(source, callback, options)
}

/// Queue a job on the current thread's runtime.
pub fn queue_job(job: Job) {
    Runtime::current().queue_job(job);
}

/// Flush the current thread's runtime.
pub fn flush() -> Result<usize, ReactiveError> {
    Runtime::current().flush()
}

/// Wait until the current thread's runtime has flushed its queued work.
pub async fn next_tick() {
    let runtime = Runtime::current();
    runtime.next_tick().await;
}
