//! Dependency Graph
//!
//! This module holds the bookkeeping side of reactivity: who depends on
//! what, and when deferred work runs.
//!
//! # Overview
//!
//! - [`Dep`] is a subscriber set: the effects interested in one observable
//!   slot.
//! - [`Registry`] maps `(container, key)` to the subscriber set for that
//!   slot. Signals and computed values own their subscriber sets directly.
//! - [`Scheduler`] is the queue of deferred jobs, flushed once per turn.
//!
//! # Design Decisions
//!
//! 1. Edges are stored on the source side only (slot to subscribers) plus a
//!    weak back-list on each effect, used solely to leave every set on stop.
//!
//! 2. Subscriber sets hold effects weakly. An effect whose handles were all
//!    dropped disappears from its sets at the next notification or sweep.
//!
//! 3. Notification never holds a lock while user code runs; it iterates
//!    over a snapshot of the set.

mod dep;
mod registry;
mod scheduler;

pub use dep::{Dep, DepId, WeakDep};
pub use registry::Registry;
pub use scheduler::{Job, JobId, JobKind, Scheduler};
