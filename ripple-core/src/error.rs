//! Error Types
//!
//! The reactive core has very few failure modes of its own. Reads and writes
//! on slots nobody observes, writes that do not change a signal, and triggers
//! of stopped effects are silent no-ops, not errors.
//!
//! What remains is:
//!
//! - user callbacks that panic while the scheduler is driving them,
//! - flushes that never settle because jobs keep re-queuing each other,
//! - bad configuration.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

/// Errors surfaced by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A callback panicked while running under [`call_with_error_handling`].
    #[error("callback panicked: {message}")]
    Panicked { message: String },

    /// A flush needed more passes than the configured limit.
    #[error("flush exceeded {limit} passes; a job keeps re-queuing work")]
    RecursionLimit { limit: usize },

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Run `f`, converting a panic into [`ReactiveError::Panicked`].
///
/// The scheduler runs every job through this so that one faulting job cannot
/// stop the rest of the queue. Any tracking scope entered inside `f` has
/// already been restored by the time the error is returned.
pub fn call_with_error_handling<T, F>(f: F) -> Result<T, ReactiveError>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| ReactiveError::Panicked {
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
