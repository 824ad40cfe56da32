//! Integration Tests for Reactive System
//!
//! These tests verify that observed containers, signals, computed values,
//! effects and the scheduler work together correctly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use ripple_core::reactive::{Computed, Container, Effect, EffectRef, Runtime, Value};
use ripple_core::{is_reactive, FlushMode, Job, RuntimeConfig};

/// Build an effect whose re-runs go through the job queue, the way a
/// renderer would register "re-render when my data changes".
fn scheduled_effect<F>(rt: &Runtime, body: F) -> Effect<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let job: Arc<OnceLock<Job>> = Arc::new(OnceLock::new());
    let job_clone = job.clone();
    let queue = rt.clone();
    let effect = Effect::with_scheduler(rt, body, move |_: &EffectRef| {
        if let Some(job) = job_clone.get() {
            queue.queue_job(job.clone());
        }
    });

    let weak = effect.downgrade();
    let _ = job.set(Job::new(move || {
        if let Some(effect) = weak.upgrade() {
            effect.run();
        }
    }));

    effect.run();
    effect
}

/// An effect re-runs after a write to a key it read, and not after a write
/// to a key it never read.
#[test]
fn tracking_is_per_key() {
    let rt = Runtime::new();
    let state = rt.reactive(Container::from_entries([("a", 1), ("b", 2)]));
    let runs = Arc::new(AtomicI32::new(0));

    let (s, runs_clone) = (state.clone(), runs.clone());
    let _effect = Effect::new(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        s.get("a");
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    state.set("b", 20);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    state.set("a", 10);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Wrapping the same container twice yields the same wrapper.
#[test]
fn wrapping_is_identity_preserving() {
    let rt = Runtime::new();
    let raw = Container::object();

    let first = rt.reactive(raw.clone());
    let second = rt.reactive(raw.clone());
    assert!(first.ptr_eq(&second));
    assert!(is_reactive(&Value::Observed(first)));
    assert!(!is_reactive(&Value::Object(raw)));
}

/// Nested containers are wrapped on read, and writes below them are
/// tracked.
#[test]
fn nested_containers_are_reactive() {
    let rt = Runtime::new();
    let user = Container::from_entries([("name", "ada")]);
    let state = rt.reactive(Container::from_entries([("user", Value::Object(user))]));
    let seen = Arc::new(Mutex::new(String::new()));

    let (s, seen_clone) = (state.clone(), seen.clone());
    let _effect = Effect::new(&rt, move || {
        let name = s
            .get("user")
            .as_observed()
            .map(|u| u.get("name"))
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        *seen_clone.lock() = name;
    });
    assert_eq!(*seen.lock(), "ada");

    let nested = state.get("user");
    assert!(is_reactive(&nested));
    if let Some(user) = nested.as_observed() {
        user.set("name", "grace");
    }
    assert_eq!(*seen.lock(), "grace");
}

/// Reading a computed value twice without an intervening write runs the
/// getter once.
#[test]
fn computed_is_lazy_and_cached() {
    let rt = Runtime::new();
    let x = rt.signal(2);
    let calls = Arc::new(AtomicI32::new(0));

    let (x_clone, calls_clone) = (x.clone(), calls.clone());
    let doubled = rt.computed(move || {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        x_clone.get() * 2
    });

    assert_eq!(doubled.get(), 4);
    assert_eq!(doubled.get(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// An effect reading a computed value sees the recomputed value within the
/// same notification batch.
#[test]
fn computed_invalidates_before_effects_observe() {
    let rt = Runtime::new();
    let x = rt.signal(1);

    let x_clone = x.clone();
    let doubled = rt.computed(move || x_clone.get() * 2);

    // The effect reads both the computed value and its input, so the write
    // to `x` reaches it directly as well as through the computed value.
    let log = Arc::new(Mutex::new(Vec::new()));
    let (d, x_clone, log_clone) = (doubled.clone(), x.clone(), log.clone());
    let _effect = Effect::new(&rt, move || {
        let x = x_clone.get();
        log_clone.lock().push((x, d.get()));
    });

    x.set(5);
    for (x, d) in log.lock().iter() {
        assert_eq!(*d, x * 2, "effect observed a stale computed value");
    }
    assert_eq!(log.lock().last(), Some(&(5, 10)));
}

/// Two writes in one synchronous block result in one scheduled run.
#[test]
fn scheduled_effect_batches_writes() {
    let rt = Runtime::new();
    let r = rt.signal(0);
    let runs = Arc::new(AtomicI32::new(0));

    let (r_clone, runs_clone) = (r.clone(), runs.clone());
    let _effect = scheduled_effect(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        r_clone.get();
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    r.set(1);
    r.set(2);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    rt.flush().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Setting a signal to a same-value-equal value does not notify.
#[test]
fn signal_same_value_semantics() {
    let rt = Runtime::new();
    let r = rt.signal(f64::NAN);
    let runs = Arc::new(AtomicI32::new(0));

    let (r_clone, runs_clone) = (r.clone(), runs.clone());
    let _effect = Effect::new(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        r_clone.get();
    });

    r.set(f64::NAN);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    r.set(-0.0);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    r.set(-0.0);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    r.set(0.0);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// Stopping an effect that is already queued prevents its body from
/// running when the queue flushes.
#[test]
fn stop_cancels_queued_run() {
    let rt = Runtime::new();
    let r = rt.signal(0);
    let runs = Arc::new(AtomicI32::new(0));

    let (r_clone, runs_clone) = (r.clone(), runs.clone());
    let effect = scheduled_effect(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        r_clone.get();
    });

    r.set(1);
    assert_eq!(rt.scheduler().pending_len(), 1);

    effect.stop();
    rt.flush().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    r.set(2);
    assert_eq!(rt.scheduler().pending_len(), 0);
}

/// An effect that reads one key and writes another key of the same
/// container does not recurse.
#[test]
fn disjoint_read_write_does_not_recurse() {
    let rt = Runtime::new();
    let state = rt.reactive(Container::from_entries([("input", 1), ("output", 0)]));
    let runs = Arc::new(AtomicI32::new(0));

    let (s, runs_clone) = (state.clone(), runs.clone());
    let _effect = Effect::new(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        let input = s.get("input").as_int().unwrap_or_default();
        s.set("output", input * 10);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    state.set("input", 4);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(state.raw().get(&"output".into()), Value::Int(40));
}

/// A panicking scheduled job leaves tracking intact for the jobs after it.
#[test]
fn panicking_job_does_not_corrupt_tracking() {
    let rt = Runtime::new();
    let r = rt.signal(0);
    let runs = Arc::new(AtomicI32::new(0));

    let r_clone = r.clone();
    let _faulty = scheduled_effect(&rt, move || {
        if r_clone.get() == 1 {
            panic!("effect failed");
        }
    });

    let (r_clone, runs_clone) = (r.clone(), runs.clone());
    let _healthy = scheduled_effect(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        r_clone.get();
    });

    r.set(1);
    assert_eq!(rt.flush().unwrap(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(!rt.is_tracking());

    // The healthy effect is still subscribed.
    r.set(2);
    rt.flush().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// Boxed value, derived value and a scheduled effect together.
#[test]
fn end_to_end_scenario() {
    let rt = Runtime::new();
    let r = rt.signal(1);
    let calls = Arc::new(AtomicI32::new(0));

    let (r_clone, calls_clone) = (r.clone(), calls.clone());
    let d: Computed<i32> = rt.computed(move || {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        r_clone.get() + 1
    });

    let log = Arc::new(Mutex::new(Vec::new()));
    let (d_clone, log_clone) = (d.clone(), log.clone());
    let _e = scheduled_effect(&rt, move || {
        log_clone.lock().push(d_clone.get());
    });
    assert_eq!(*log.lock(), vec![2]);

    r.set(2);
    assert_eq!(*log.lock(), vec![2]);

    rt.flush().unwrap();
    assert_eq!(*log.lock(), vec![2, 3]);

    let before = calls.load(Ordering::SeqCst);
    assert_eq!(d.get(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), before);
}

/// The same scenario with flushes arranged on the tokio runtime.
#[tokio::test]
async fn end_to_end_scenario_on_tokio() {
    let config = RuntimeConfig::default().with_flush_mode(FlushMode::Tokio);
    let rt = Runtime::with_config(config).unwrap();
    let r = rt.signal(1);

    let r_clone = r.clone();
    let d = rt.computed(move || r_clone.get() + 1);

    let log = Arc::new(Mutex::new(Vec::new()));
    let (d_clone, log_clone) = (d.clone(), log.clone());
    let _e = scheduled_effect(&rt, move || {
        log_clone.lock().push(d_clone.get());
    });

    r.set(2);
    assert!(rt.scheduler().is_flush_pending());
    assert_eq!(*log.lock(), vec![2]);

    rt.next_tick().await;
    assert_eq!(*log.lock(), vec![2, 3]);
    assert!(!rt.scheduler().is_flush_pending());
}

/// Separate runtimes do not see each other's effects.
#[test]
fn runtimes_are_independent() {
    let a = Runtime::new();
    let b = Runtime::new();
    let raw = Container::from_entries([("n", 0)]);

    let in_a = a.reactive(raw.clone());
    let in_b = b.reactive(raw);
    assert!(!in_a.ptr_eq(&in_b));

    let runs = Arc::new(AtomicI32::new(0));
    let (o, runs_clone) = (in_a.clone(), runs.clone());
    let _effect = Effect::new(&a, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        o.get("n");
    });

    in_b.set("n", 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    in_a.set("n", 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Free functions use the calling thread's default runtime.
#[test]
fn free_functions_share_thread_runtime() {
    let count = ripple_core::signal(1);
    let c = count.clone();
    let doubled = ripple_core::computed(move || c.get() * 2);

    let seen = Arc::new(AtomicI32::new(0));
    let (d, seen_clone) = (doubled.clone(), seen.clone());
    let _effect = ripple_core::effect(move || {
        seen_clone.store(d.get(), Ordering::SeqCst);
    });

    count.set(21);
    assert_eq!(seen.load(Ordering::SeqCst), 42);
    assert!(count.runtime().ptr_eq(&Runtime::current()));
}
