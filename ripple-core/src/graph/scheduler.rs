//! Job Scheduler
//!
//! The scheduler defers effect re-execution to one batched pass per turn.
//!
//! # Algorithm
//!
//! 1. `queue_job` appends to the pending queue. The first enqueue of a turn
//!    arranges exactly one flush; later enqueues in the same turn, or while
//!    a flush is running, arrange nothing.
//! 2. A flush takes the pending queue, collapses duplicates to their first
//!    occurrence, moves computed jobs ahead of the rest (stable), and clears
//!    the queue before running anything.
//! 3. Jobs queued while the snapshot runs land in a fresh pending queue and
//!    run in the next pass of the same flush. Passes repeat until the queue
//!    stays empty or the recursion limit is reached.
//!
//! Every job runs under [`call_with_error_handling`], so a panicking job is
//! logged and the rest of the snapshot still runs.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use crate::config::{FlushMode, RuntimeConfig};
use crate::error::{call_with_error_handling, ReactiveError};

/// Unique identifier for a job. Deduplication is by this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// Priority class of a job within one flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Recomputes derived state; runs before normal jobs.
    Computed,
    Normal,
}

/// A queued callback.
///
/// Clones share the same ID, so queuing a clone of a pending job is a
/// duplicate and runs once.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    kind: JobKind,
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Job {
    /// Create a normal job.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: JobId::new(),
            kind: JobKind::Normal,
            run: Arc::new(run),
        }
    }

    /// Create a job that runs ahead of normal jobs in its pass.
    pub fn computed<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            kind: JobKind::Computed,
            ..Self::new(run)
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Run the job's callback.
    pub fn run(&self) {
        (self.run)();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    pending: Vec<Job>,
    flush_pending: bool,
    flushing: bool,
}

struct SchedulerInner {
    state: Mutex<QueueState>,
    flush_mode: FlushMode,
    recursion_limit: usize,
    ticks: watch::Sender<u64>,
    on_settled: Box<dyn Fn() + Send + Sync>,
}

/// The pending-job queue and its flush loop.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_settled_hook(config, || {})
    }

    /// Create a scheduler that calls `on_settled` at the end of every
    /// flush, including one aborted at the recursion limit.
    pub fn with_settled_hook<F>(config: &RuntimeConfig, on_settled: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (ticks, _) = watch::channel(0);
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(QueueState::default()),
                flush_mode: config.flush_mode,
                recursion_limit: config.recursion_limit.max(1),
                ticks,
                on_settled: Box::new(on_settled),
            }),
        }
    }

    /// Queue a job and arrange a flush if none is pending or running.
    pub fn queue_job(&self, job: Job) {
        let arrange = {
            let mut state = self.inner.state.lock();
            trace!(job = job.id.raw(), pending = state.pending.len(), "queue job");
            state.pending.push(job);
            let arrange = !state.flushing && !state.flush_pending;
            if arrange {
                state.flush_pending = true;
            }
            arrange
        };

        if arrange {
            self.arrange_flush();
        }
    }

    fn arrange_flush(&self) {
        match self.inner.flush_mode {
            FlushMode::Manual => trace!("flush pending; waiting for host"),
            FlushMode::Tokio => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let scheduler = self.clone();
                    handle.spawn(async move {
                        scheduler.flush_logged();
                    });
                }
                Err(_) => {
                    warn!("no tokio runtime to flush on; jobs wait for an explicit flush");
                    self.inner.state.lock().flush_pending = false;
                }
            },
        }
    }

    /// Run every pending job, including jobs queued by jobs, until the queue
    /// stays empty.
    ///
    /// Returns the number of jobs that completed without panicking. A call
    /// made while a flush is already running returns `Ok(0)`; the running
    /// flush picks up anything queued in the meantime.
    pub fn flush(&self) -> Result<usize, ReactiveError> {
        {
            let mut state = self.inner.state.lock();
            if state.flushing {
                return Ok(0);
            }
            state.flush_pending = false;
            state.flushing = true;
        }
        let _guard = FlushGuard { scheduler: self };

        let limit = self.inner.recursion_limit;
        let mut passes = 0;
        let mut completed = 0;

        loop {
            let batch = {
                let mut state = self.inner.state.lock();
                if state.pending.is_empty() {
                    break;
                }
                if passes == limit {
                    let dropped = state.pending.len();
                    state.pending.clear();
                    drop(state);
                    error!(limit, dropped, "flush recursion limit exceeded");
                    (self.inner.on_settled)();
                    return Err(ReactiveError::RecursionLimit { limit });
                }
                snapshot(mem::take(&mut state.pending))
            };

            passes += 1;
            debug!(pass = passes, jobs = batch.len(), "flush pass");

            for job in &batch {
                match call_with_error_handling(|| job.run()) {
                    Ok(()) => completed += 1,
                    Err(err) => warn!(job = job.id.raw(), error = %err, "job failed"),
                }
            }
        }

        (self.inner.on_settled)();
        debug!(jobs = completed, passes, "flush complete");
        Ok(completed)
    }

    fn flush_logged(&self) {
        if let Err(err) = self.flush() {
            error!(error = %err, "flush aborted");
        }
    }

    /// Wait until queued work has been flushed.
    ///
    /// In manual mode this flushes in place. In tokio mode it waits for the
    /// spawned flush, or flushes in place when none could be spawned.
    pub async fn next_tick(&self) {
        match self.inner.flush_mode {
            FlushMode::Manual => self.flush_logged(),
            FlushMode::Tokio => {
                let mut ticks = self.inner.ticks.subscribe();
                let (scheduled, queued) = {
                    let state = self.inner.state.lock();
                    (
                        state.flush_pending || state.flushing,
                        !state.pending.is_empty(),
                    )
                };
                if scheduled {
                    let _ = ticks.changed().await;
                } else if queued {
                    self.flush_logged();
                }
            }
        }
    }

    /// Whether a flush has been arranged but not started.
    pub fn is_flush_pending(&self) -> bool {
        self.inner.state.lock().flush_pending
    }

    /// Whether a flush is running.
    pub fn is_flushing(&self) -> bool {
        self.inner.state.lock().flushing
    }

    /// Number of queued jobs, duplicates included.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Number of flushes completed or aborted so far.
    pub fn flush_count(&self) -> u64 {
        *self.inner.ticks.borrow()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scheduler")
            .field("pending", &state.pending.len())
            .field("flush_pending", &state.flush_pending)
            .field("flushing", &state.flushing)
            .finish()
    }
}

/// Clears the flushing flag and publishes a tick on every exit path.
struct FlushGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.inner.state.lock().flushing = false;
        self.scheduler.inner.ticks.send_modify(|tick| *tick += 1);
    }
}

/// Deduplicate by job ID keeping first occurrences, then move computed
/// jobs ahead of normal ones without reordering within either class.
fn snapshot(pending: Vec<Job>) -> Vec<Job> {
    let mut unique: IndexMap<JobId, Job> = IndexMap::with_capacity(pending.len());
    for job in pending {
        unique.entry(job.id).or_insert(job);
    }
    let (mut ordered, normal): (Vec<Job>, Vec<Job>) = unique
        .into_values()
        .partition(|job| job.kind == JobKind::Computed);
    ordered.extend(normal);
    ordered
}
