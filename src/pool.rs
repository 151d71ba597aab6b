//! Bounded worker pool with join semantics and first-error capture.
//!
//! # Architecture
//!
//! ```text
//!   Orchestrator ──push──► bounded work queue ──┬─► worker 0 ─┐
//!                                               ├─► worker 1 ─┼─► record first error
//!                                               └─► worker N ─┘        │
//!                                                                      ▼
//!                                  wait() ──── join all ──── Option<Error>
//! ```
//!
//! - Exactly N OS threads execute tasks concurrently.
//! - The internal queue is bounded (capacity = worker count): `push` blocks
//!   only until queue space frees up, and that wait is cancellable.
//! - A task returning an error does not stop other in-flight tasks; the pool
//!   records the first error and reports it from `wait()`. Under fail-fast
//!   the recording also cancels the shared token (via [`PipelineState`]),
//!   which workers observe to abandon queued work.
//!
//! # Correctness Invariants
//!
//! - **Work-conserving until cancel**: every pushed task runs unless the run
//!   is cancelled first; cancelled runs drop queued tasks without executing
//!   them.
//! - **First error wins**: only the first non-cancellation error is kept;
//!   later errors are dropped by design (one error surfaces to the caller).
//! - **Panic containment**: a panicking task is converted into a recorded
//!   error instead of tearing down the worker thread.
//! - **Terminal states**: `wait()` consumes the pool, so pushing after the
//!   drain begins is unrepresentable for the owner; a cancelled or closed
//!   queue surfaces as an explicit [`PushError`].

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::pipeline::PipelineState;

use crossbeam_channel::{bounded, select, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// One unit of work: a closure over a single document and the result queue.
///
/// Tasks are independent; no task may depend on another's completion or
/// output. The closure receives the shared token and must check it before
/// expensive work.
pub type Task = Box<dyn FnOnce(&CancelToken) -> crate::error::Result<()> + Send + 'static>;

// ============================================================================
// Configuration
// ============================================================================

/// Pool sizing options.
#[derive(Clone, Copy, Debug)]
pub struct PoolOptions {
    /// Number of worker threads. Must be > 0.
    pub workers: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
        }
    }
}

impl PoolOptions {
    /// Validate options. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a `push` was rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PushError {
    /// The work queue is closed (all workers exited).
    #[error("worker pool is closed")]
    Closed,
    /// The run was cancelled; no new work is accepted.
    #[error("worker pool is cancelled")]
    Cancelled,
}

// ============================================================================
// Pool
// ============================================================================

struct PoolShared {
    first_error: Mutex<Option<Error>>,
    state: Arc<PipelineState>,
}

impl PoolShared {
    /// Record a task failure: first error wins, fail-fast cancels the run.
    fn record(&self, err: Error) {
        tracing::debug!(error = %err, "task failed");
        {
            let mut slot = self.first_error.lock().expect("pool error slot poisoned");
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.state.on_task_error();
    }
}

/// Bounded-concurrency task executor bound to a cancellable run.
pub struct Pool {
    tx: Option<Sender<Task>>,
    threads: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
    token: CancelToken,
}

impl Pool {
    /// Create the pool and start its workers.
    ///
    /// Workers park on the work queue immediately; they exit when the queue
    /// is closed and drained, or as soon as the token is cancelled.
    pub fn new(token: CancelToken, state: Arc<PipelineState>, options: PoolOptions) -> Self {
        options.validate();

        let (tx, rx) = bounded::<Task>(options.workers);
        let shared = Arc::new(PoolShared {
            first_error: Mutex::new(None),
            state,
        });

        let mut threads = Vec::with_capacity(options.workers);
        for worker_id in 0..options.workers {
            let rx = rx.clone();
            let shared = Arc::clone(&shared);
            let token = token.clone();

            let th = thread::Builder::new()
                .name(format!("xunfold-worker-{worker_id}"))
                .spawn(move || loop {
                    select! {
                        recv(rx) -> msg => {
                            let task = match msg {
                                Ok(task) => task,
                                Err(_) => return, // queue closed and drained
                            };
                            if token.is_cancelled() {
                                // Abandon queued work without executing it.
                                drop(task);
                                continue;
                            }
                            run_task(task, &token, &shared);
                        }
                        recv(token.channel()) -> _ => return,
                    }
                })
                .expect("failed to spawn worker thread");

            threads.push(th);
        }

        Self {
            tx: Some(tx),
            threads,
            shared,
            token,
        }
    }

    /// Enqueue a unit of work.
    ///
    /// Blocks only while the bounded queue is full; the wait is interrupted
    /// by cancellation. Rejections are explicit, never silent.
    pub fn push(&self, task: Task) -> Result<(), PushError> {
        if self.token.is_cancelled() {
            return Err(PushError::Cancelled);
        }
        let tx = self.tx.as_ref().ok_or(PushError::Closed)?;
        select! {
            send(tx, task) -> res => res.map_err(|_| PushError::Closed),
            recv(self.token.channel()) -> _ => Err(PushError::Cancelled),
        }
    }

    /// Close the queue, wait for all tasks to finish, return the first error.
    ///
    /// Consuming `self` makes the Created → Running → Draining → Terminated
    /// progression one-way: no handle remains to push on a draining pool.
    pub fn wait(mut self) -> Option<Error> {
        self.tx.take(); // close the queue; workers drain and exit
        for th in self.threads.drain(..) {
            if th.join().is_err() {
                // Task panics are caught in run_task; this is a worker-loop
                // bug. Record it rather than losing the signal.
                self.shared.record(Error::Io(std::io::Error::other(
                    "worker thread panicked outside a task",
                )));
            }
        }
        self.shared
            .first_error
            .lock()
            .expect("pool error slot poisoned")
            .take()
    }
}

fn run_task(task: Task, token: &CancelToken, shared: &PoolShared) {
    match catch_unwind(AssertUnwindSafe(|| task(token))) {
        Ok(Ok(())) => {}
        // Abandoned at a suspension point: not a failure.
        Ok(Err(err)) if err.is_cancelled() => {}
        Ok(Err(err)) => shared.record(err),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "opaque panic payload".to_string());
            shared.record(Error::Io(std::io::Error::other(format!(
                "task panicked: {msg}"
            ))));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_state(fail_fast: bool) -> (Arc<PipelineState>, CancelToken) {
        let (canceller, token) = cancel::pair();
        (
            Arc::new(PipelineState::new(canceller, fail_fast)),
            token,
        )
    }

    #[test]
    fn pool_runs_all_tasks() {
        let (state, token) = test_state(false);
        let pool = Pool::new(token, state, PoolOptions { workers: 4 });

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let c = Arc::clone(&counter);
            pool.push(Box::new(move |_| {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }))
            .unwrap();
        }

        assert!(pool.wait().is_none());
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn wait_without_tasks_returns_immediately() {
        let (state, token) = test_state(false);
        let pool = Pool::new(token, state, PoolOptions { workers: 2 });
        assert!(pool.wait().is_none());
    }

    #[test]
    fn first_error_is_reported_others_dropped() {
        let (state, token) = test_state(false);
        let pool = Pool::new(token, state, PoolOptions { workers: 1 });

        pool.push(Box::new(|_| Err(Error::ManifestNotFound))).unwrap();
        pool.push(Box::new(|_| Err(Error::QueueClosed))).unwrap();

        let err = pool.wait().expect("expected an error");
        assert!(err.is_not_found(), "first error should win, got {err}");
    }

    #[test]
    fn errors_do_not_stop_other_tasks_without_fail_fast() {
        let (state, token) = test_state(false);
        let pool = Pool::new(token, state, PoolOptions { workers: 2 });

        let counter = Arc::new(AtomicUsize::new(0));
        pool.push(Box::new(|_| Err(Error::ManifestNotFound))).unwrap();
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.push(Box::new(move |_| {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }))
            .unwrap();
        }

        assert!(pool.wait().is_some());
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn fail_fast_cancels_the_token_on_first_error() {
        let (state, token) = test_state(true);
        let probe = token.clone();
        let pool = Pool::new(token, state, PoolOptions { workers: 1 });

        pool.push(Box::new(|_| Err(Error::ManifestNotFound))).unwrap();
        // Give the worker time to record and cancel.
        for _ in 0..100 {
            if probe.is_cancelled() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(probe.is_cancelled());

        assert!(pool.wait().is_some());
    }

    #[test]
    fn cancelled_tasks_are_not_recorded_as_errors() {
        let (state, token) = test_state(false);
        let pool = Pool::new(token, state, PoolOptions { workers: 1 });
        pool.push(Box::new(|_| Err(Error::Cancelled))).unwrap();
        assert!(pool.wait().is_none());
    }

    #[test]
    fn push_after_cancel_is_an_explicit_error() {
        let (canceller, token) = cancel::pair();
        let state = Arc::new(PipelineState::new(canceller.clone(), false));
        let pool = Pool::new(token, state, PoolOptions { workers: 1 });

        canceller.cancel();
        let res = pool.push(Box::new(|_| Ok(())));
        assert_eq!(res.unwrap_err(), PushError::Cancelled);
        assert!(pool.wait().is_none());
    }

    #[test]
    fn panicking_task_is_recorded_not_propagated() {
        let (state, token) = test_state(false);
        let pool = Pool::new(token, state, PoolOptions { workers: 2 });

        pool.push(Box::new(|_| panic!("intentional test panic")))
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.push(Box::new(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))
        .unwrap();

        let err = pool.wait().expect("panic should surface as an error");
        assert!(err.to_string().contains("panicked"));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic(expected = "workers must be > 0")]
    fn zero_workers_panics() {
        PoolOptions { workers: 0 }.validate();
    }
}
