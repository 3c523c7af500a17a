//! Bounded worker pool for per-row stage execution.
//!
//! A bounded `tokio::sync::mpsc` channel feeds a fixed-size pool of workers
//! that share one receiver behind a mutex (the same work-stealing shape used
//! for CPU-bound worker pools elsewhere in the ecosystem): the channel depth
//! gives backpressure, the worker count gives the concurrency bound, and
//! each row's execution is wrapped in its own `tokio::spawn` so a panic
//! surfaces as a `JoinError` on that one row rather than killing the worker.

use catnorm_protocol::CancellationToken;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

/// How often (in processed rows) a worker re-checks the cancellation token
/// while otherwise busy, matching the dispatcher's per-enqueue check.
pub const STOP_CHECK_INTERVAL: u64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub queue_depth: usize,
    pub max_row_failures: u32,
}

impl Default for WorkerPoolConfig {
    /// Two workers, matching the default LLM provider concurrency cap so an
    /// AI-active stage never queues faster than the gateway can drain.
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_depth: 64,
            max_row_failures: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowOutcome<Out> {
    pub index: usize,
    pub result: Result<Out, RowFailure>,
}

#[derive(Debug, Clone)]
pub struct RowFailure {
    pub message: String,
}

impl RowFailure {
    fn from_join_error(index: usize, err: tokio::task::JoinError) -> Self {
        Self {
            message: format!("row {index} task panicked: {err}"),
        }
    }
}

/// Progress counters a caller can poll from another task while `run` is
/// in flight. Atomic so the single collector never needs a lock.
#[derive(Debug, Default)]
pub struct Progress {
    pub processed: AtomicU64,
    pub failed: AtomicU32,
    pub total: AtomicU64,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        (self.processed.load(Ordering::Relaxed) as f64 / total as f64) * 100.0
    }
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    progress: Arc<Progress>,
}

/// Reason the pool stopped dispatching before every row was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Cancelled,
    TooManyFailures,
}

#[derive(Debug)]
pub struct RunOutput<Out> {
    pub outcomes: Vec<RowOutcome<Out>>,
    pub halted: Option<HaltReason>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Drive `rows` through `task`, one row per spawned sub-task, bounded to
    /// `config.worker_count` in flight at a time. Returns every outcome
    /// (unordered) plus the reason dispatch stopped early, if it did.
    pub async fn run<Row, Out, F, Fut>(
        &self,
        rows: Vec<Row>,
        cancel: CancellationToken,
        task: F,
    ) -> RunOutput<Out>
    where
        Row: Send + 'static,
        Out: Send + 'static,
        F: Fn(Row) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, String>> + Send + 'static,
    {
        self.progress.total.store(rows.len() as u64, Ordering::Relaxed);
        self.progress.processed.store(0, Ordering::Relaxed);
        self.progress.failed.store(0, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel::<(usize, Row)>(self.config.queue_depth);
        let rx = Arc::new(Mutex::new(rx));
        let task = Arc::new(task);

        // Dispatcher: checks cancellation before every enqueue, so a stop
        // observed mid-source halts new work without waiting for in-flight
        // rows to drain the queue first.
        let dispatch_cancel = cancel.clone();
        let dispatcher = tokio::spawn(async move {
            for (index, row) in rows.into_iter().enumerate() {
                if dispatch_cancel.is_cancelled() {
                    break;
                }
                if tx.send((index, row)).await.is_err() {
                    break;
                }
            }
        });

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<RowOutcome<Out>>();
        let mut worker_handles = Vec::with_capacity(self.config.worker_count);
        for _ in 0..self.config.worker_count {
            let rx = rx.clone();
            let task = task.clone();
            let cancel = cancel.clone();
            let result_tx = result_tx.clone();
            worker_handles.push(tokio::spawn(async move {
                let mut since_check = 0u64;
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some((index, row)) = next else { break };

                    let fut = (task)(row);
                    let outcome = match tokio::spawn(fut).await {
                        Ok(Ok(value)) => RowOutcome { index, result: Ok(value) },
                        Ok(Err(message)) => RowOutcome {
                            index,
                            result: Err(RowFailure { message }),
                        },
                        Err(join_error) => {
                            error!(row = index, "worker row task panicked");
                            RowOutcome {
                                index,
                                result: Err(RowFailure::from_join_error(index, join_error)),
                            }
                        }
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }

                    since_check += 1;
                    if since_check >= STOP_CHECK_INTERVAL {
                        since_check = 0;
                        if cancel.is_cancelled() {
                            break;
                        }
                    }
                }
            }));
        }
        drop(result_tx);

        let progress = self.progress.clone();
        let max_failures = self.config.max_row_failures;
        let halt_cancel = cancel.clone();
        let mut outcomes = Vec::new();
        let mut halted = None;
        while let Some(outcome) = result_rx.recv().await {
            progress.processed.fetch_add(1, Ordering::Relaxed);
            if outcome.result.is_err() {
                let failed = progress.failed.fetch_add(1, Ordering::Relaxed) + 1;
                if failed >= max_failures && halted.is_none() {
                    warn!(failed, max_failures, "too many row failures, halting session");
                    halt_cancel.cancel();
                    halted = Some(HaltReason::TooManyFailures);
                }
            }
            outcomes.push(outcome);
        }

        let _ = dispatcher.await;
        for handle in worker_handles {
            let _ = handle.await;
        }

        if halted.is_none() && cancel.is_cancelled() {
            halted = Some(HaltReason::Cancelled);
        }

        RunOutput { outcomes, halted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn processes_every_row_when_uncancelled() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            worker_count: 2,
            queue_depth: 4,
            max_row_failures: 10,
        });
        let rows: Vec<i32> = (0..20).collect();
        let cancel = CancellationToken::new();
        let output = pool.run(rows, cancel, |row| async move { Ok::<_, String>(row * 2) }).await;

        assert_eq!(output.outcomes.len(), 20);
        assert!(output.halted.is_none());
        assert!(output.outcomes.iter().all(|o| o.result.is_ok()));
    }

    #[tokio::test]
    async fn isolates_a_panicking_row() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            worker_count: 1,
            queue_depth: 4,
            max_row_failures: 10,
        });
        let rows = vec![1, 2, 3];
        let cancel = CancellationToken::new();
        let output = pool
            .run(rows, cancel, |row| async move {
                if row == 2 {
                    panic!("boom");
                }
                Ok::<_, String>(row)
            })
            .await;

        assert_eq!(output.outcomes.len(), 3);
        let failed: Vec<_> = output.outcomes.iter().filter(|o| o.result.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].index, 1);
    }

    #[tokio::test]
    async fn halts_after_max_row_failures() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            worker_count: 1,
            queue_depth: 2,
            max_row_failures: 2,
        });
        let rows: Vec<i32> = (0..50).collect();
        let cancel = CancellationToken::new();
        let output = pool
            .run(rows, cancel, |_row| async move { Err::<i32, _>("always fails".to_string()) })
            .await;

        assert_eq!(output.halted, Some(HaltReason::TooManyFailures));
        assert!(output.outcomes.len() < 50);
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            worker_count: 1,
            queue_depth: 1,
            max_row_failures: 100,
        });
        let rows: Vec<i32> = (0..1000).collect();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        cancel_clone.cancel();
        let output = pool.run(rows, cancel, |row| async move { Ok::<_, String>(row) }).await;

        assert_eq!(output.halted, Some(HaltReason::Cancelled));
        assert!(output.outcomes.len() < 1000);
    }
}
