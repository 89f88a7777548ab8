//! Bounded pool of workers consuming a coalescing priority queue.
//!
//! A target runs on at most one worker at a time; tasks for a running
//! target wait in the queue until it is free.
//!
//! Every task runs in its own tokio task, so a panic or an error in one of
//! them is logged and never reaches the pool or sibling tasks. Failures
//! classified as transient are retried with exponential backoff.

use anyhow::Result;
use backoff::ExponentialBackoff;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{Enqueued, Priority, RetryConfig, TaskQueue};

type TaskFn = dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync;

/// A unit of queued work.
///
/// The work is a factory of futures so that a failed attempt can run
/// again from scratch.
#[derive(Clone)]
pub struct Task {
    name: String,
    work: Arc<TaskFn>,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Arc::new(move || Box::pin(work())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Whether an error is worth retrying.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<DomainError>().is_some_and(DomainError::is_transient))
}

/// Waiting tasks and running targets, guarded together so that a target
/// is never picked while it runs.
struct PoolState {
    queue: TaskQueue<Task>,
    /// Cancellation tokens of running tasks, by discriminator.
    running: HashMap<String, CancellationToken>,
}

impl PoolState {
    /// Take the most urgent task whose target is not running, and mark
    /// that target as running.
    fn start_next(&mut self, shutdown: &CancellationToken) -> Option<(Task, Priority, CancellationToken)> {
        let running = &self.running;
        let (task, priority) = self
            .queue
            .dequeue_ready(|priority| !running.contains_key(&priority.discriminator))?;
        let token = shutdown.child_token();
        self.running.insert(priority.discriminator.clone(), token.clone());
        Some((task, priority, token))
    }
}

struct Shared {
    state: Mutex<PoolState>,
    wakeup: Notify,
    /// Tasks enqueued and not yet finished.
    outstanding: watch::Sender<usize>,
    retry: RetryConfig,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_one(&self) {
        self.outstanding.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Fixed set of workers sharing one priority queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `size` workers.
    pub fn start(size: usize, retry: RetryConfig) -> Self {
        let (outstanding, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: TaskQueue::new(),
                running: HashMap::new(),
            }),
            wakeup: Notify::new(),
            outstanding,
            retry,
        });
        let shutdown = CancellationToken::new();

        let workers = (0..size.max(1))
            .map(|id| tokio::spawn(worker_loop(id, shared.clone(), shutdown.clone())))
            .collect();
        info!(workers = size.max(1), "Worker pool started");

        Self {
            shared,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    /// Queue `task`, coalescing it with a waiting task for the same target.
    ///
    /// A task whose target is running waits until that run ends, so one
    /// target is never worked on by two workers at once.
    pub fn enqueue(&self, task: Task, priority: Priority) -> Enqueued {
        let name = task.name.clone();
        let outcome = self.shared.state().queue.enqueue(task, priority.clone());

        match outcome {
            Enqueued::Queued => {
                self.shared.outstanding.send_modify(|count| *count += 1);
                self.shared.wakeup.notify_one();
                debug!(task = %name, %priority, "Task queued");
            }
            Enqueued::Superseded => {
                self.shared.wakeup.notify_one();
                debug!(task = %name, %priority, "Task superseded a less urgent one");
            }
            Enqueued::Coalesced => {
                debug!(task = %name, %priority, "Task already waiting");
            }
        }
        outcome
    }

    /// Tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.state().queue.len()
    }

    /// Wait until every task enqueued so far has finished.
    pub async fn join(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives as long as the pool, so this cannot fail.
        let _ = outstanding.wait_for(|count| *count == 0).await;
    }

    /// Cancel the running task of `discriminator`, if any.
    pub fn cancel(&self, discriminator: &str) -> bool {
        if let Some(token) = self.shared.state().running.get(discriminator) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Drop waiting tasks, cancel running ones and stop the workers.
    pub async fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.state();
            let dropped = state.queue.len();
            state.queue.clear();
            dropped
        };
        for _ in 0..dropped {
            self.shared.finish_one();
        }
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker did not stop cleanly");
            }
        }
        info!(dropped, "Worker pool stopped");
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>, shutdown: CancellationToken) {
    debug!(worker = id, "Worker started");
    loop {
        let next = shared.state().start_next(&shutdown);

        let Some((task, priority, token)) = next else {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = shared.wakeup.notified() => continue,
            }
        };

        run_task(id, &task, &priority, token, &shared.retry).await;

        shared.state().running.remove(&priority.discriminator);
        shared.finish_one();
        // A task held back for this target may now run.
        shared.wakeup.notify_one();
    }
    debug!(worker = id, "Worker stopped");
}

enum Outcome {
    Done(Result<()>),
    Cancelled,
}

async fn run_task(
    worker: usize,
    task: &Task,
    priority: &Priority,
    token: CancellationToken,
    retry: &RetryConfig,
) {
    debug!(worker, task = %task.name, %priority, "Running task");

    let attempt = with_retry(task.clone(), retry.clone());
    let handle = tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => Outcome::Cancelled,
            result = attempt => Outcome::Done(result),
        }
    });

    match handle.await {
        Ok(Outcome::Done(Ok(()))) => debug!(worker, task = %task.name, "Task done"),
        Ok(Outcome::Done(Err(e))) => error!(worker, task = %task.name, "Task failed: {e:#}"),
        Ok(Outcome::Cancelled) => info!(worker, task = %task.name, "Task cancelled, result is moot"),
        Err(e) if e.is_panic() => error!(worker, task = %task.name, "Task panicked"),
        Err(e) => warn!(worker, task = %task.name, error = %e, "Task aborted"),
    }
}

async fn with_retry(task: Task, retry: RetryConfig) -> Result<()> {
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(retry.initial_backoff_ms),
        max_interval: Duration::from_millis(retry.max_backoff_ms),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };
    let attempts = AtomicU32::new(0);
    let (attempts, task, retry) = (&attempts, &task, &retry);

    backoff::future::retry(policy, move || async move {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        match (task.work)().await {
            Ok(()) => Ok(()),
            Err(e) if attempt < retry.max_retries && is_transient(&e) => {
                warn!(task = %task.name, attempt = attempt + 1, "Transient failure, retrying: {e:#}");
                Err(backoff::Error::transient(e))
            }
            Err(e) => Err(backoff::Error::permanent(e)),
        }
    })
    .await
}
