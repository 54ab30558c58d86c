//! Push-driven scheduler.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, warn};

use super::{RunSummary, SchedulerState};
use crate::task::ProcessTask;

type Callback = Box<dyn FnOnce(&RunSummary) + Send>;

/// A task the queue refused; the task is handed back.
#[derive(thiserror::Error)]
pub enum SubmitError<T> {
    /// The waiting queue is at capacity.
    #[error("task queue is full")]
    Full(T),
    /// The queue no longer accepts tasks.
    #[error("task queue is closed")]
    Closed(T),
}

impl<T> SubmitError<T> {
    /// Recover the refused task.
    pub fn into_task(self) -> T {
        match self {
            Self::Full(task) | Self::Closed(task) => task,
        }
    }
}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

struct QueueState<T> {
    next_seq: u64,
    in_process: HashMap<u64, (String, AbortHandle)>,
    waiting: VecDeque<(T, OwnedSemaphorePermit)>,
    lifecycle: SchedulerState,
    summary: RunSummary,
}

struct QueueInner<T> {
    parallelism: usize,
    capacity: usize,
    started: Instant,
    slots: Arc<Semaphore>,
    state: Mutex<QueueState<T>>,
    on_complete: Mutex<Option<Callback>>,
    done: watch::Sender<Option<RunSummary>>,
}

/// Bounded push queue of tasks.
///
/// At most `parallelism` tasks run at once. Further submissions wait in a
/// FIFO queue of `capacity` slots; when a running task completes the oldest
/// waiting task starts. Once [`close`](Self::close)d and empty, the
/// completion callback fires exactly once.
pub struct ProcessTaskQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for ProcessTaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ProcessTaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ProcessTaskQueue")
            .field("parallelism", &self.inner.parallelism)
            .field("capacity", &self.inner.capacity)
            .field("in_process", &state.in_process.len())
            .field("waiting", &state.waiting.len())
            .field("state", &state.lifecycle)
            .finish()
    }
}

impl<T: ProcessTask> ProcessTaskQueue<T> {
    /// Create a queue. Both bounds are clamped to at least one.
    pub fn new(
        parallelism: usize,
        capacity: usize,
        on_complete: impl FnOnce(&RunSummary) + Send + 'static,
    ) -> Self {
        let parallelism = parallelism.max(1);
        let capacity = capacity.max(1);
        let (done, _) = watch::channel(None);
        info!(parallelism, capacity, "task queue started");
        Self {
            inner: Arc::new(QueueInner {
                parallelism,
                capacity,
                started: Instant::now(),
                slots: Arc::new(Semaphore::new(capacity)),
                state: Mutex::new(QueueState {
                    next_seq: 0,
                    in_process: HashMap::new(),
                    waiting: VecDeque::new(),
                    lifecycle: SchedulerState::Filling,
                    summary: RunSummary::default(),
                }),
                on_complete: Mutex::new(Some(Box::new(on_complete))),
                done,
            }),
        }
    }

    /// Submit a task, waiting for a free waiting slot when the queue is full.
    pub async fn submit(&self, task: T) -> Result<(), SubmitError<T>> {
        if self.is_closed() {
            return Err(SubmitError::Closed(task));
        }
        let Ok(permit) = Arc::clone(&self.inner.slots).acquire_owned().await else {
            return Err(SubmitError::Closed(task));
        };
        self.inner.enqueue(task, permit)
    }

    /// Submit a task without waiting.
    pub fn try_submit(&self, task: T) -> Result<(), SubmitError<T>> {
        if self.is_closed() {
            return Err(SubmitError::Closed(task));
        }
        match Arc::clone(&self.inner.slots).try_acquire_owned() {
            Ok(permit) => self.inner.enqueue(task, permit),
            Err(tokio::sync::TryAcquireError::NoPermits) => Err(SubmitError::Full(task)),
            Err(tokio::sync::TryAcquireError::Closed) => Err(SubmitError::Closed(task)),
        }
    }

    /// Stop accepting tasks. Queued and running tasks still finish.
    pub fn close(&self) {
        self.inner.slots.close();
        let fire = {
            let mut state = self.inner.state.lock();
            if matches!(state.lifecycle, SchedulerState::Filling | SchedulerState::Steady) {
                state.lifecycle = SchedulerState::Draining;
                debug!("task queue closed");
            }
            self.inner.take_summary_if_done(&mut state)
        };
        if let Some(summary) = fire {
            self.inner.fire(summary);
        }
    }

    /// Close the queue, discard waiting tasks and give running tasks
    /// `timeout` to finish before aborting them.
    pub async fn shutdown(&self, timeout: Duration) -> RunSummary {
        let discarded: Vec<T> = {
            let mut state = self.inner.state.lock();
            let discarded: Vec<T> = state.waiting.drain(..).map(|(task, _)| task).collect();
            state.summary.cancelled += discarded.len() as u64;
            discarded
        };
        if !discarded.is_empty() {
            warn!(discarded = discarded.len(), "discarding waiting tasks");
        }
        for task in discarded {
            task.complete();
        }
        self.close();

        if let Ok(summary) = tokio::time::timeout(timeout, self.wait()).await {
            return summary;
        }
        let handles: Vec<AbortHandle> = self
            .inner
            .state
            .lock()
            .in_process
            .values()
            .map(|(_, handle)| handle.clone())
            .collect();
        warn!(
            residual = handles.len(),
            timeout_secs = timeout.as_secs(),
            "drain timed out, cancelling residual tasks"
        );
        for handle in handles {
            handle.abort();
        }
        self.wait().await
    }

    /// Wait until the queue is closed and every task has finished.
    pub async fn wait(&self) -> RunSummary {
        let mut done = self.inner.done.subscribe();
        let summary = match done.wait_for(Option::is_some).await {
            Ok(summary) => *summary,
            Err(_) => None,
        };
        summary.unwrap_or_default()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }

    /// Number of running tasks.
    pub fn in_process(&self) -> usize {
        self.inner.state.lock().in_process.len()
    }

    /// Number of tasks waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.inner.state.lock().lifecycle
    }
}

impl<T: ProcessTask> QueueInner<T> {
    fn enqueue(self: &Arc<Self>, task: T, permit: OwnedSemaphorePermit) -> Result<(), SubmitError<T>> {
        let mut state = self.state.lock();
        if !matches!(state.lifecycle, SchedulerState::Filling | SchedulerState::Steady) {
            return Err(SubmitError::Closed(task));
        }
        state.summary.submitted += 1;
        if state.in_process.len() < self.parallelism {
            drop(permit);
            self.start(&mut state, task);
            if state.in_process.len() == self.parallelism {
                state.lifecycle = SchedulerState::Steady;
            }
        } else {
            debug!(task = task.id(), waiting = state.waiting.len() + 1, "task queued");
            state.waiting.push_back((task, permit));
        }
        Ok(())
    }

    fn start(self: &Arc<Self>, state: &mut QueueState<T>, task: T) {
        let seq = state.next_seq;
        state.next_seq += 1;
        let id = task.id().to_owned();
        debug!(task = %id, in_flight = state.in_process.len() + 1, "task started");

        let handle = tokio::spawn(task.execute());
        state.in_process.insert(seq, (id, handle.abort_handle()));

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let joined = handle.await;
            inner.finished(seq, joined);
        });
    }

    fn finished(self: &Arc<Self>, seq: u64, joined: Result<T, JoinError>) {
        let (id, outcome) = match joined {
            Ok(task) => {
                let id = task.id().to_owned();
                task.complete();
                (id, Ok(()))
            }
            Err(e) => (String::new(), Err(e)),
        };

        let fire = {
            let mut state = self.state.lock();
            let task_id = state
                .in_process
                .remove(&seq)
                .map(|(task_id, _)| task_id)
                .unwrap_or_default();
            match outcome {
                Ok(()) => {
                    debug!(task = %id, "task completed");
                    state.summary.completed += 1;
                }
                Err(e) if e.is_cancelled() => {
                    debug!(task = %task_id, "task cancelled");
                    state.summary.cancelled += 1;
                }
                Err(e) => {
                    error!(task = %task_id, error = %e, "task failed");
                    state.summary.failed += 1;
                }
            }
            if let Some((next, permit)) = state.waiting.pop_front() {
                drop(permit);
                self.start(&mut state, next);
            }
            self.take_summary_if_done(&mut state)
        };
        if let Some(summary) = fire {
            self.fire(summary);
        }
    }

    fn take_summary_if_done(&self, state: &mut QueueState<T>) -> Option<RunSummary> {
        let done = state.lifecycle == SchedulerState::Draining
            && state.in_process.is_empty()
            && state.waiting.is_empty();
        if !done {
            return None;
        }
        state.lifecycle = SchedulerState::Stopped;
        state.summary.elapsed = self.started.elapsed();
        Some(state.summary)
    }

    fn fire(&self, summary: RunSummary) {
        info!(%summary, "task queue finished");
        if let Some(on_complete) = self.on_complete.lock().take() {
            on_complete(&summary);
        }
        self.done.send_replace(Some(summary));
    }
}
