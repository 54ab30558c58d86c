//! Pull-driven scheduler.

use std::future::Future;
use std::pin::pin;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::{RunSummary, SchedulerState};
use crate::task::ProcessTask;

enum Pull<T> {
    Task(T),
    Exhausted,
    Shutdown,
}

/// Runs tasks pulled from a stream with at most `parallelism` in flight.
///
/// The source is polled only when a slot is free, so a lazily produced
/// source (one listing page per task) is never read ahead of the workers.
#[derive(Debug)]
pub struct TaskProcessor {
    parallelism: usize,
    drain_timeout: Duration,
    state: Mutex<SchedulerState>,
}

impl TaskProcessor {
    /// Create a processor. `parallelism` is clamped to at least one.
    #[must_use]
    pub fn new(parallelism: usize, drain_timeout: Duration) -> Self {
        Self {
            parallelism: parallelism.max(1),
            drain_timeout,
            state: Mutex::new(SchedulerState::Filling),
        }
    }

    /// Maximum tasks in flight.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    fn transition(&self, next: SchedulerState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = %*state, to = %next, "scheduler state changed");
            *state = next;
        }
    }

    /// Run every task of `source`, then call `on_complete` once.
    pub async fn run<T, S, F>(&self, source: S, on_complete: F) -> RunSummary
    where
        T: ProcessTask,
        S: Stream<Item = T>,
        F: FnOnce(&RunSummary),
    {
        self.run_until(source, std::future::pending::<()>(), on_complete)
            .await
    }

    /// Run tasks from `source` until it is exhausted or `shutdown` resolves.
    ///
    /// On shutdown no further task is pulled. Tasks already running get
    /// `drain_timeout` to finish and are cancelled after that. `on_complete`
    /// is called exactly once, after the last task has finished or been
    /// cancelled.
    pub async fn run_until<T, S, Sh, F>(&self, source: S, shutdown: Sh, on_complete: F) -> RunSummary
    where
        T: ProcessTask,
        S: Stream<Item = T>,
        Sh: Future,
        F: FnOnce(&RunSummary),
    {
        let started = Instant::now();
        let mut source = pin!(source);
        let mut shutdown = pin!(shutdown);
        let mut running: JoinSet<T> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut exhausted = false;
        let mut stopping = false;

        self.transition(SchedulerState::Filling);
        info!(parallelism = self.parallelism, "scheduler started");

        while running.len() < self.parallelism {
            match pull(&mut source, &mut shutdown).await {
                Pull::Task(task) => spawn(&mut running, task, &mut summary),
                Pull::Exhausted => {
                    exhausted = true;
                    break;
                }
                Pull::Shutdown => {
                    stopping = true;
                    break;
                }
            }
        }

        if !stopping {
            self.transition(SchedulerState::Steady);
        }
        while !stopping {
            let joined = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    stopping = true;
                    continue;
                }
                joined = running.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            finish(joined, &mut summary);

            if !exhausted {
                match pull(&mut source, &mut shutdown).await {
                    Pull::Task(task) => spawn(&mut running, task, &mut summary),
                    Pull::Exhausted => exhausted = true,
                    Pull::Shutdown => stopping = true,
                }
            }
        }

        self.transition(SchedulerState::Draining);
        if stopping {
            warn!(residual = running.len(), "shutdown requested, no further tasks pulled");
        }
        if !running.is_empty() {
            let drained = tokio::time::timeout(self.drain_timeout, async {
                while let Some(joined) = running.join_next().await {
                    finish(joined, &mut summary);
                }
            })
            .await;
            if drained.is_err() {
                let residual = running.len();
                warn!(
                    residual,
                    timeout_secs = self.drain_timeout.as_secs(),
                    "drain timed out, cancelling residual tasks"
                );
                running.shutdown().await;
                summary.cancelled += residual as u64;
            }
        }

        summary.elapsed = started.elapsed();
        info!(%summary, "scheduler finished");
        on_complete(&summary);
        self.transition(SchedulerState::Stopped);
        summary
    }
}

async fn pull<T, S, Sh>(source: &mut S, shutdown: &mut Sh) -> Pull<T>
where
    S: Stream<Item = T> + Unpin,
    Sh: Future + Unpin,
{
    tokio::select! {
        biased;
        _ = shutdown => Pull::Shutdown,
        next = source.next() => next.map_or(Pull::Exhausted, Pull::Task),
    }
}

fn spawn<T: ProcessTask>(running: &mut JoinSet<T>, task: T, summary: &mut RunSummary) {
    debug!(task = task.id(), in_flight = running.len() + 1, "task submitted");
    running.spawn(task.execute());
    summary.submitted += 1;
}

fn finish<T: ProcessTask>(joined: Result<T, JoinError>, summary: &mut RunSummary) {
    match joined {
        Ok(task) => {
            debug!(task = task.id(), "task completed");
            task.complete();
            summary.completed += 1;
        }
        Err(e) if e.is_cancelled() => summary.cancelled += 1,
        Err(e) => {
            error!(error = %e, "task failed");
            summary.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;

    use super::*;
    use crate::scheduler::testing::{Tracker, TrackedTask};

    fn tasks(count: usize, delay: Duration, tracker: &Arc<Tracker>) -> Vec<TrackedTask> {
        (0..count).map(|seq| TrackedTask::new(seq, delay, tracker)).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_should_never_exceed_parallelism() {
        let tracker = Arc::new(Tracker::default());
        let processor = TaskProcessor::new(3, Duration::from_secs(15));
        let callbacks = AtomicUsize::new(0);

        let summary = processor
            .run(
                stream::iter(tasks(20, Duration::from_millis(10), &tracker)),
                |summary| {
                    callbacks.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(summary.completed, 20);
                },
            )
            .await;

        assert!(tracker.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 20);
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
        assert_eq!(summary.submitted, 20);
        assert_eq!(summary.completed, 20);
        assert_eq!(processor.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_should_pull_lazily() {
        let tracker = Arc::new(Tracker::default());
        let pulled = Arc::new(AtomicUsize::new(0));
        let source = {
            let pulled = Arc::clone(&pulled);
            let tracker = Arc::clone(&tracker);
            stream::iter(0..10).map(move |seq| {
                pulled.fetch_add(1, Ordering::SeqCst);
                TrackedTask::new(seq, Duration::from_millis(5), &tracker)
            })
        };

        let processor = TaskProcessor::new(2, Duration::from_secs(1));
        let summary = processor
            .run(source, |_| {
                // Every task was executed before the callback fires.
                assert_eq!(tracker.executed.load(Ordering::SeqCst), 10);
            })
            .await;

        assert_eq!(pulled.load(Ordering::SeqCst), 10);
        assert_eq!(summary.completed, 10);
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_should_complete_with_empty_source() {
        let processor = TaskProcessor::new(4, Duration::from_secs(1));
        let mut fired = 0;
        let summary = processor
            .run(stream::empty::<TrackedTask>(), |_| fired += 1)
            .await;
        assert_eq!(fired, 1);
        assert_eq!(summary, RunSummary { elapsed: summary.elapsed, ..RunSummary::default() });
    }

    #[tokio::test]
    async fn test_should_count_panicked_task_as_failed() {
        let tracker = Arc::new(Tracker::default());
        let mut source = tasks(3, Duration::from_millis(1), &tracker);
        source[1].panics = true;

        let processor = TaskProcessor::new(2, Duration::from_secs(1));
        let summary = processor.run(stream::iter(source), |_| {}).await;

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_cancel_stragglers_after_drain_timeout() {
        let tracker = Arc::new(Tracker::default());
        let processor = TaskProcessor::new(2, Duration::from_secs(15));

        let summary = processor
            .run_until(
                stream::iter(tasks(10, Duration::from_secs(3600), &tracker)),
                tokio::time::sleep(Duration::from_secs(1)),
                |_| {},
            )
            .await;

        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.cancelled, 2);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_let_running_tasks_finish_on_shutdown() {
        let tracker = Arc::new(Tracker::default());
        let processor = TaskProcessor::new(2, Duration::from_secs(15));

        let summary = processor
            .run_until(
                stream::iter(tasks(10, Duration::from_secs(5), &tracker)),
                tokio::time::sleep(Duration::from_secs(1)),
                |_| {},
            )
            .await;

        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.cancelled, 0);
    }
}
