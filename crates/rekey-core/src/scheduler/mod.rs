//! Bounded task scheduling.
//!
//! Two interchangeable schedulers run [`ProcessTask`](crate::task::ProcessTask)s
//! with at most `parallelism` of them in flight:
//!
//! - [`TaskProcessor`] pulls from a task stream, taking one more task each
//!   time a running one completes.
//! - [`ProcessTaskQueue`] accepts pushed tasks, parking the overflow in a
//!   bounded FIFO waiting queue.
//!
//! Both deliver a [`RunSummary`] to a completion callback exactly once.

mod iterating;
mod queue;

use std::fmt;
use std::time::Duration;

pub use iterating::TaskProcessor;
pub use queue::{ProcessTaskQueue, SubmitError};

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Pulling the initial batch.
    Filling,
    /// Pulling one task per completion.
    Steady,
    /// No new work accepted; waiting for residual tasks.
    Draining,
    /// Completion callback delivered.
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Filling => "filling",
            Self::Steady => "steady",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// Totals of one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks handed to the worker pool.
    pub submitted: u64,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub failed: u64,
    /// Tasks cancelled or discarded during shutdown.
    pub cancelled: u64,
    /// Wall time from start to completion.
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted={} completed={} failed={} cancelled={} elapsed={:.3}s",
            self.submitted,
            self.completed,
            self.failed,
            self.cancelled,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Instrumented tasks shared by the scheduler tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::task::ProcessTask;

    #[derive(Debug, Default)]
    pub(crate) struct Tracker {
        pub active: AtomicUsize,
        pub peak: AtomicUsize,
        pub executed: AtomicUsize,
        pub completed: AtomicUsize,
        pub started: Mutex<Vec<usize>>,
    }

    #[derive(Debug)]
    pub(crate) struct TrackedTask {
        pub id: String,
        pub seq: usize,
        pub delay: Duration,
        pub panics: bool,
        pub tracker: Arc<Tracker>,
    }

    impl TrackedTask {
        pub(crate) fn new(seq: usize, delay: Duration, tracker: &Arc<Tracker>) -> Self {
            Self {
                id: format!("task-{seq}"),
                seq,
                delay,
                panics: false,
                tracker: Arc::clone(tracker),
            }
        }
    }

    #[async_trait]
    impl ProcessTask for TrackedTask {
        async fn execute(self) -> Self {
            let active = self.tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.tracker.peak.fetch_max(active, Ordering::SeqCst);
            self.tracker.started.lock().push(self.seq);
            tokio::time::sleep(self.delay).await;
            self.tracker.active.fetch_sub(1, Ordering::SeqCst);
            self.tracker.executed.fetch_add(1, Ordering::SeqCst);
            assert!(!self.panics, "task {} panicked", self.id);
            self
        }

        fn complete(self) {
            self.tracker.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn id(&self) -> &str {
            &self.id
        }
    }
}
