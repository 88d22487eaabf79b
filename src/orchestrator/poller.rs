//! Status Poller: waits for a task to reach a terminal state.
//!
//! # State Machine
//!
//! ```text
//!             ┌──────────────── sleep waiting_interval (not budgeted) ─┐
//!             ▼                                                         │
//!   ┌──► poll status ──► WAITING ───────────────────────────────────────┘
//!   │         │
//!   │         ├────────► RUNNING / unknown ── sleep adaptive delay ──► elapsed += delay
//!   │         │                                                          │
//!   │         ├────────► FINISHED  ──► Ok(task)                          │
//!   │         ├────────► CANCELED  ──► Err(Canceled)                     │
//!   │         └────────► ERROR     ──► Err(TaskError)                    │
//!   │                                                                    ▼
//!   └────────────────────────────────────────── elapsed <= budget ? ─── no ──► Err(TimedOut)
//! ```
//!
//! A change in the server's retry counter resets both the elapsed budget and
//! the adaptive delay: the lab restarted the task, so earlier waiting no
//! longer counts.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::RunError;
use super::clock::Sleeper;
use crate::client::LabApi;
use crate::config::PollingConfig;
use crate::model::{TaskStatus, TestTask};
use crate::report::Reporter;

/// Shrinking poll interval: starts at a third of the budget, halves after
/// every use, never drops below the floor.
///
/// This is an observation schedule, not error backoff: it waits longest
/// while results are least likely and polls faster near the deadline.
///
/// # Example
///
/// ```
/// use labrun::orchestrator::AdaptiveDelay;
///
/// let delays: Vec<u64> = AdaptiveDelay::new(300, 15).take(6).collect();
/// assert_eq!(delays, vec![100, 50, 25, 15, 15, 15]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveDelay {
    budget_secs: u64,
    floor_secs: u64,
    current_secs: u64,
}

impl AdaptiveDelay {
    pub fn new(budget_secs: u64, floor_secs: u64) -> Self {
        Self {
            budget_secs,
            floor_secs,
            current_secs: budget_secs / 3,
        }
    }

    /// The delay the next call to [`advance`](Self::advance) will return.
    pub fn current_secs(&self) -> u64 {
        self.current_secs
    }

    /// Returns the current delay and halves it for next time.
    pub fn advance(&mut self) -> u64 {
        let delay = self.current_secs;
        self.current_secs = (delay / 2).max(self.floor_secs);
        delay
    }

    /// Back to `budget / 3`.
    pub fn reset(&mut self) {
        self.current_secs = self.budget_secs / 3;
    }
}

impl Iterator for AdaptiveDelay {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        Some(self.advance())
    }
}

/// Timing parameters of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Budget in seconds of adaptive sleep while the task runs.
    pub timeout_secs: u64,
    pub waiting_interval: Duration,
    pub min_interval_secs: u64,
    /// Retries of a status request that failed at the transport level.
    pub status_retries: u32,
    pub status_retry_interval: Duration,
}

impl PollSchedule {
    pub fn new(timeout_secs: u64, polling: &PollingConfig) -> Self {
        Self {
            timeout_secs,
            waiting_interval: Duration::from_secs(polling.waiting_interval_secs),
            min_interval_secs: polling.min_poll_interval_secs,
            status_retries: polling.status_retries,
            status_retry_interval: Duration::from_secs(polling.status_retry_interval_secs),
        }
    }
}

/// Accounting of one wait, exposed for tests and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    /// Adaptive sleep accumulated since the last restart of the task.
    pub elapsed_secs: u64,
    /// Time spent sleeping while the task was queued. Never budgeted.
    pub queued_secs: u64,
    pub polls: u32,
    pub last_retry_count: u32,
    pub delay: AdaptiveDelay,
}

impl PollState {
    fn new(schedule: &PollSchedule) -> Self {
        Self {
            elapsed_secs: 0,
            queued_secs: 0,
            polls: 0,
            last_retry_count: 0,
            delay: AdaptiveDelay::new(schedule.timeout_secs, schedule.min_interval_secs),
        }
    }
}

/// Polls a task until it finishes, fails, or the budget runs out.
pub struct StatusPoller<'a, A: ?Sized, S: ?Sized> {
    api: &'a A,
    sleeper: &'a S,
    reporter: &'a dyn Reporter,
    schedule: PollSchedule,
}

impl<'a, A, S> StatusPoller<'a, A, S>
where
    A: LabApi + ?Sized,
    S: Sleeper + ?Sized,
{
    pub fn new(
        api: &'a A,
        sleeper: &'a S,
        reporter: &'a dyn Reporter,
        schedule: PollSchedule,
    ) -> Self {
        Self {
            api,
            sleeper,
            reporter,
            schedule,
        }
    }

    /// Waits for `task_id` to finish and returns the final snapshot.
    ///
    /// # Errors
    ///
    /// - [`RunError::Canceled`] / [`RunError::TaskError`] on those terminal states
    /// - [`RunError::TimedOut`] when the budget is used up before `finished`
    /// - [`RunError::Lab`] when a status request fails
    pub async fn wait_for_completion(&self, task_id: &str) -> Result<TestTask, RunError> {
        let mut state = PollState::new(&self.schedule);

        loop {
            debug!(
                task_id = %task_id,
                elapsed_secs = state.elapsed_secs,
                "getting test status"
            );
            let task = self.fetch_status(task_id).await?;
            state.polls += 1;
            self.reporter.on_task_polled(&task, state.elapsed_secs).await;

            if task.retry_count != state.last_retry_count {
                state.last_retry_count = task.retry_count;
                state.elapsed_secs = 0;
                state.delay.reset();
                info!(
                    retry_count = task.retry_count,
                    "lab restarted the task, wait budget reset"
                );
                self.reporter.on_task_restarted(task.retry_count).await;
            }

            match task.status {
                TaskStatus::Waiting => {
                    debug!(
                        message = task.message.as_deref().unwrap_or(""),
                        wait_secs = self.schedule.waiting_interval.as_secs(),
                        "task is queued"
                    );
                    self.sleeper.sleep(self.schedule.waiting_interval).await;
                    state.queued_secs += self.schedule.waiting_interval.as_secs();
                }
                TaskStatus::Finished => {
                    info!(
                        task_id = %task.id,
                        polls = state.polls,
                        elapsed_secs = state.elapsed_secs,
                        queued_secs = state.queued_secs,
                        "test task finished"
                    );
                    return Ok(task);
                }
                TaskStatus::Canceled => {
                    return Err(RunError::Canceled {
                        task: Box::new(task),
                    });
                }
                TaskStatus::Error => {
                    return Err(RunError::TaskError {
                        task: Box::new(task),
                    });
                }
                TaskStatus::Running | TaskStatus::Unknown => {
                    let delay = state.delay.advance();
                    debug!(
                        status = %task.status,
                        devices = task.total_device_count,
                        wait_secs = delay,
                        "task is running"
                    );
                    self.sleeper.sleep(Duration::from_secs(delay)).await;
                    state.elapsed_secs += delay;
                }
            }

            if state.elapsed_secs > self.schedule.timeout_secs {
                warn!(
                    task_id = %task_id,
                    timeout_secs = self.schedule.timeout_secs,
                    "timed out waiting for the test task"
                );
                return Err(RunError::TimedOut {
                    timeout_secs: self.schedule.timeout_secs,
                    task: Box::new(task),
                });
            }
        }
    }

    /// One status request, retried only on transport failures.
    async fn fetch_status(&self, task_id: &str) -> Result<TestTask, RunError> {
        let mut retries = 0;
        loop {
            match self.api.task_status(task_id).await {
                Ok(task) => return Ok(task),
                Err(e) if e.is_transport() && retries < self.schedule.status_retries => {
                    retries += 1;
                    warn!(
                        error = %e,
                        retry = retries,
                        max_retries = self.schedule.status_retries,
                        "status request failed, retrying"
                    );
                    self.sleeper.sleep(self.schedule.status_retry_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RecordingSleeper;
    use crate::report::NullReporter;
    use crate::testing::{RecordingReporter, ScriptedLab, snapshot, transport_error};

    fn schedule(timeout_secs: u64) -> PollSchedule {
        PollSchedule::new(timeout_secs, &PollingConfig::default())
    }

    #[test]
    fn test_adaptive_delay_halves_to_floor() {
        let delays: Vec<u64> = AdaptiveDelay::new(300, 15).take(7).collect();
        assert_eq!(delays, vec![100, 50, 25, 15, 15, 15, 15]);
    }

    #[test]
    fn test_adaptive_delay_never_below_floor_after_first() {
        for budget in [0, 10, 44, 45, 90, 1000, 3600] {
            let delays: Vec<u64> = AdaptiveDelay::new(budget, 15).take(20).collect();
            assert_eq!(delays[0], budget / 3);
            assert!(delays[1..].iter().all(|d| *d >= 15));
            assert!(delays.windows(2).skip(1).all(|w| w[1] <= w[0]));
        }
    }

    #[test]
    fn test_adaptive_delay_reset() {
        let mut delay = AdaptiveDelay::new(300, 15);
        delay.advance();
        delay.advance();
        assert_eq!(delay.current_secs(), 25);
        delay.reset();
        assert_eq!(delay.current_secs(), 100);
    }

    #[tokio::test]
    async fn test_waiting_running_finished() {
        let lab = ScriptedLab::new().with_statuses(vec![
            Ok(snapshot(TaskStatus::Waiting, 0)),
            Ok(snapshot(TaskStatus::Running, 0)),
            Ok(snapshot(TaskStatus::Running, 0)),
            Ok(snapshot(TaskStatus::Finished, 0)),
        ]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(90));

        let task = poller.wait_for_completion("task-1").await.unwrap();

        assert_eq!(task.status, TaskStatus::Finished);
        // 30 queued (not budgeted), then 90/3 = 30, then max(15, 15) = 15
        assert_eq!(sleeper.secs(), vec![30, 30, 15]);
        assert!(sleeper.total() <= Duration::from_secs(90 + 30));
        assert_eq!(lab.status_calls(), 4);
    }

    #[tokio::test]
    async fn test_waiting_does_not_consume_budget() {
        let mut statuses: Vec<_> = (0..50)
            .map(|_| Ok(snapshot(TaskStatus::Waiting, 0)))
            .collect();
        statuses.push(Ok(snapshot(TaskStatus::Finished, 0)));
        let lab = ScriptedLab::new().with_statuses(statuses);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(60));

        let task = poller.wait_for_completion("task-1").await.unwrap();

        assert_eq!(task.status, TaskStatus::Finished);
        assert_eq!(sleeper.secs(), vec![30; 50]);
    }

    #[tokio::test]
    async fn test_times_out_while_running() {
        let lab = ScriptedLab::new()
            .with_statuses((0..20).map(|_| Ok(snapshot(TaskStatus::Running, 0))).collect());
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        let err = poller.wait_for_completion("task-1").await.unwrap_err();

        match &err {
            RunError::TimedOut { timeout_secs, task } => {
                assert_eq!(*timeout_secs, 300);
                assert_eq!(task.status, TaskStatus::Running);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(err.kind(), "timed_out");
        // 100 + 50 + 25 + 15 * 9 = 310 > 300
        assert_eq!(
            sleeper.secs(),
            vec![100, 50, 25, 15, 15, 15, 15, 15, 15, 15, 15, 15]
        );
        assert_eq!(lab.status_calls(), 12);
    }

    #[tokio::test]
    async fn test_canceled_is_terminal_failure() {
        let lab = ScriptedLab::new().with_statuses(vec![
            Ok(snapshot(TaskStatus::Running, 0)),
            Ok(snapshot(TaskStatus::Canceled, 0)),
            Ok(snapshot(TaskStatus::Finished, 0)),
        ]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        let err = poller.wait_for_completion("task-1").await.unwrap_err();

        assert!(matches!(err, RunError::Canceled { .. }));
        assert_eq!(err.kind(), "canceled");
        assert_eq!(lab.status_calls(), 2);
    }

    #[tokio::test]
    async fn test_error_is_terminal_failure() {
        let lab = ScriptedLab::new().with_statuses(vec![Ok(snapshot(TaskStatus::Error, 0))]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        let err = poller.wait_for_completion("task-1").await.unwrap_err();

        assert!(matches!(err, RunError::TaskError { .. }));
        assert!(err.task().is_some());
        assert!(sleeper.durations().is_empty());
    }

    #[tokio::test]
    async fn test_retry_count_change_resets_budget_and_delay() {
        let reporter = RecordingReporter::default();
        let lab = ScriptedLab::new().with_statuses(vec![
            Ok(snapshot(TaskStatus::Running, 0)),
            Ok(snapshot(TaskStatus::Running, 0)),
            Ok(snapshot(TaskStatus::Running, 0)),
            Ok(snapshot(TaskStatus::Running, 1)),
            Ok(snapshot(TaskStatus::Running, 1)),
            Ok(snapshot(TaskStatus::Finished, 1)),
        ]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &reporter, schedule(300));

        poller.wait_for_completion("task-1").await.unwrap();

        assert_eq!(sleeper.secs(), vec![100, 50, 25, 100, 50]);
        assert_eq!(reporter.restarts(), vec![1]);
    }

    #[tokio::test]
    async fn test_restart_extends_deadline() {
        // Without the restart this would time out after 100 + 50 + 25 + 15 * 9.
        let mut statuses: Vec<_> = (0..10)
            .map(|_| Ok(snapshot(TaskStatus::Running, 0)))
            .collect();
        statuses.extend((0..5).map(|_| Ok(snapshot(TaskStatus::Running, 1))));
        statuses.push(Ok(snapshot(TaskStatus::Finished, 1)));
        let lab = ScriptedLab::new().with_statuses(statuses);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        let task = poller.wait_for_completion("task-1").await.unwrap();
        assert_eq!(task.retry_count, 1);
        assert_eq!(lab.status_calls(), 16);
    }

    #[tokio::test]
    async fn test_unknown_status_is_polled_like_running() {
        let lab = ScriptedLab::new().with_statuses(vec![
            Ok(snapshot(TaskStatus::Unknown, 0)),
            Ok(snapshot(TaskStatus::Finished, 0)),
        ]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        poller.wait_for_completion("task-1").await.unwrap();
        assert_eq!(sleeper.secs(), vec![100]);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried_outside_budget() {
        let lab = ScriptedLab::new().with_statuses(vec![
            Ok(snapshot(TaskStatus::Running, 0)),
            Err(transport_error()),
            Ok(snapshot(TaskStatus::Running, 0)),
            Ok(snapshot(TaskStatus::Finished, 0)),
        ]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        poller.wait_for_completion("task-1").await.unwrap();

        // 5s status retry does not advance the adaptive delay.
        assert_eq!(sleeper.secs(), vec![100, 5, 50]);
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_retries() {
        let lab = ScriptedLab::new().with_statuses(vec![
            Err(transport_error()),
            Err(transport_error()),
            Err(transport_error()),
            Ok(snapshot(TaskStatus::Finished, 0)),
        ]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        let err = poller.wait_for_completion("task-1").await.unwrap_err();

        assert_eq!(err.kind(), "transport");
        assert_eq!(lab.status_calls(), 3);
        assert_eq!(sleeper.secs(), vec![5, 5]);
    }

    #[tokio::test]
    async fn test_malformed_status_aborts_without_retry() {
        let lab = ScriptedLab::new().with_statuses(vec![
            Err(crate::client::LabError::Malformed {
                operation: "get task status",
                message: "expected value".to_string(),
            }),
            Ok(snapshot(TaskStatus::Finished, 0)),
        ]);
        let sleeper = RecordingSleeper::new();
        let poller = StatusPoller::new(&lab, &sleeper, &NullReporter, schedule(300));

        let err = poller.wait_for_completion("task-1").await.unwrap_err();

        assert!(matches!(err, RunError::Lab(_)));
        assert_eq!(lab.status_calls(), 1);
        assert!(sleeper.durations().is_empty());
    }
}
