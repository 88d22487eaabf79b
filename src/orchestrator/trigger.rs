//! Run Trigger: submits the run and rides out "all devices busy".

use std::time::Duration;

use tracing::{info, warn};

use super::RunError;
use super::clock::Sleeper;
use crate::client::{CODE_BUSY, CODE_OK, LabApi};
use crate::config::PollingConfig;
use crate::model::RunRequest;
use crate::report::Reporter;

/// How long to keep retrying while the lab is fully occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyRetryPolicy {
    /// Retries after the initial request.
    pub max_retries: u32,
    /// Fixed delay before each retry.
    pub interval: Duration,
}

impl BusyRetryPolicy {
    pub fn from_config(polling: &PollingConfig) -> Self {
        Self {
            max_retries: polling.busy_retries,
            interval: Duration::from_secs(polling.busy_retry_interval_secs),
        }
    }
}

impl Default for BusyRetryPolicy {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

/// Sends a [`RunRequest`] and returns the id of the created task.
///
/// Code 200 creates the task. Code 500 means every device is taken: the
/// request is repeated after [`BusyRetryPolicy::interval`], at most
/// [`BusyRetryPolicy::max_retries`] times. Any other code fails at once.
/// Transport failures are not retried here.
pub struct RunTrigger<'a, A: ?Sized, S: ?Sized> {
    api: &'a A,
    sleeper: &'a S,
    reporter: &'a dyn Reporter,
    policy: BusyRetryPolicy,
}

impl<'a, A, S> RunTrigger<'a, A, S>
where
    A: LabApi + ?Sized,
    S: Sleeper + ?Sized,
{
    pub fn new(
        api: &'a A,
        sleeper: &'a S,
        reporter: &'a dyn Reporter,
        policy: BusyRetryPolicy,
    ) -> Self {
        Self {
            api,
            sleeper,
            reporter,
            policy,
        }
    }

    /// Triggers the run, retrying while the lab is busy.
    ///
    /// # Errors
    ///
    /// - [`RunError::LabBusy`] if the lab is still busy after every retry
    /// - [`RunError::Rejected`] for any other application code
    /// - [`RunError::Lab`] if a request fails
    pub async fn trigger(&self, request: &RunRequest) -> Result<String, RunError> {
        let mut response = self.api.trigger_run(request).await?;
        let mut retries = 0;

        while response.code == CODE_BUSY && retries < self.policy.max_retries {
            retries += 1;
            warn!(
                retry = retries,
                max_retries = self.policy.max_retries,
                wait_secs = self.policy.interval.as_secs(),
                "all devices are busy, retrying trigger"
            );
            self.reporter
                .on_lab_busy(retries, self.policy.max_retries)
                .await;

            self.sleeper.sleep(self.policy.interval).await;
            response = self.api.trigger_run(request).await?;
        }

        match response.code {
            CODE_OK => {
                let task_id = response.task_id.ok_or_else(|| RunError::Rejected {
                    code: CODE_OK,
                    payload: format!("no testTaskId in {}", response.body),
                })?;
                info!(task_id = %task_id, retries, "test task triggered");
                Ok(task_id)
            }
            CODE_BUSY => Err(RunError::LabBusy {
                attempts: retries + 1,
            }),
            code => Err(RunError::Rejected {
                code,
                payload: response.body.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RecordingSleeper;
    use crate::report::NullReporter;
    use crate::testing::{ScriptedLab, run_request, trigger_busy, trigger_code, trigger_ok};

    fn policy() -> BusyRetryPolicy {
        BusyRetryPolicy::default()
    }

    #[tokio::test]
    async fn test_trigger_succeeds_first_time() {
        let lab = ScriptedLab::new().with_triggers(vec![trigger_ok("task-1")]);
        let sleeper = RecordingSleeper::new();
        let trigger = RunTrigger::new(&lab, &sleeper, &NullReporter, policy());

        let task_id = trigger.trigger(&run_request()).await.unwrap();

        assert_eq!(task_id, "task-1");
        assert_eq!(lab.trigger_calls(), 1);
        assert!(sleeper.durations().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_retries_while_busy() {
        let lab = ScriptedLab::new().with_triggers(vec![
            trigger_busy(),
            trigger_busy(),
            trigger_ok("task-2"),
        ]);
        let sleeper = RecordingSleeper::new();
        let trigger = RunTrigger::new(&lab, &sleeper, &NullReporter, policy());

        let task_id = trigger.trigger(&run_request()).await.unwrap();

        assert_eq!(task_id, "task-2");
        assert_eq!(lab.trigger_calls(), 3);
        assert_eq!(sleeper.secs(), vec![30, 30]);
    }

    #[tokio::test]
    async fn test_trigger_gives_up_after_twenty_retries() {
        let lab = ScriptedLab::new().with_triggers((0..30).map(|_| trigger_busy()).collect());
        let sleeper = RecordingSleeper::new();
        let trigger = RunTrigger::new(&lab, &sleeper, &NullReporter, policy());

        let err = trigger.trigger(&run_request()).await.unwrap_err();

        assert!(matches!(err, RunError::LabBusy { attempts: 21 }));
        assert_eq!(err.kind(), "lab_busy");
        assert_eq!(lab.trigger_calls(), 21);
        assert_eq!(sleeper.secs(), vec![30; 20]);
        assert_eq!(sleeper.total(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_trigger_does_not_retry_other_codes() {
        let lab = ScriptedLab::new().with_triggers(vec![trigger_code(401), trigger_ok("never")]);
        let sleeper = RecordingSleeper::new();
        let trigger = RunTrigger::new(&lab, &sleeper, &NullReporter, policy());

        let err = trigger.trigger(&run_request()).await.unwrap_err();

        assert!(matches!(err, RunError::Rejected { code: 401, .. }));
        assert_eq!(lab.trigger_calls(), 1);
        assert!(sleeper.durations().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_busy_then_rejected() {
        let lab = ScriptedLab::new().with_triggers(vec![trigger_busy(), trigger_code(400)]);
        let sleeper = RecordingSleeper::new();
        let trigger = RunTrigger::new(&lab, &sleeper, &NullReporter, policy());

        let err = trigger.trigger(&run_request()).await.unwrap_err();

        assert!(matches!(err, RunError::Rejected { code: 400, .. }));
        assert_eq!(sleeper.secs(), vec![30]);
    }

    #[tokio::test]
    async fn test_trigger_ok_without_task_id_is_rejected() {
        let mut response = trigger_ok("ignored");
        response.task_id = None;
        let lab = ScriptedLab::new().with_triggers(vec![response]);
        let sleeper = RecordingSleeper::new();
        let trigger = RunTrigger::new(&lab, &sleeper, &NullReporter, policy());

        let err = trigger.trigger(&run_request()).await.unwrap_err();
        assert!(matches!(err, RunError::Rejected { code: 200, .. }));
    }

    #[tokio::test]
    async fn test_custom_policy() {
        let lab = ScriptedLab::new().with_triggers(vec![trigger_busy(), trigger_busy()]);
        let sleeper = RecordingSleeper::new();
        let policy = BusyRetryPolicy {
            max_retries: 1,
            interval: Duration::from_secs(5),
        };
        let trigger = RunTrigger::new(&lab, &sleeper, &NullReporter, policy);

        let err = trigger.trigger(&run_request()).await.unwrap_err();

        assert!(matches!(err, RunError::LabBusy { attempts: 2 }));
        assert_eq!(sleeper.secs(), vec![5]);
    }
}
