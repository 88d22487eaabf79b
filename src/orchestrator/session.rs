//! Per-invocation build outcome.

use tracing::info;

use crate::report::Reporter;

/// Overall outcome of the CI step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Nothing has been decided yet.
    Pending,
    Succeeded,
    /// Sticky: once failed, the session never reports success.
    Failed,
}

/// State carried through one run: the sticky failure flag and the reporter
/// that announces outcome changes.
pub struct RunSession<'a> {
    reporter: &'a dyn Reporter,
    outcome: BuildOutcome,
}

impl<'a> RunSession<'a> {
    pub fn new(reporter: &'a dyn Reporter) -> Self {
        Self {
            reporter,
            outcome: BuildOutcome::Pending,
        }
    }

    /// The reporter outcome changes are announced to.
    pub fn reporter(&self) -> &'a dyn Reporter {
        self.reporter
    }

    pub fn outcome(&self) -> BuildOutcome {
        self.outcome
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == BuildOutcome::Failed
    }

    /// Marks the build failed. Announced only the first time.
    ///
    /// Returns `true` if this call changed the outcome.
    pub async fn mark_failed(&mut self) -> bool {
        if self.is_failed() {
            return false;
        }
        info!("marking build as failed");
        self.outcome = BuildOutcome::Failed;
        self.reporter.on_build_outcome(BuildOutcome::Failed).await;
        true
    }

    /// Marks the build successful unless it already failed.
    ///
    /// Returns `true` if this call changed the outcome.
    pub async fn mark_succeeded(&mut self) -> bool {
        if self.outcome != BuildOutcome::Pending {
            return false;
        }
        self.outcome = BuildOutcome::Succeeded;
        self.reporter.on_build_outcome(BuildOutcome::Succeeded).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingReporter;

    #[tokio::test]
    async fn test_failure_is_announced_once() {
        let reporter = RecordingReporter::default();
        let mut session = RunSession::new(&reporter);

        assert!(session.mark_failed().await);
        assert!(!session.mark_failed().await);

        assert_eq!(session.outcome(), BuildOutcome::Failed);
        assert_eq!(reporter.outcomes(), vec![BuildOutcome::Failed]);
    }

    #[tokio::test]
    async fn test_failure_is_never_downgraded() {
        let reporter = RecordingReporter::default();
        let mut session = RunSession::new(&reporter);

        session.mark_failed().await;
        assert!(!session.mark_succeeded().await);

        assert!(session.is_failed());
        assert_eq!(reporter.outcomes(), vec![BuildOutcome::Failed]);
    }

    #[tokio::test]
    async fn test_success_then_failure() {
        let reporter = RecordingReporter::default();
        let mut session = RunSession::new(&reporter);

        assert!(session.mark_succeeded().await);
        assert!(!session.mark_succeeded().await);
        assert!(session.mark_failed().await);

        assert_eq!(
            reporter.outcomes(),
            vec![BuildOutcome::Succeeded, BuildOutcome::Failed]
        );
    }
}
