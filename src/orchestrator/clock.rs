//! Injectable sleeping for the retry and poll loops.
//!
//! Every wait in a run goes through a [`Sleeper`]. Production code uses
//! [`TokioSleeper`]; tests use [`RecordingSleeper`], which returns at once
//! and remembers what was requested, so whole runs replay in milliseconds.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Something that can wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Waits on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested duration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use labrun::orchestrator::{RecordingSleeper, Sleeper};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let sleeper = RecordingSleeper::new();
/// sleeper.sleep(Duration::from_secs(30)).await;
/// sleeper.sleep(Duration::from_secs(15)).await;
/// assert_eq!(sleeper.secs(), vec![30, 15]);
/// assert_eq!(sleeper.total(), Duration::from_secs(45));
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested duration, in order.
    pub fn durations(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Every requested duration in whole seconds, in order.
    pub fn secs(&self) -> Vec<u64> {
        self.durations().iter().map(Duration::as_secs).collect()
    }

    pub fn total(&self) -> Duration {
        self.durations().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}
