//! Retry policy for lifecycle commands.

use std::future::Future;
use std::time::Duration;

use devvm_host::HostError;
use tracing::warn;

/// Attempts and spacing for one command.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const START: RetryPolicy = RetryPolicy {
        attempts: 5,
        delay: Duration::from_secs(2),
    };

    pub const STOP: RetryPolicy = RetryPolicy {
        attempts: 5,
        delay: Duration::from_secs(1),
    };

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, HostError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HostError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.attempts => {
                    warn!(attempt, error = %e, "Retrying after temporary error");
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
