//! Bounded waits.
//!
//! StoryKit never retries; the only wait it performs is a single race of an
//! operation against a timer. The losing branch is dropped, not cancelled
//! cooperatively, so it must have no externally visible effect.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run an operation with a timeout.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> crate::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    match tokio::time::timeout(timeout, operation()).await {
        Ok(value) => Ok(value),
        Err(_) => {
            debug!(?timeout, "Bounded wait elapsed");
            Err(crate::StoryKitError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapses() {
        let result = with_timeout(Duration::from_millis(10), || async {
            sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(matches!(result, Err(crate::StoryKitError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_wins_race() {
        let result = with_timeout(Duration::from_secs(10), || async {
            sleep(Duration::from_millis(5)).await;
            42
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }
}
