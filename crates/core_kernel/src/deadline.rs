//! Deadlines for calls to external collaborators
//!
//! Every call to the inventory service and the payment gateway goes through
//! `with_deadline`. Expiry drops the in-flight future and surfaces as
//! `PortError::Timeout`, which callers treat as a retryable abort. Store
//! calls are not wrapped here; the database pool bounds them with its
//! acquire timeout and a server-side statement timeout.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::ports::PortError;

/// Default bound for one external call
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Runs `call` and fails with `PortError::Timeout` once `deadline` elapses
pub async fn with_deadline<T, F>(operation: &str, deadline: Duration, call: F) -> Result<T, PortError>
where
    F: Future<Output = Result<T, PortError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, deadline_ms = deadline.as_millis() as u64, "External call exceeded deadline");
            Err(PortError::Timeout {
                operation: operation.to_string(),
                duration_ms: deadline.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result = with_deadline("fast", Duration::from_millis(200), async { Ok::<_, PortError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result: Result<(), PortError> = with_deadline("slow", Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(PortError::Timeout { operation, duration_ms }) => {
                assert_eq!(operation, "slow");
                assert_eq!(duration_ms, 20);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inner_error_is_preserved() {
        let result: Result<(), PortError> =
            with_deadline("failing", Duration::from_millis(200), async { Err(PortError::connection("refused")) }).await;
        assert!(matches!(result, Err(PortError::Connection { .. })));
    }
}
