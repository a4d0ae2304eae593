//! Timeout enforcement.
//!
//! Every converter call gets a deadline. A timed-out call counts as a
//! dependency failure for the breaker and is retried like any transient error.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::convert::ConvertError;

/// Run `fut` with a deadline, mapping expiry to [`ConvertError::Timeout`].
pub async fn with_deadline<T, Fut>(deadline: Duration, fut: Fut) -> Result<T, ConvertError>
where
    Fut: Future<Output = Result<T, ConvertError>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ConvertError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let err = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, ConvertError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ConvertError::Timeout(d) if d == Duration::from_millis(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let value = with_deadline(Duration::from_millis(10), async { Ok::<_, ConvertError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
