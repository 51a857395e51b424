use crate::config::RetryPolicy;
use crate::utils::error::{AutoCallerError, Result};
use std::future::Future;
use tokio::time::sleep;

/// 單次嘗試的結果
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// 可重試的失敗（逾時、5xx 等）
    Retry(String),
    /// 不可重試，直接回傳
    Fatal(AutoCallerError),
}

/// 依重試策略執行 `op`，最多 `max_attempts` 次，每次失敗後以指數退避等待
///
/// 次數用完時回傳 `FetchError`，訊息包含最後一次失敗原因。
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, source_name: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_failure = String::new();

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(reason) => {
                last_failure = reason;
                if attempt < max_attempts {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        "⚠️ {} attempt {}/{} failed: {}, retrying in {:?}",
                        source_name,
                        attempt,
                        max_attempts,
                        last_failure,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    Err(AutoCallerError::fetch(
        source_name,
        format!("{} after {} attempts", last_failure, max_attempts),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            backoff_factor: 1.0,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_exhaustion_makes_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(3), "calls", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry("status 503".to_string()) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.kind(), "FetchError");
        assert!(err.to_string().contains("status 503 after 3 attempts"));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let result = with_retry(&fast_policy(4), "calls", |attempt| async move {
            if attempt < 3 {
                Attempt::Retry("timeout".to_string())
            } else {
                Attempt::Done(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(5), "calls", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Fatal(AutoCallerError::fetch("calls", "401 Unauthorized")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
