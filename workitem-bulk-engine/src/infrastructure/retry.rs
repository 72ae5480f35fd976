//! 重试执行器（指数退避策略）
//!
//! 失败时按 `WorkItemError::is_retryable` 分类：临时性错误按
//! `min(max_delay, initial * multiplier^(attempt-1))` 退避后重试；
//! 致命错误或尝试次数耗尽时原样返回最初的错误，绝不包装或吞掉
//! 根因。

use std::future::Future;
use std::time::Duration;

use workitem_core::config::RetryConfig;
use workitem_core::error::{Result, WorkItemError};

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始延迟（毫秒）
    pub initial_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 退避倍数
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 从配置创建重试策略
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// 计算第 `attempt` 次失败后的重试延迟（attempt 从 1 开始）
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// 带分类重试的执行函数
///
/// - 可重试错误（网络 / 超时 / 429 / 5xx / 可刷新令牌）：指数退避后重试
/// - 致命错误（认证失败 / 权限不足 / 参数校验 / 不存在）：首次失败立即返回
/// - 最多调用 `operation` `max_attempts` 次
pub async fn execute_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_retryable() {
                    tracing::debug!(
                        operation = %operation_name,
                        error = %error,
                        "Operation failed with non-retryable error"
                    );
                    return Err(error);
                }
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        operation = %operation_name,
                        attempts = attempt,
                        error = %error,
                        "Max retries exceeded"
                    );
                    return Err(error);
                }

                let delay = policy.calculate_delay(attempt);
                tracing::debug!(
                    operation = %operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 400,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_schedule_is_capped() {
        let policy = fast_policy(5);
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        // 超过 max_delay_ms 后封顶
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(10), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = execute_with_retry(&fast_policy(5), "test-op", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WorkItemError::from_status(503, "unavailable"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded_and_original_error_kept() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = execute_with_retry(&fast_policy(3), "test-op", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(WorkItemError::from_status(429, "throttled"))
            }
        })
        .await;

        // 最多 max_attempts 次调用，错误原样透出（类型和状态码不变）
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            WorkItemError::TransientBackend { status, .. } => assert_eq!(status, 429),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_error_fails_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = execute_with_retry(&fast_policy(5), "test-op", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(WorkItemError::FatalAuth {
                    message: "not signed in".into(),
                })
            }
        })
        .await;

        // 致命认证错误绝不重试，重试只会浪费限流预算
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            WorkItemError::FatalAuth { .. }
        ));
    }

    #[tokio::test]
    async fn test_refreshable_token_expiry_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let policy = RetryPolicy {
            initial_delay_ms: 1,
            ..fast_policy(2)
        };
        let result = execute_with_retry(&policy, "test-op", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(WorkItemError::AuthTokenExpired)
                } else {
                    Ok("refreshed")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "refreshed");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
