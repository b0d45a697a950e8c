//! Async retry utilities with the named backoff schedule (§4.11, §9).

use std::time::Duration;

/// Default maximum retry attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Named backoff schedule in seconds (§4.11 "Retry policy"). The delay after
/// the Nth failure is `BACKOFF_SCHEDULE_SECS[N - 1]`, clamped to the last
/// entry once attempts run past the table's length.
pub const BACKOFF_SCHEDULE_SECS: &[f64] = &[0.5, 1.0, 1.5, 2.5, 4.0, 6.5, 10.5, 17.0, 27.5, 34.5];

fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).saturating_sub(1).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    Duration::from_secs_f64(BACKOFF_SCHEDULE_SECS[idx])
}

/// Retry a synchronous operation using the named backoff schedule.
/// `is_retryable` classifies a failure (SPEC_FULL.md's "retryable-exception
/// set") — a `false` result fails fast on the first attempt instead of
/// burning through the backoff schedule on a permanent error.
///
/// Returns `Ok(attempts)` on success, or `Err((error, attempts))` on failure.
pub async fn retry_with_backoff<F, E>(
    max_attempts: u32,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<u32, (E, u32)>
where
    F: FnMut() -> Result<(), E>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation() {
            Ok(()) => return Ok(attempts),
            Err(e) => {
                if attempts >= max_attempts || !is_retryable(&e) {
                    return Err((e, attempts));
                }
                let delay = backoff_delay(attempts);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_secs = delay.as_secs_f64(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry an async operation using the named backoff schedule, returning
/// whatever the operation produces. See `retry_with_backoff` for
/// `is_retryable`.
///
/// Returns `Ok((value, attempts))` on success, or `Err((error, attempts))` on
/// failure.
pub async fn retry_with_backoff_async<F, Fut, T, E>(
    max_attempts: u32,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => {
                if attempts >= max_attempts || !is_retryable(&e) {
                    return Err((e, attempts));
                }
                let delay = backoff_delay(attempts);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_secs = delay.as_secs_f64(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_backoff_schedule_clamps_past_table_end() {
        assert_eq!(backoff_delay(1), Duration::from_secs_f64(0.5));
        assert_eq!(backoff_delay(10), Duration::from_secs_f64(34.5));
        assert_eq!(backoff_delay(25), Duration::from_secs_f64(34.5));
    }

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result = retry_with_backoff(3, |_| true, || Ok::<(), &str>(())).await;
        assert_eq!(result, Ok(1));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let attempts = RefCell::new(0);
        let result = retry_with_backoff(3, |_| true, || {
            *attempts.borrow_mut() += 1;
            if *attempts.borrow() < 2 {
                Err("transient error")
            } else {
                Ok(())
            }
        })
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_failure_after_max_retries() {
        let result = retry_with_backoff(3, |_| true, || Err::<(), _>("persistent error")).await;
        assert!(result.is_err());
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "persistent error");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_fast_without_retry() {
        let attempts = RefCell::new(0);
        let result = retry_with_backoff(
            3,
            |_: &&str| false,
            || {
                *attempts.borrow_mut() += 1;
                Err::<(), _>("permanent error")
            },
        )
        .await;
        assert_eq!(result, Err(("permanent error", 1)));
        assert_eq!(*attempts.borrow(), 1);
    }

    #[tokio::test]
    async fn test_async_retry_returns_value_and_attempts_on_success() {
        let attempts = RefCell::new(0);
        let result = retry_with_backoff_async(3, |_: &&str| true, || {
            *attempts.borrow_mut() += 1;
            async move {
                if *attempts.borrow() < 2 {
                    Err("transient error")
                } else {
                    Ok("payload")
                }
            }
        })
        .await;
        assert_eq!(result, Ok(("payload", 2)));
    }

    #[tokio::test]
    async fn test_async_retry_fails_fast_on_permanent_error() {
        let attempts = RefCell::new(0);
        let result = retry_with_backoff_async(3, |_: &&str| false, || {
            *attempts.borrow_mut() += 1;
            async move { Err::<(), _>("permanent error") }
        })
        .await;
        assert_eq!(result, Err(("permanent error", 1)));
        assert_eq!(*attempts.borrow(), 1);
    }
}
