//! Bounded retry for transient device errors.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Defines a policy for retrying an operation.
///
/// # Example
///
/// ```rust
/// use stackline_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     backoff_delay: Duration::from_millis(20),
/// };
/// assert_eq!(policy.max_attempts, 5);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,

    /// Constant delay between attempts.
    #[serde(with = "duration_millis")]
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, 10ms apart.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        }
    }
}

/// The last error of a retried operation and how many attempts were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    /// Error from the final attempt.
    pub error: E,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts.
///
/// `op` receives the 1-based attempt number. Transient errors are followed by
/// `policy.backoff_delay`; the final error is returned unchanged together
/// with the attempt count. On success the attempt count is returned too so
/// the caller can log recoveries.
pub async fn retry_transient<T, E, F, P>(
    policy: &RetryPolicy,
    mut op: F,
    is_transient: P,
) -> Result<(T, u32), Exhausted<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                if attempt >= max_attempts || !is_transient(&error) {
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
                tracing::debug!(attempt, max_attempts, "transient failure, backing off");
                sleep(policy.backoff_delay).await;
                attempt += 1;
            }
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Glitch,
        Fatal,
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let result = retry_transient(
            &policy(3),
            |attempt| if attempt < 2 { Err(Failure::Glitch) } else { Ok(attempt) },
            |e| *e == Failure::Glitch,
        )
        .await;
        assert_eq!(result, Ok((2, 2)));
    }

    #[tokio::test]
    async fn test_retry_logic_exhausts() {
        let mut calls = 0;
        let result: Result<((), u32), _> = retry_transient(
            &policy(3),
            |_| {
                calls += 1;
                Err(Failure::Glitch)
            },
            |e| *e == Failure::Glitch,
        )
        .await;
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.error, Failure::Glitch);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<((), u32), _> = retry_transient(
            &policy(5),
            |_| {
                calls += 1;
                Err(Failure::Fatal)
            },
            |e| *e == Failure::Glitch,
        )
        .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let result = retry_transient(&policy(0), |_| Ok::<_, Failure>(7), |_| true).await;
        assert_eq!(result, Ok((7, 1)));
    }

    #[test]
    fn test_policy_deserializes_millis() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 4, "backoff_delay": 25}"#).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff_delay, Duration::from_millis(25));
    }
}
