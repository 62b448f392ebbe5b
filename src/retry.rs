//! Bounded retry: turn "maybe never" into a decidable outcome.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay between consecutive attempts.
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Budget for revealing the primary surface on open (10s).
    pub const REVEAL: RetryPolicy = RetryPolicy::new(Duration::from_millis(100), 100);

    /// Budget for migrating a fallback document to the primary surface (3s).
    pub const MIGRATION: RetryPolicy = RetryPolicy::new(Duration::from_millis(100), 30);

    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on the time spent waiting between attempts.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Outcome of a bounded retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a value.
    Ready { value: T, attempts: u32 },
    /// Every attempt came back empty.
    Exhausted { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Ready { attempts, .. } | RetryOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }
}

/// Calls `attempt` until it yields a value or the budget runs out.
///
/// The first attempt runs immediately; each later attempt follows a
/// cooperative sleep of `policy.interval`, so other tasks keep running while
/// this one waits. `attempt` receives the 1-based attempt number. No sleep
/// follows the final attempt.
pub async fn poll_until<T, F>(policy: RetryPolicy, mut attempt: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Option<T>,
{
    for n in 1..=policy.max_attempts {
        if n > 1 {
            tokio::time::sleep(policy.interval).await;
        }
        if let Some(value) = attempt(n) {
            return RetryOutcome::Ready { value, attempts: n };
        }
    }
    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
