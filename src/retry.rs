//! Retry-delay policies for connection startup.
//!
//! The service consults a single injected retry-delay function after every
//! failed start attempt. The default gives up immediately; [`BackoffSchedule`]
//! provides bounded exponential backoff with lightweight jitter.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::connection::ClientError;

/// Inputs handed to the retry-delay function after a failed start attempt.
#[derive(Debug)]
pub struct RetryContext<'a> {
    /// Time elapsed since the service was created.
    pub elapsed: Duration,
    /// Error produced by the failed start attempt.
    pub retry_reason: &'a ClientError,
    /// Number of failed attempts so far, including this one.
    pub previous_retry_count: u32,
}

/// Maps failed-attempt context to the next wait, or `None` to stop retrying.
pub type RetryDelayFn = Arc<dyn Fn(&RetryContext<'_>) -> Option<Duration> + Send + Sync>;

/// Default policy: never retry.
pub fn no_retry() -> RetryDelayFn {
    Arc::new(|_context| None)
}

/// Bounded exponential backoff usable as a retry-delay function.
#[derive(Clone, Debug)]
pub struct BackoffSchedule {
    /// Maximum number of retries before giving up.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential delay growth.
    pub max_backoff: Duration,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl BackoffSchedule {
    /// Computes the delay for the attempt described by `context`.
    ///
    /// Returns `None` once `previous_retry_count` exceeds `max_retries`.
    pub fn delay_for(&self, context: &RetryContext<'_>) -> Option<Duration> {
        if context.previous_retry_count > self.max_retries {
            debug!(
                event = "retry_budget_exhausted",
                attempts = context.previous_retry_count,
                elapsed_ms = context.elapsed.as_millis() as u64
            );
            return None;
        }

        let mut delay = self.initial_backoff;
        for _ in 1..context.previous_retry_count {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_backoff);
        }
        Some(delay + jitter_duration(self.jitter, context.previous_retry_count))
    }

    /// Adapts the schedule into the function shape the service consumes.
    pub fn into_retry_fn(self) -> RetryDelayFn {
        Arc::new(move |context| self.delay_for(context))
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            jitter: Duration::from_millis(25),
        }
    }
}

fn jitter_duration(max_jitter: Duration, attempt: u32) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ (u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos + 1))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{no_retry, BackoffSchedule, RetryContext};
    use crate::connection::ClientError;

    fn delay_for(schedule: &BackoffSchedule, previous_retry_count: u32) -> Option<Duration> {
        let reason = ClientError::StartFailed("refused".to_string());
        schedule.delay_for(&RetryContext {
            elapsed: Duration::from_millis(u64::from(previous_retry_count) * 10),
            retry_reason: &reason,
            previous_retry_count,
        })
    }

    fn jitterless(max_retries: u32) -> BackoffSchedule {
        BackoffSchedule {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn no_retry_always_stops() {
        let retry = no_retry();
        let reason = ClientError::StartFailed("refused".to_string());
        let decision = retry(&RetryContext {
            elapsed: Duration::ZERO,
            retry_reason: &reason,
            previous_retry_count: 1,
        });
        assert_eq!(decision, None);
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let schedule = jitterless(10);
        assert_eq!(delay_for(&schedule, 1), Some(Duration::from_millis(100)));
        assert_eq!(delay_for(&schedule, 2), Some(Duration::from_millis(200)));
        assert_eq!(delay_for(&schedule, 3), Some(Duration::from_millis(300)));
        assert_eq!(delay_for(&schedule, 4), Some(Duration::from_millis(300)));
    }

    #[test]
    fn backoff_stops_after_max_retries() {
        let schedule = jitterless(2);
        assert!(delay_for(&schedule, 2).is_some());
        assert_eq!(delay_for(&schedule, 3), None);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let schedule = BackoffSchedule {
            jitter: Duration::from_millis(25),
            ..jitterless(10)
        };
        let delay = delay_for(&schedule, 1).expect("delay");
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }
}
