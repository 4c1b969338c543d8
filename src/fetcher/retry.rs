use rand::Rng;
use std::time::Duration;

/// Delay applied between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^retry` with ±30% jitter, capped at `cap`.
    Exponential { base: Duration, cap: Duration },
}

/// Bounded retry policy shared by every fetch issued through one
/// [`BoundedFetcher`](crate::fetcher::BoundedFetcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Backoff::Fixed(Duration::from_secs(1)))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt. Relay checks use this: an unhelpful relay just
    /// hands over to the next one.
    pub fn none() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, cap } => calculate_backoff_delay(retry, base).min(cap),
        }
    }
}

/// Calculate exponential backoff delay with jitter
pub fn calculate_backoff_delay(attempt: u32, base: Duration) -> Duration {
    // Cap the exponent to prevent overflow
    let capped_attempt = attempt.min(10);

    // Calculate base delay: base * 2^attempt
    let base_delay = base.saturating_mul(2_u32.saturating_pow(capped_attempt));

    // Add jitter: ±30% randomness
    let jitter_factor = rand::thread_rng().gen_range(0.7..1.3);
    base_delay.mul_f64(jitter_factor)
}
