//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Delay to wait after failed attempt number `attempt` (1-indexed):
/// `base × 2^(attempt-1)`, optionally capped, optionally with up to 10%
/// added jitter.
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    max: Option<Duration>,
    jitter: bool,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt - 1);
    let delay = base.saturating_mul(factor);
    let capped = match max {
        Some(max) => delay.min(max),
        None => delay,
    };

    if !jitter {
        return capped;
    }

    let jitter_range_ms = u64::try_from(capped.as_millis() / 10).unwrap_or(u64::MAX);
    if jitter_range_ms == 0 {
        return capped;
    }
    let extra = rand::thread_rng().gen_range(0..jitter_range_ms);
    capped.saturating_add(Duration::from_millis(extra))
}
