//! Accept-loop backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// First retry delay after a transient accept failure.
pub const ACCEPT_BACKOFF_BASE_MS: u64 = 5;

/// Delay ceiling for repeated accept failures.
pub const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// Exponential delay for the `attempt`-th consecutive failure, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(exponential).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Delay before retrying `accept` after `failures` consecutive transient errors.
pub fn accept_backoff(failures: u32) -> Duration {
    calculate_backoff(failures, ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        assert_eq!(accept_backoff(0), Duration::ZERO);
        assert_eq!(accept_backoff(1), Duration::from_millis(5));
        assert_eq!(accept_backoff(2), Duration::from_millis(10));

        let fourth = accept_backoff(4);
        assert!(fourth >= Duration::from_millis(40) && fourth < Duration::from_millis(44));
    }

    #[test]
    fn capped_at_one_second() {
        let delay = accept_backoff(30);
        assert!(delay >= Duration::from_millis(1000));
        assert!(delay < Duration::from_millis(1100));
    }
}
