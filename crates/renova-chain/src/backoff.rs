//! Retry backoff for the poll loop.

use std::time::Duration;

/// Cap on the doubling exponent; beyond this the cap below dominates anyway.
const MAX_EXPONENT: u32 = 16;

/// Delay before the next iteration.
///
/// Zero consecutive failures means the normal poll interval. Each
/// consecutive failure doubles the delay, capped at `max`.
pub fn delay(base: Duration, consecutive_failures: u32, max: Duration) -> Duration {
    if consecutive_failures == 0 {
        return base;
    }
    let factor = 2u32.saturating_pow(consecutive_failures.min(MAX_EXPONENT));
    base.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(5_000);
    const MAX: Duration = Duration::from_millis(60_000);

    #[test]
    fn test_healthy_loop_uses_base_interval() {
        assert_eq!(delay(BASE, 0, MAX), BASE);
    }

    #[test]
    fn test_doubles_per_failure() {
        assert_eq!(delay(BASE, 1, MAX), Duration::from_millis(10_000));
        assert_eq!(delay(BASE, 2, MAX), Duration::from_millis(20_000));
        assert_eq!(delay(BASE, 3, MAX), Duration::from_millis(40_000));
    }

    #[test]
    fn test_capped() {
        assert_eq!(delay(BASE, 4, MAX), MAX);
        assert_eq!(delay(BASE, 30, MAX), MAX);
        assert_eq!(delay(BASE, u32::MAX, MAX), MAX);
    }
}
