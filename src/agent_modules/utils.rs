//! Shared retry/backoff helpers for the agent loops.

use std::time::Duration;

pub const RETRY_BASE: Duration = Duration::from_secs(10);
pub const RETRY_JITTER_MAX_MS: u64 = 5_000;
pub const MAX_REPORT_ATTEMPTS: u32 = 5;

/// `10 s + jitter in [0, 5 s)`. The jitter keeps a freshly provisioned
/// pool from hammering the allocator in lockstep.
pub fn retry_delay() -> Duration {
    RETRY_BASE + Duration::from_millis(rand::random_range(0..RETRY_JITTER_MAX_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_jitter_bounds() {
        for _ in 0..100 {
            let d = retry_delay();
            assert!(d >= RETRY_BASE);
            assert!(d < RETRY_BASE + Duration::from_millis(RETRY_JITTER_MAX_MS));
        }
    }
}
