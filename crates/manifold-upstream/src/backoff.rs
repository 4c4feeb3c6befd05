use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Exponential reconnect backoff
///
/// base × 2^(failures−1), capped. The failure counter resets every time a
/// runtime reaches ready.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Deterministic delay for the nth consecutive failure
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.cap.as_millis()).unwrap_or(u64::MAX);

        let exp = (consecutive_failures - 1).min(30);
        let candidate = base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(candidate.min(cap_ms))
    }

    /// Delay with ±20 % jitter applied
    ///
    /// The jitter source is the subsecond clock reading, which is cheap and
    /// uncorrelated across upstreams without pulling in a PRNG.
    pub fn jittered(&self, consecutive_failures: u32) -> Duration {
        jitter(self.delay(consecutive_failures))
    }
}

fn jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    // Scale into [0.8, 1.2].
    let unit = f64::from(nanos % 1_000) / 999.0;
    let factor = 0.8 + 0.4 * unit;

    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base_until_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(7), Duration::from_secs(60));
        assert_eq!(backoff.delay(30), Duration::from_secs(60));
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let backoff = Backoff::default();
        for _ in 0..100 {
            let jittered = backoff.jittered(4); // nominal 8s
            assert!(jittered >= Duration::from_millis(6_400), "{jittered:?}");
            assert!(jittered <= Duration::from_millis(9_600), "{jittered:?}");
        }
    }

    #[test]
    fn zero_failures_have_no_jitter() {
        assert_eq!(Backoff::default().jittered(0), Duration::ZERO);
    }
}
