use rand::Rng;

/// Upper bound on any single backoff delay.
pub const MAX_RETRY_DELAY_MS: u64 = 10 * 60 * 1000;

/// Calculate the backoff delay before retry, using exponential growth on the
/// attempt count plus a small random jitter so a burst of failures does not
/// retry in lockstep. `attempt_count` is the number of attempts already
/// consumed, so the first retry waits `base * 2`.
pub fn calculate_retry_delay(base_delay_ms: u64, attempt_count: u32) -> u64 {
    let exponent = attempt_count.min(10);
    let exp_delay = base_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
    let capped = exp_delay.min(MAX_RETRY_DELAY_MS);

    let jitter_span = capped / 10;
    let jitter = if jitter_span > 0 {
        rand::rng().random_range(0..=jitter_span)
    } else {
        0
    };

    (capped + jitter).min(MAX_RETRY_DELAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt() {
        // Jitter is at most 10%, so windows for consecutive attempts are
        // disjoint at these magnitudes.
        let first = calculate_retry_delay(1000, 1);
        assert!((2000..=2200).contains(&first), "first retry was {first}");

        let second = calculate_retry_delay(1000, 2);
        assert!((4000..=4400).contains(&second), "second retry was {second}");

        let third = calculate_retry_delay(1000, 3);
        assert!((8000..=8800).contains(&third), "third retry was {third}");
    }

    #[test]
    fn delay_is_capped() {
        let delay = calculate_retry_delay(60_000, 10);
        assert!(delay <= MAX_RETRY_DELAY_MS);

        // Huge attempt counts must not overflow.
        let delay = calculate_retry_delay(u64::MAX / 2, 30);
        assert!(delay <= MAX_RETRY_DELAY_MS);
    }
}
