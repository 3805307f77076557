//! Exponential backoff with optional full jitter

use rand::Rng;
use std::time::Duration;

/// Compute the delay before retry number `attempt`.
///
/// The delay grows as `base * 2^attempt`, capped at `max`. With `jitter`
/// enabled the returned value is drawn uniformly from `[0, computed]` (full
/// jitter), which keeps many callers retrying the same target from
/// synchronizing into retry storms. The random source is explicit so tests
/// can seed it.
pub fn exponential_backoff<R: Rng + ?Sized>(
    attempt: u32,
    base: Duration,
    jitter: bool,
    max: Duration,
    rng: &mut R,
) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let millis = (base.as_millis() as u64).saturating_mul(factor);
    let delay = Duration::from_millis(millis).min(max);
    if jitter {
        Duration::from_millis(rng.gen_range(0..=delay.as_millis() as u64))
    } else {
        delay
    }
}
