//! Exponential backoff with full jitter, shared by [`crate::subscriber::dispatch::DispatchPump`]
//! and [`crate::subscriber::pull_loop::PullLoop`] so the retry *policy* lives in one place.

use std::time::Duration;

use rand::Rng;

const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Computes successive retry delays for a single retry loop.
///
/// Each call to [`Backoff::next_delay`] doubles the base delay (capped at 60s)
/// and applies full jitter, i.e. `delay = random(0, min(cap, base * 2^attempt))`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    /// Resets the attempt counter after a successful RPC.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the delay to sleep before the next attempt, and advances state.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(10); // 2^10 * base is already far past the cap for any sane base
        self.attempt += 1;
        let ceiling = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(BACKOFF_CAP)
            .min(BACKOFF_CAP);
        let jittered_ms = rand::thread_rng().gen_range(0..=ceiling.as_millis().max(1) as u64);
        Duration::from_millis(jittered_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_cap() {
        let mut b = Backoff::new(Duration::from_millis(100));
        for _ in 0..30 {
            let d = b.next_delay();
            assert!(d <= BACKOFF_CAP, "{d:?} exceeded cap");
        }
    }

    #[test]
    fn reset_restarts_growth() {
        let mut b = Backoff::new(Duration::from_millis(10));
        for _ in 0..5 {
            b.next_delay();
        }
        b.reset();
        assert_eq!(b.attempt, 0);
    }
}
