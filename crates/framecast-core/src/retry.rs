//! Bounded retry with backoff.
//!
//! One policy type drives both output-device initialization (a small
//! fixed budget with a short pause) and the transport adapter's
//! reconnection delay (unbounded, exponential with jitter).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

// ── RetryPolicy ──────────────────────────────────────────────────────

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `None` means retry forever.
    pub max_attempts: Option<u32>,

    /// Delay after the first failure.
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Growth factor applied per failed attempt. `1.0` gives a fixed delay.
    pub multiplier: f64,

    /// Spread delays by +-25% so a fleet of devices does not reconnect in
    /// lockstep.
    pub jitter: bool,
}

impl RetryPolicy {
    /// A fixed number of attempts with a constant pause between them.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Unbounded exponential backoff with jitter.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Whether another attempt may follow `failed` failed attempts.
    pub fn allows_retry(&self, failed: u32) -> bool {
        self.max_attempts.is_none_or(|max| failed < max)
    }

    /// Delay to wait after the `failure`-th consecutive failure (0-based).
    ///
    /// `delay = min(initial * multiplier^failure, max)`, optionally scaled
    /// by a deterministic jitter factor seeded from the failure count.
    pub fn delay_for(&self, failure: u32) -> Duration {
        let exponent = i32::try_from(failure).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let scaled = if self.jitter {
            capped * (1.0 + 0.25 * (f64::from(failure) * 7.3).sin())
        } else {
            capped
        };

        Duration::from_secs_f64(scaled.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30))
    }
}

// ── retry ────────────────────────────────────────────────────────────

/// Run `op` until it succeeds or the policy's budget is spent.
///
/// `op` receives the 1-based attempt number. The last error is returned
/// when every attempt failed.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failed: u32 = 0;

    loop {
        let attempt = failed.saturating_add(1);
        match op(attempt).await {
            Ok(value) => {
                if failed > 0 {
                    debug!(attempt, "{label} succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                failed = attempt;
                if !policy.allows_retry(failed) {
                    warn!(error = %e, attempts = failed, "{label} failed, giving up");
                    return Err(e);
                }

                let delay = policy.delay_for(failed - 1);
                warn!(
                    error = %e,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "{label} failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
