//! Retry policy for the HTTP fetch layer, adapted from the teacher's retry/backoff shape.

use std::time::Duration;

/// A backoff schedule applied between retry attempts.
#[derive(Clone, Debug)]
pub enum Backoff {
    /// Always sleep the same duration.
    Fixed(Duration),
    /// Sleep `base * factor^attempt`, capped at `max`, optionally jittered +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scaled = base.as_secs_f64() * factor.powi(attempt as i32);
                let capped = scaled.min(max.as_secs_f64());
                let final_secs = if *jitter {
                    let j = pseudo_jitter(attempt);
                    capped * (0.5 + j)
                } else {
                    capped
                };
                Duration::from_secs_f64(final_secs.max(0.0))
            }
        }
    }
}

/// A cheap deterministic "jitter" in `[0, 1)` derived from the attempt number, avoiding a
/// dependency on a random number generator for what is otherwise a best-effort backoff spread.
fn pseudo_jitter(attempt: u32) -> f64 {
    let h = crate::symbol::fnv1a(&attempt.to_le_bytes());
    (h % 1000) as f64 / 1000.0
}

/// Retry policy for HTTP requests issued by [`crate::client::HttpClient`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Total attempts made is `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retry_on_status: Vec<u16>,
    pub retry_on_timeout: bool,
    pub retry_on_connect: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(250),
                factor: 2.0,
                max: Duration::from_secs(5),
                jitter: true,
            },
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
            retry_on_timeout: true,
            retry_on_connect: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.enabled && self.retry_on_status.contains(&status)
    }

    #[must_use]
    pub fn should_retry_error(&self, err: &reqwest::Error) -> bool {
        if !self.enabled {
            return false;
        }
        (self.retry_on_timeout && err.is_timeout()) || (self.retry_on_connect && err.is_connect())
    }
}

/// What to do with the response cache for a single call (§4.1 `invalid_cache_query_after_seconds`
/// is modeled as the TTL passed alongside this mode).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    /// Read from cache if present and fresh; write the response back into the cache.
    Use,
    /// Skip the read, always fetch; still write the fresh response back into the cache.
    Refresh,
    /// No read, no write.
    Bypass,
}
