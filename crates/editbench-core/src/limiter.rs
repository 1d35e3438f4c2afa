//! Per-provider admission control and retry.
//!
//! Every provider call goes through a `GatedClient`: acquire a token from the
//! provider's bucket (suspending only the calling worker), issue the call,
//! and on a rate-limit response back off exponentially with jitter before
//! re-acquiring. All time spent blocked in the limiter or in backoff is
//! accounted as rate-limit delay so downstream timing buckets stay honest.

use crate::errors::ProviderError;
use crate::providers::{Completion, ModelClient, ModelParams};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all workers hitting one provider. Constructed once
/// at scheduler startup and passed by reference; never ambient global state.
pub struct RateLimiter {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    unlimited: bool,
}

impl RateLimiter {
    /// Limit to `rpm` requests per minute with a burst of `rpm.min(10)`.
    pub fn per_minute(name: impl Into<String>, rpm: u32) -> Self {
        let rpm = rpm.max(1);
        let capacity = f64::from(rpm.min(10));
        Self {
            name: name.into(),
            capacity,
            refill_per_sec: f64::from(rpm) / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            unlimited: false,
        }
    }

    pub fn unlimited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: 0.0,
            refill_per_sec: 0.0,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            unlimited: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take one token, waiting for refill if the bucket is empty. Returns the
    /// time spent blocked. Concurrent acquires never lose tokens: refill is
    /// computed under the bucket lock from real elapsed time.
    pub async fn acquire(&self) -> Duration {
        if self.unlimited {
            return Duration::ZERO;
        }
        let started = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let elapsed = bucket.last_refill.elapsed().as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = Instant::now();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return started.elapsed();
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Budget for 429-class responses; generous because these are expected
    /// under load and recovering them is the limiter's whole job.
    pub max_rate_limit_retries: u32,
    /// Small fixed budget for transient provider trouble.
    pub max_transient_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 8,
            max_transient_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff capped at `max_delay`, with up to +50% jitter to
    /// spread concurrent workers off a shared rate-limit window.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        exp.mul_f64(1.0 + jitter).min(self.max_delay)
    }
}

/// Diagnostics attached to every gated call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallStats {
    /// Limiter admission plus backoff sleeps, in milliseconds.
    pub rate_limit_delay_ms: f64,
    pub retries: u32,
}

impl CallStats {
    pub fn accumulate(&mut self, other: CallStats) {
        self.rate_limit_delay_ms += other.rate_limit_delay_ms;
        self.retries += other.retries;
    }
}

/// A model client wrapped with its provider's limiter and the retry policy.
/// Cheap to clone; the limiter is shared across all workers for the provider.
#[derive(Clone)]
pub struct GatedClient {
    inner: Arc<dyn ModelClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl GatedClient {
    pub fn new(inner: Arc<dyn ModelClient>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            inner,
            limiter,
            retry,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    /// Issue one completion. Rate-limit responses are retried inside this
    /// call; transient failures a bounded number of times on top. The
    /// returned stats carry every millisecond spent waiting rather than
    /// working.
    pub async fn complete(
        &self,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<(Completion, CallStats), ProviderError> {
        let mut stats = CallStats::default();
        let mut rate_limit_attempts = 0u32;
        let mut transient_attempts = 0u32;

        loop {
            stats.rate_limit_delay_ms += self.limiter.acquire().await.as_secs_f64() * 1000.0;

            match self.inner.complete(prompt, params).await {
                Ok(completion) => return Ok((completion, stats)),
                Err(e @ ProviderError::RateLimited { .. }) => {
                    if rate_limit_attempts >= self.retry.max_rate_limit_retries {
                        return Err(e);
                    }
                    let mut delay = self.retry.backoff_delay(rate_limit_attempts);
                    if let ProviderError::RateLimited {
                        retry_after: Some(hint),
                        ..
                    } = &e
                    {
                        delay = delay.max(*hint);
                    }
                    tracing::warn!(
                        provider = self.inner.provider_name(),
                        attempt = rate_limit_attempts + 1,
                        backoff_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    stats.rate_limit_delay_ms += delay.as_secs_f64() * 1000.0;
                    stats.retries += 1;
                    rate_limit_attempts += 1;
                }
                Err(e @ ProviderError::Transient { .. }) => {
                    if transient_attempts >= self.retry.max_transient_retries {
                        return Err(e);
                    }
                    // Flat, capped delay: transient trouble is not a quota
                    // signal, so no exponential growth here.
                    let delay = self.retry.base_delay;
                    tracing::debug!(
                        provider = self.inner.provider_name(),
                        attempt = transient_attempts + 1,
                        "transient provider error, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    stats.rate_limit_delay_ms += delay.as_secs_f64() * 1000.0;
                    stats.retries += 1;
                    transient_attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake::FakeClient;

    fn gated(fake: FakeClient) -> (Arc<FakeClient>, GatedClient) {
        let fake = Arc::new(fake);
        let limiter = Arc::new(RateLimiter::unlimited("test"));
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        (fake.clone(), GatedClient::new(fake, limiter, retry))
    }

    #[tokio::test]
    async fn recovers_from_rate_limits_and_reports_delay() {
        let (fake, client) = gated(
            FakeClient::new("test")
                .push_rate_limited()
                .push_rate_limited()
                .push_text("done"),
        );
        let (completion, stats) = client
            .complete("p", &ModelParams::new("m"))
            .await
            .expect("recovered");
        assert_eq!(completion.text, "done");
        assert_eq!(stats.retries, 2);
        assert!(stats.rate_limit_delay_ms > 0.0);
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn transient_budget_is_bounded() {
        let (fake, client) = gated(
            FakeClient::new("test")
                .push_transient("a")
                .push_transient("b")
                .push_transient("c"),
        );
        let err = client
            .complete("p", &ModelParams::new("m"))
            .await
            .expect_err("budget exhausted");
        assert!(matches!(err, ProviderError::Transient { .. }));
        // 1 initial + max_transient_retries
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let (fake, client) = gated(FakeClient::new("test").push_fatal("bad key"));
        let err = client
            .complete("p", &ModelParams::new("m"))
            .await
            .expect_err("fatal");
        assert!(matches!(err, ProviderError::Fatal { .. }));
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_blocks_when_empty_and_never_loses_tokens() {
        let limiter = Arc::new(RateLimiter::per_minute("test", 60));
        // Burst capacity for 60 rpm is 10; the 11th acquire must wait ~1s.
        for _ in 0..10 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_all_complete() {
        let limiter = Arc::new(RateLimiter::per_minute("test", 600));
        let mut handles = Vec::new();
        for _ in 0..30 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.acquire().await }));
        }
        for h in handles {
            h.await.expect("acquire task");
        }
    }

    #[test]
    fn backoff_grows_then_caps() {
        let policy = RetryPolicy::default();
        let early = policy.backoff_delay(0);
        assert!(early >= Duration::from_millis(500));
        assert!(policy.backoff_delay(20) <= policy.max_delay);
    }
}
