//! Simulated Transport with Fault Injection
//!
//! Wraps another transport and injects failures, timeouts and latency from a
//! seeded RNG so a flaky endpoint can be replayed exactly.

use crate::store::Contents;
use crate::webhook::record::MutationRecord;
use crate::webhook::transport::{TransportError, TransportFuture, WebhookTransport};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedTransportConfig {
    /// Probability a request fails with a 5xx status
    pub fail_prob: f64,
    /// Probability a request times out
    pub timeout_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedTransportConfig {
    fn default() -> Self {
        SimulatedTransportConfig {
            fail_prob: 0.05,               // 5%
            timeout_prob: 0.01,            // 1%
            latency_range_us: (50, 2_000), // 0.05ms - 2ms
        }
    }
}

impl SimulatedTransportConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedTransportConfig {
            fail_prob: 0.3,
            timeout_prob: 0.1,
            latency_range_us: (100, 5_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedTransportConfig {
            fail_prob: 0.0,
            timeout_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedTransportStats {
    pub attempts: u64,
    pub failures: u64,
    pub timeouts: u64,
}

struct SimulatedState {
    rng: ChaCha8Rng,
    stats: SimulatedTransportStats,
}

/// Outcome drawn for one request
enum Fault {
    None,
    Fail,
    Timeout,
}

/// Transport wrapper that injects faults before delegating to `inner`
///
/// Faulted requests never reach the inner transport.
#[derive(Clone)]
pub struct SimulatedTransport<T: WebhookTransport> {
    inner: T,
    config: SimulatedTransportConfig,
    state: Arc<Mutex<SimulatedState>>,
}

impl<T: WebhookTransport> SimulatedTransport<T> {
    /// Probabilities outside `[0, 1]` are clamped; NaN counts as 0.
    pub fn new(inner: T, seed: u64, mut config: SimulatedTransportConfig) -> Self {
        config.fail_prob = probability(config.fail_prob);
        config.timeout_prob = probability(config.timeout_prob);
        SimulatedTransport {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedTransportStats::default(),
            })),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn stats(&self) -> SimulatedTransportStats {
        self.state.lock().stats.clone()
    }

    /// Draw the fault and latency for one request
    fn draw(&self) -> (Fault, Duration) {
        let mut s = self.state.lock();
        s.stats.attempts += 1;

        let (min, max) = self.config.latency_range_us;
        let latency_us = if max > min { s.rng.gen_range(min..max) } else { min };

        let fault = if s.rng.gen_bool(self.config.timeout_prob) {
            s.stats.timeouts += 1;
            Fault::Timeout
        } else if s.rng.gen_bool(self.config.fail_prob) {
            s.stats.failures += 1;
            Fault::Fail
        } else {
            Fault::None
        };
        (fault, Duration::from_micros(latency_us))
    }

    async fn inject(&self) -> Result<(), TransportError> {
        let (fault, latency) = self.draw();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(TransportError::Status(503)),
            Fault::Timeout => Err(TransportError::Timeout),
        }
    }
}

fn probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

impl<T: WebhookTransport> WebhookTransport for SimulatedTransport<T> {
    fn post<'a>(&'a self, url: &'a str, body: &'a Contents) -> TransportFuture<'a> {
        Box::pin(async move {
            self.inject().await?;
            self.inner.post(url, body).await
        })
    }

    fn delete<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            self.inject().await?;
            self.inner.delete(url).await
        })
    }

    fn post_batch<'a>(&'a self, url: &'a str, records: &'a [MutationRecord]) -> TransportFuture<'a> {
        Box::pin(async move {
            self.inject().await?;
            self.inner.post_batch(url, records).await
        })
    }
}
