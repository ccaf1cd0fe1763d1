//! Randomized request pacing

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::RequestDelayConfig;

/// Sleeps a uniformly sampled delay before each page interaction
#[derive(Debug)]
pub struct RequestPacer {
    min_ms: u64,
    max_ms: u64,
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
}

impl RequestPacer {
    /// Create a pacer seeded from OS entropy
    pub fn new(config: &RequestDelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(config, clock, StdRng::from_entropy())
    }

    /// Create a pacer with a fixed seed
    pub fn with_seed(config: &RequestDelayConfig, clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(config, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &RequestDelayConfig, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        let (min_ms, max_ms) = if config.min_ms <= config.max_ms {
            (config.min_ms, config.max_ms)
        } else {
            (config.max_ms, config.min_ms)
        };
        Self {
            min_ms,
            max_ms,
            rng: Mutex::new(rng),
            clock,
        }
    }

    /// Draw the next delay in `[min, max]`
    pub fn sample(&self) -> Duration {
        let ms = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }

    /// Sleep for a freshly sampled delay
    pub async fn pause(&self) {
        let delay = self.sample();
        self.clock.sleep(delay).await;
    }
}
