use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::Result;

use super::{Next, PipeElement, Sample};

/// Latest "a sample made it through" timestamp of one pipeline.
///
/// Cheap to clone; clones share the same timestamp.
#[derive(Clone)]
pub struct Heartbeat {
    clock: Arc<dyn Clock>,
    latest_micros: Arc<AtomicU64>,
}

impl Heartbeat {
    /// Starts beating at the clock's current time.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now().as_micros() as u64;
        Self {
            clock,
            latest_micros: Arc::new(AtomicU64::new(now)),
        }
    }

    pub fn beat(&self) {
        let now = self.clock.now().as_micros() as u64;
        self.latest_micros.store(now, Ordering::Release);
    }

    pub fn latest(&self) -> Duration {
        Duration::from_micros(self.latest_micros.load(Ordering::Acquire))
    }

    /// Time since the last beat.
    pub fn lapse(&self) -> Duration {
        self.clock.now().saturating_sub(self.latest())
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Terminal element that records a heartbeat for every sample it receives.
pub struct HealthChecker {
    heartbeat: Heartbeat,
}

impl HealthChecker {
    pub fn new(heartbeat: Heartbeat) -> Self {
        Self { heartbeat }
    }
}

impl PipeElement for HealthChecker {
    fn name(&self) -> &str {
        "health_checker"
    }

    fn receive_next_sample(&mut self, sample: Sample, next: Next<'_>) -> Result<()> {
        log::debug!("heartbeat after {} sample", sample.kind());
        self.heartbeat.beat();
        next.forward(sample)
    }
}
