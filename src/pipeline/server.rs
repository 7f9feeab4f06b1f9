use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{HealthSettings, ServiceConfig};
use crate::detect::EngineRegistry;
use crate::error::{Error, Result};

use super::{build_pipeline, Heartbeat, Pipeline, PipelineControl};

/// Outcome of one `PipelineServer::healthcheck` pass.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthReport {
    /// Oldest heartbeat among running pipelines.
    pub oldest_heartbeat: Duration,
    /// False when any pipeline thread has ended or exceeded `fail_after`.
    pub healthy: bool,
    /// Pipelines asked to heal during this pass.
    pub healing: Vec<String>,
}

struct PipelineJob {
    name: String,
    heartbeat: Heartbeat,
    control: Arc<PipelineControl>,
    pipeline: Option<Pipeline>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl PipelineJob {
    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// Owns every configured pipeline and runs each on its own thread.
pub struct PipelineServer {
    jobs: Vec<PipelineJob>,
    health: HealthSettings,
    clock: Arc<dyn Clock>,
}

impl PipelineServer {
    pub fn new(config: &ServiceConfig, registry: &EngineRegistry, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.pipelines.is_empty() {
            return Err(Error::Configuration("no pipelines configured".to_string()));
        }
        let mut pipelines = Vec::with_capacity(config.pipelines.len());
        for pipeline_cfg in &config.pipelines {
            pipelines.push(build_pipeline(
                pipeline_cfg,
                &config.models_dir,
                registry,
                Arc::clone(&clock),
            )?);
        }
        Ok(Self::from_pipelines(pipelines, config.health.clone(), clock))
    }

    pub fn from_pipelines(
        pipelines: Vec<Pipeline>,
        health: HealthSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let jobs = pipelines
            .into_iter()
            .map(|pipeline| PipelineJob {
                name: pipeline.name().to_string(),
                heartbeat: pipeline.heartbeat().clone(),
                control: pipeline.control(),
                pipeline: Some(pipeline),
                thread: None,
            })
            .collect();
        Self {
            jobs,
            health,
            clock,
        }
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.name.as_str()).collect()
    }

    /// Spawn one thread per pipeline that has not been started yet.
    pub fn start(&mut self) -> Result<()> {
        log::info!("pipeline jobs starting...");
        for job in &mut self.jobs {
            let Some(mut pipeline) = job.pipeline.take() else {
                continue;
            };
            let handle = std::thread::Builder::new()
                .name(format!("pipeline-{}", job.name))
                .spawn(move || {
                    let result = pipeline.run();
                    if let Err(e) = &result {
                        log::error!("pipeline {} ended with error: {}", pipeline.name(), e);
                    }
                    result
                })?;
            job.thread = Some(handle);
        }
        log::info!("pipeline jobs started");
        Ok(())
    }

    /// Check every pipeline's heartbeat.
    ///
    /// A lapse above `heal_after` requests a heal (source reconnect); above
    /// `fail_after` the pipeline is reported as unrecoverable.
    pub fn healthcheck(&self) -> HealthReport {
        let now = self.clock.now();
        let mut oldest = now;
        let mut healthy = true;
        let mut healing = Vec::new();
        for job in &self.jobs {
            if !job.is_alive() {
                log::error!("pipeline {} thread is not running", job.name);
                healthy = false;
                continue;
            }
            let latest = job.heartbeat.latest();
            let lapse = now.saturating_sub(latest);
            if lapse > self.health.fail_after {
                log::error!(
                    "pipeline {} in terminal condition; latest heartbeat was {:.1} seconds ago",
                    job.name,
                    lapse.as_secs_f64()
                );
                healthy = false;
            } else if lapse > self.health.heal_after {
                log::warn!(
                    "pipeline {} is not responsive; latest heartbeat was {:.1} seconds ago, healing",
                    job.name,
                    lapse.as_secs_f64()
                );
                job.control.request_heal();
                healing.push(job.name.clone());
            }
            oldest = oldest.min(latest);
        }
        HealthReport {
            oldest_heartbeat: oldest,
            healthy,
            healing,
        }
    }

    /// Signal every pipeline to stop, then wait for all threads.
    pub fn stop(&mut self) -> Result<()> {
        log::info!("pipeline jobs stopping...");
        for job in &self.jobs {
            job.control.request_stop();
        }
        let mut first_error = None;
        for job in &mut self.jobs {
            let Some(handle) = job.thread.take() else {
                continue;
            };
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    log::error!("pipeline {} thread panicked", job.name);
                }
            }
        }
        log::info!("pipeline jobs stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PipelineServer {
    /// Stops and joins every pipeline thread that `stop` has not reaped.
    fn drop(&mut self) {
        for job in &self.jobs {
            job.control.request_stop();
        }
        for job in &mut self.jobs {
            if let Some(handle) = job.thread.take() {
                if handle.join().is_err() {
                    log::error!("pipeline {} thread panicked", job.name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::Frame;
    use crate::ingest::{FrameSource, SourceStats};
    use crate::pipeline::Chain;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Source that yields tiny frames until stopped, counting reconnects.
    struct EndlessSource {
        reconnects: Arc<AtomicU64>,
        produced: Arc<AtomicU64>,
    }

    impl FrameSource for EndlessSource {
        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            let sequence = self.produced.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(Duration::from_millis(1));
            Ok(Some(Frame::from_rgb(vec![0u8; 3], 1, 1, sequence)?))
        }

        fn reconnect(&mut self) -> anyhow::Result<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.produced.load(Ordering::SeqCst),
                ..SourceStats::default()
            }
        }
    }

    /// Source that reports a stall on one read and counts reconnects.
    /// Flags `released` when dropped.
    struct FlakySource {
        calls: Arc<AtomicU64>,
        reconnects: Arc<AtomicU64>,
        fail_on: u64,
        released: Arc<AtomicBool>,
    }

    impl FrameSource for FlakySource {
        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(Duration::from_millis(1));
            if call == self.fail_on {
                return Err(anyhow::anyhow!("stub://cam: stream stalled"));
            }
            Ok(Some(Frame::from_rgb(vec![0u8; 3], 1, 1, call)?))
        }

        fn reconnect(&mut self) -> anyhow::Result<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.calls.load(Ordering::SeqCst),
                reconnects: self.reconnects.load(Ordering::SeqCst),
                ..SourceStats::default()
            }
        }
    }

    impl Drop for FlakySource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..5_000 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("timed out waiting for {}", what);
    }

    fn settings() -> HealthSettings {
        HealthSettings {
            heal_after: Duration::from_secs(10),
            fail_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn stale_heartbeat_requests_heal_then_fails() -> Result<()> {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(100)));
        let reconnects = Arc::new(AtomicU64::new(0));
        let produced = Arc::new(AtomicU64::new(0));
        let source = EndlessSource {
            reconnects: Arc::clone(&reconnects),
            produced: Arc::clone(&produced),
        };
        // No health checker in the chain, so the heartbeat only moves at start.
        let pipeline = Pipeline::new(
            "cam",
            Box::new(source),
            Chain::new(),
            Heartbeat::new(clock.clone()),
        );
        let mut server = PipelineServer::from_pipelines(vec![pipeline], settings(), clock.clone());
        server.start()?;
        // The start-of-run heartbeat precedes the first frame.
        while produced.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        let report = server.healthcheck();
        assert!(report.healthy);
        assert!(report.healing.is_empty());
        assert_eq!(report.oldest_heartbeat, Duration::from_secs(100));

        clock.advance(Duration::from_secs(11));
        let report = server.healthcheck();
        assert!(report.healthy);
        assert_eq!(report.healing, vec!["cam".to_string()]);

        clock.advance(Duration::from_secs(60));
        let report = server.healthcheck();
        assert!(!report.healthy);

        server.stop()?;
        assert!(reconnects.load(Ordering::SeqCst) <= 1);
        Ok(())
    }

    #[test]
    fn finished_pipeline_is_unhealthy() -> Result<()> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let source = crate::ingest::SyntheticSource::new(crate::ingest::SourceConfig {
            uri: "stub://short".to_string(),
            width: 2,
            height: 2,
            max_frames: Some(1),
            ..Default::default()
        });
        let pipeline = Pipeline::new(
            "short",
            Box::new(source),
            Chain::new(),
            Heartbeat::new(Arc::clone(&clock)),
        );
        let mut server = PipelineServer::from_pipelines(vec![pipeline], settings(), clock);
        server.start()?;
        server.stop()?;
        assert!(!server.healthcheck().healthy);
        Ok(())
    }

    #[test]
    fn stalled_source_is_healed_not_dropped() -> Result<()> {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(100)));
        let calls = Arc::new(AtomicU64::new(0));
        let reconnects = Arc::new(AtomicU64::new(0));
        let source = FlakySource {
            calls: Arc::clone(&calls),
            reconnects: Arc::clone(&reconnects),
            fail_on: 4,
            released: Arc::new(AtomicBool::new(false)),
        };
        let pipeline = Pipeline::new(
            "cam",
            Box::new(source),
            Chain::new(),
            Heartbeat::new(clock.clone()),
        );
        let mut server = PipelineServer::from_pipelines(vec![pipeline], settings(), clock.clone());
        server.start()?;
        wait_until("reads past the stall", || calls.load(Ordering::SeqCst) > 6);

        let report = server.healthcheck();
        assert!(report.healthy);

        clock.advance(Duration::from_secs(11));
        let report = server.healthcheck();
        assert!(report.healthy);
        assert_eq!(report.healing, vec!["cam".to_string()]);
        wait_until("the heal reconnect", || reconnects.load(Ordering::SeqCst) == 1);

        server.stop()?;
        Ok(())
    }

    #[test]
    fn dropping_the_server_joins_pipeline_threads() -> Result<()> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let calls = Arc::new(AtomicU64::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let source = FlakySource {
            calls: Arc::clone(&calls),
            reconnects: Arc::new(AtomicU64::new(0)),
            fail_on: 0,
            released: Arc::clone(&released),
        };
        let pipeline = Pipeline::new(
            "cam",
            Box::new(source),
            Chain::new(),
            Heartbeat::new(Arc::clone(&clock)),
        );
        let mut server = PipelineServer::from_pipelines(vec![pipeline], settings(), clock);
        server.start()?;
        wait_until("the first read", || calls.load(Ordering::SeqCst) > 0);

        drop(server);
        assert!(released.load(Ordering::SeqCst));
        Ok(())
    }
}
