use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{ElementSpec, PipelineConfig};
use crate::detect::{DetectConfig, EngineRegistry, ObjectDetect};
use crate::error::{Error, Result};
use crate::ingest::{open_source, FrameSource};
use crate::overlay::{OverlayConfig, SvgOverlay};

use super::{Chain, ElementId, HealthChecker, Heartbeat, PipeElement, Sample};

/// Pause after a source failure before polling it again.
const SOURCE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Cross-thread requests to a running pipeline.
#[derive(Debug, Default)]
pub struct PipelineControl {
    stop: AtomicBool,
    heal: AtomicBool,
}

impl PipelineControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ask the pipeline to reconnect its source before the next frame.
    pub fn request_heal(&self) {
        self.heal.store(true, Ordering::SeqCst);
    }

    pub fn heal_pending(&self) -> bool {
        self.heal.load(Ordering::SeqCst)
    }

    fn take_heal_request(&self) -> bool {
        self.heal.swap(false, Ordering::SeqCst)
    }
}

/// A named frame source feeding one chain.
pub struct Pipeline {
    name: String,
    source: Box<dyn FrameSource>,
    chain: Chain,
    heartbeat: Heartbeat,
    control: Arc<PipelineControl>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn FrameSource>,
        chain: Chain,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            chain,
            heartbeat,
            control: Arc::new(PipelineControl::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn control(&self) -> Arc<PipelineControl> {
        Arc::clone(&self.control)
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    /// Pull one frame and push it through the chain.
    ///
    /// Returns `false` once the source has ended. A failing chain costs the
    /// current frame. A failing or stalled source counts as a missed frame:
    /// the heartbeat goes stale and the server asks for a heal.
    pub fn process_next(&mut self) -> bool {
        if self.control.take_heal_request() {
            log::warn!("pipeline {} healing: reconnecting source", self.name);
            if let Err(e) = self.source.reconnect() {
                log::error!("pipeline {} reconnect failed: {:#}", self.name, e);
                std::thread::sleep(SOURCE_RETRY_DELAY);
                return true;
            }
        }
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return false,
            Err(e) => {
                log::warn!("pipeline {} missed a frame: {:#}", self.name, e);
                std::thread::sleep(SOURCE_RETRY_DELAY);
                return true;
            }
        };
        let sequence = frame.sequence;
        if let Err(e) = self.chain.push(Sample::Image(frame)) {
            log::warn!(
                "pipeline {} dropped frame #{}: {}",
                self.name,
                sequence,
                e
            );
        }
        true
    }

    /// Run until stop is requested or the source ends.
    pub fn run(&mut self) -> Result<()> {
        log::info!("pipeline {} starting", self.name);
        self.source.connect().map_err(Error::Source)?;
        self.heartbeat.beat();
        while !self.control.stop_requested() {
            if !self.process_next() {
                log::info!("pipeline {} source ended", self.name);
                break;
            }
        }
        let stats = self.source.stats();
        log::info!(
            "pipeline {} stopped after {} frames from {}",
            self.name,
            stats.frames_captured,
            stats.uri
        );
        Ok(())
    }
}

/// Assemble a pipeline from its config.
///
/// Elements are chained in definition order and terminated by a
/// `HealthChecker`. Unknown element names are logged and skipped.
pub fn build_pipeline(
    config: &PipelineConfig,
    models_dir: &Path,
    registry: &EngineRegistry,
    clock: Arc<dyn Clock>,
) -> Result<Pipeline> {
    log::info!("loading {} pipeline configuration", config.name);
    let source = open_source(config.source.clone())?;
    let heartbeat = Heartbeat::new(Arc::clone(&clock));

    let mut chain = Chain::new();
    let mut ids: Vec<ElementId> = Vec::with_capacity(config.elements.len() + 1);
    for spec in &config.elements {
        match build_element(spec, models_dir, registry, &clock)? {
            Some(element) => {
                log::info!(
                    "pipeline {} adding element {} with config {}",
                    config.name,
                    spec.kind,
                    spec.options
                );
                ids.push(chain.add(element));
            }
            None => {
                log::warn!(
                    "pipeline {} definition has unknown element {}; ignoring it",
                    config.name,
                    spec.kind
                );
            }
        }
    }
    ids.push(chain.add(Box::new(HealthChecker::new(heartbeat.clone()))));
    chain.link(&ids)?;

    Ok(Pipeline::new(config.name.clone(), source, chain, heartbeat))
}

fn build_element(
    spec: &ElementSpec,
    models_dir: &Path,
    registry: &EngineRegistry,
    clock: &Arc<dyn Clock>,
) -> Result<Option<Box<dyn PipeElement>>> {
    match spec.kind.as_str() {
        "detect_objects" => {
            let mut cfg: DetectConfig = spec.parse_options()?;
            cfg.resolve_paths(models_dir);
            cfg.validate()?;
            let engine = registry.create(&cfg).map_err(|e| {
                Error::Configuration(format!("detection engine {}: {:#}", cfg.engine, e))
            })?;
            let stage = ObjectDetect::with_clock(&cfg, engine, Arc::clone(clock))?;
            Ok(Some(Box::new(stage)))
        }
        "svg_overlay" => {
            let cfg: OverlayConfig = spec.parse_options()?;
            Ok(Some(Box::new(SvgOverlay::new(cfg)?)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ingest::SourceConfig;
    use crate::frame::Frame;
    use crate::ingest::SourceStats;
    use std::io::Write;
    use tempfile::TempDir;

    /// Source whose second read reports a stall; every other read succeeds.
    #[derive(Default)]
    struct StallingSource {
        calls: u64,
    }

    impl FrameSource for StallingSource {
        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            self.calls += 1;
            if self.calls == 2 {
                return Err(anyhow::anyhow!("stub://cam: stream stalled"));
            }
            Ok(Some(Frame::from_rgb(vec![0u8; 3], 1, 1, self.calls)?))
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.calls,
                ..SourceStats::default()
            }
        }
    }

    fn models_dir() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("model.bin"), b"model").expect("write model");
        let mut labels =
            std::fs::File::create(dir.path().join("labels.txt")).expect("create labels");
        labels.write_all(b"0 person\n15 cat\n").expect("write labels");
        dir
    }

    fn spec(kind: &str, options: serde_json::Value) -> ElementSpec {
        ElementSpec {
            kind: kind.to_string(),
            options,
        }
    }

    fn pipeline_config(elements: Vec<ElementSpec>, max_frames: u64) -> PipelineConfig {
        PipelineConfig {
            name: "front_door".to_string(),
            source: SourceConfig {
                uri: "stub://front_door".to_string(),
                width: 16,
                height: 8,
                max_frames: Some(max_frames),
                ..SourceConfig::default()
            },
            elements,
        }
    }

    #[test]
    fn builds_linear_chain_ending_in_health_checker() -> Result<()> {
        let dir = models_dir();
        let cfg = pipeline_config(
            vec![
                spec(
                    "detect_objects",
                    serde_json::json!({"model": "model.bin", "labels": "labels.txt", "engine": "stub"}),
                ),
                spec("save_samples", serde_json::json!({"output_directory": "/tmp"})),
                spec("svg_overlay", serde_json::json!({})),
            ],
            3,
        );
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let pipeline = build_pipeline(&cfg, dir.path(), &EngineRegistry::with_builtin(), clock)?;

        let chain = pipeline.chain();
        assert_eq!(chain.len(), 3);
        let first = chain.entry().expect("entry");
        assert_eq!(chain.name_of(first), Some("detect_objects"));
        let second = chain.next_of(first).expect("second");
        assert_eq!(chain.name_of(second), Some("svg_overlay"));
        let third = chain.next_of(second).expect("third");
        assert_eq!(chain.name_of(third), Some("health_checker"));
        assert_eq!(chain.next_of(third), None);
        Ok(())
    }

    #[test]
    fn run_drains_source_and_beats() -> Result<()> {
        let dir = models_dir();
        let cfg = pipeline_config(
            vec![spec(
                "detect_objects",
                serde_json::json!({"model": "model.bin", "labels": "labels.txt", "engine": "stub", "confidence_threshold": 0.0}),
            )],
            5,
        );
        let clock = Arc::new(ManualClock::new(Duration::from_secs(10)));
        let mut pipeline =
            build_pipeline(&cfg, dir.path(), &EngineRegistry::with_builtin(), clock.clone())?;
        clock.advance(Duration::from_secs(3));
        pipeline.run()?;

        assert_eq!(pipeline.source().stats().frames_captured, 5);
        assert_eq!(pipeline.heartbeat().latest(), Duration::from_secs(13));
        Ok(())
    }

    #[test]
    fn missing_model_fails_assembly() {
        let dir = models_dir();
        let cfg = pipeline_config(
            vec![spec(
                "detect_objects",
                serde_json::json!({"model": "absent.bin", "labels": "labels.txt", "engine": "stub"}),
            )],
            1,
        );
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let result = build_pipeline(&cfg, dir.path(), &EngineRegistry::with_builtin(), clock);
        assert!(matches!(result, Err(Error::MissingFile { .. })));
    }

    #[test]
    fn heal_request_reconnects_source() -> Result<()> {
        let dir = models_dir();
        let cfg = pipeline_config(Vec::new(), 10);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let mut pipeline =
            build_pipeline(&cfg, dir.path(), &EngineRegistry::with_builtin(), clock)?;
        pipeline.control().request_heal();
        assert!(pipeline.process_next());
        assert!(!pipeline.control().heal_pending());
        assert_eq!(pipeline.source().stats().reconnects, 1);
        Ok(())
    }

    #[test]
    fn unregistered_engine_is_a_configuration_error() {
        let dir = models_dir();
        let cfg = pipeline_config(
            vec![spec(
                "detect_objects",
                serde_json::json!({"model": "model.bin", "labels": "labels.txt", "engine": "edgetpu"}),
            )],
            1,
        );
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let result = build_pipeline(&cfg, dir.path(), &EngineRegistry::with_builtin(), clock);
        match result {
            Err(Error::Configuration(msg)) => assert!(msg.contains("edgetpu")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("pipeline built with an unregistered engine"),
        }
    }

    #[test]
    fn stalled_source_costs_one_frame_and_keeps_running() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Duration::from_secs(1)));
        let heartbeat = Heartbeat::new(Arc::clone(&clock));
        let mut chain = Chain::new();
        chain.add(Box::new(HealthChecker::new(heartbeat.clone())));
        let mut pipeline = Pipeline::new(
            "cam",
            Box::new(StallingSource::default()),
            chain,
            heartbeat,
        );

        assert!(pipeline.process_next());
        assert!(pipeline.process_next());
        assert!(pipeline.process_next());
        assert_eq!(pipeline.source().stats().frames_captured, 3);
    }
}
