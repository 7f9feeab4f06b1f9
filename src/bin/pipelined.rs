//! pipelined - edge detection pipeline daemon
//!
//! This daemon:
//! 1. Loads the pipeline definitions named by PIPELINE_CONFIG
//! 2. Builds one element chain per pipeline (source → elements → health checker)
//! 3. Runs every pipeline on its own thread
//! 4. Checks pipeline heartbeats, healing stalled sources and exiting on
//!    unrecoverable ones

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use edge_pipeline::{EngineRegistry, MonotonicClock, PipelineServer, ServiceConfig};

const HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(3);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ServiceConfig::load()?;
    log::info!(
        "loaded {} pipeline(s), models from {}",
        cfg.pipelines.len(),
        cfg.models_dir.display()
    );

    let registry = EngineRegistry::with_builtin();
    log::info!("detection engines available: {}", registry.list().join(", "));

    let mut server = PipelineServer::new(&cfg, &registry, Arc::new(MonotonicClock::new()))?;
    server.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("pipelined running; Ctrl-C to stop");
    let outcome = loop {
        match rx.recv_timeout(HEALTHCHECK_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break Ok(());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        let report = server.healthcheck();
        if !report.healthy {
            break Err(anyhow!("pipelines are in an unrecoverable state"));
        }
        if !report.healing.is_empty() {
            log::warn!("healing pipelines: {}", report.healing.join(", "));
        }
    };

    server.stop()?;
    outcome
}
