//! detect - run object detection on a single source from the command line

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use edge_pipeline::pipeline::Next;
use edge_pipeline::{
    open_source, Chain, DetectConfig, EngineRegistry, Error, ObjectDetect, OverlayConfig,
    PipeElement, Sample, SourceConfig, SvgOverlay,
};

const DEFAULT_MODEL: &str = "mobilenet_ssd_v2_coco_quant_postprocess.onnx";
const DEFAULT_LABELS: &str = "coco_labels.txt";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Model path, relative paths resolve under --models-dir.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: PathBuf,
    /// Label file path, relative paths resolve under --models-dir.
    #[arg(long, default_value = DEFAULT_LABELS)]
    labels: PathBuf,
    /// Directory holding models and label files.
    #[arg(long, env = "PIPELINE_MODELS_DIR", default_value = "ai_models")]
    models_dir: PathBuf,
    /// Number of highest scoring objects to keep.
    #[arg(long = "top_k", alias = "top-k", default_value_t = 3)]
    top_k: usize,
    /// Object score threshold.
    #[arg(long, default_value_t = 0.2)]
    threshold: f32,
    /// Detection engine name.
    #[arg(long, default_value = "tract")]
    engine: String,
    /// Frame source URI (stub://, rtsp://, v4l2://, or a media file).
    #[arg(long, default_value = "stub://camera")]
    source: String,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Write each frame's SVG overlay into this directory.
    #[arg(long)]
    out: Option<PathBuf>,
}

/// Terminal element: logs each overlay and optionally writes it to disk.
struct OverlaySink {
    out: Option<PathBuf>,
    written: u64,
}

impl PipeElement for OverlaySink {
    fn name(&self) -> &str {
        "overlay_sink"
    }

    fn receive_next_sample(
        &mut self,
        sample: Sample,
        _next: Next<'_>,
    ) -> edge_pipeline::Result<()> {
        let overlay = match sample {
            Sample::Overlay(overlay) => overlay,
            other => {
                return Err(Error::UnexpectedSample {
                    element: self.name().to_string(),
                    expected: "overlay",
                    found: other.kind(),
                })
            }
        };
        self.written += 1;
        log::info!("frame overlay #{} with {} object(s)", self.written, overlay.objects);
        if let Some(dir) = &self.out {
            let path = dir.join(format!("overlay_{:06}.svg", self.written));
            fs::write(&path, overlay.svg.as_bytes())?;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.top_k == 0 {
        return Err(anyhow!("top_k must be >= 1"));
    }

    let mut detect_cfg = DetectConfig::new(&args.model, &args.labels);
    detect_cfg.top_k = args.top_k;
    detect_cfg.confidence_threshold = args.threshold;
    detect_cfg.engine = args.engine.clone();
    detect_cfg.resolve_paths(&args.models_dir);
    detect_cfg.validate()?;
    log::info!(
        "loading {} with {} labels",
        detect_cfg.model.display(),
        detect_cfg.labels.display()
    );

    let registry = EngineRegistry::with_builtin();
    let engine = registry.create(&detect_cfg)?;
    let stage = ObjectDetect::new(&detect_cfg, engine)?;

    if let Some(dir) = &args.out {
        fs::create_dir_all(dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
    }

    let mut chain = Chain::new();
    let ids = [
        chain.add(Box::new(stage)),
        chain.add(Box::new(SvgOverlay::new(OverlayConfig::default())?)),
        chain.add(Box::new(OverlaySink {
            out: args.out.clone(),
            written: 0,
        })),
    ];
    chain.link(&ids)?;

    let mut source = open_source(SourceConfig {
        uri: args.source.clone(),
        max_frames: args.max_frames,
        ..SourceConfig::default()
    })?;
    source.connect()?;

    let mut processed = 0u64;
    while let Some(frame) = source.next_frame()? {
        chain.push(Sample::Image(frame))?;
        processed += 1;
        if args.max_frames.is_some_and(|max| processed >= max) {
            break;
        }
    }
    log::info!("processed {} frame(s) from {}", processed, args.source);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_pipeline::Frame;

    #[test]
    fn top_k_flag_accepts_both_spellings() {
        let args = Args::try_parse_from(["detect", "--top_k", "5"]).expect("parse --top_k");
        assert_eq!(args.top_k, 5);
        let args = Args::try_parse_from(["detect", "--top-k", "7"]).expect("parse --top-k");
        assert_eq!(args.top_k, 7);
        let args = Args::try_parse_from(["detect"]).expect("parse defaults");
        assert_eq!(args.top_k, 3);
        assert_eq!(args.threshold, 0.2);
    }

    #[test]
    fn sink_rejects_non_overlay_samples() {
        let mut chain = Chain::new();
        chain.add(Box::new(OverlaySink {
            out: None,
            written: 0,
        }));
        let frame = Frame::from_rgb(vec![0u8; 3], 1, 1, 1).expect("frame");
        let result = chain.push(Sample::Image(frame));
        assert!(matches!(
            result,
            Err(Error::UnexpectedSample {
                expected: "overlay",
                found: "image",
                ..
            })
        ));
    }
}
