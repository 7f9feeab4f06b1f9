use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::Error;
use crate::ingest::SourceConfig;

const DEFAULT_MODELS_DIR: &str = "ai_models";
const DEFAULT_HEAL_AFTER_SECS: u64 = 10;
const DEFAULT_FAIL_AFTER_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    models_dir: Option<PathBuf>,
    health: Option<HealthConfigFile>,
    pipelines: Option<Vec<PipelineConfig>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HealthConfigFile {
    heal_after_secs: Option<u64>,
    fail_after_secs: Option<u64>,
}

/// One pipeline: a source followed by an ordered element list.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub elements: Vec<ElementSpec>,
}

/// A single-key element definition such as `{ detect_objects = { ... } }`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(try_from = "BTreeMap<String, serde_json::Value>")]
pub struct ElementSpec {
    pub kind: String,
    pub options: serde_json::Value,
}

impl ElementSpec {
    /// Decode the element's options into its config type.
    pub fn parse_options<T: DeserializeOwned>(&self) -> crate::Result<T> {
        let options = match &self.options {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(options).map_err(|e| {
            Error::Configuration(format!("invalid {} options: {}", self.kind, e))
        })
    }
}

impl TryFrom<BTreeMap<String, serde_json::Value>> for ElementSpec {
    type Error = String;

    fn try_from(map: BTreeMap<String, serde_json::Value>) -> std::result::Result<Self, String> {
        if map.len() != 1 {
            return Err(format!(
                "element definition must have exactly one key, found {}",
                map.len()
            ));
        }
        let (kind, options) = map
            .into_iter()
            .next()
            .ok_or_else(|| "empty element definition".to_string())?;
        Ok(Self { kind, options })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthSettings {
    /// Heartbeat lapse after which a pipeline is asked to heal.
    pub heal_after: Duration,
    /// Heartbeat lapse after which a pipeline is reported unrecoverable.
    pub fail_after: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            heal_after: Duration::from_secs(DEFAULT_HEAL_AFTER_SECS),
            fail_after: Duration::from_secs(DEFAULT_FAIL_AFTER_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Base directory for relative model and label paths.
    pub models_dir: PathBuf,
    pub health: HealthSettings,
    pub pipelines: Vec<PipelineConfig>,
}

impl ServiceConfig {
    /// Load from the file named by `PIPELINE_CONFIG`, then apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PIPELINE_CONFIG")
            .map_err(|_| anyhow!("PIPELINE_CONFIG must name a pipeline config file"))?;
        Self::load_from(Path::new(&config_path))
    }

    /// Load from an explicit file, then apply environment overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let file_cfg = read_config_file(path)?;
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let models_dir = file
            .models_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR));
        let health = HealthSettings {
            heal_after: Duration::from_secs(
                file.health
                    .as_ref()
                    .and_then(|h| h.heal_after_secs)
                    .unwrap_or(DEFAULT_HEAL_AFTER_SECS),
            ),
            fail_after: Duration::from_secs(
                file.health
                    .as_ref()
                    .and_then(|h| h.fail_after_secs)
                    .unwrap_or(DEFAULT_FAIL_AFTER_SECS),
            ),
        };
        Self {
            models_dir,
            health,
            pipelines: file.pipelines.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("PIPELINE_MODELS_DIR") {
            if !dir.trim().is_empty() {
                self.models_dir = PathBuf::from(dir);
            }
        }
        if let Ok(secs) = std::env::var("PIPELINE_HEAL_AFTER_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("PIPELINE_HEAL_AFTER_SECS must be an integer number of seconds")
            })?;
            self.health.heal_after = Duration::from_secs(secs);
        }
        if let Ok(secs) = std::env::var("PIPELINE_FAIL_AFTER_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("PIPELINE_FAIL_AFTER_SECS must be an integer number of seconds")
            })?;
            self.health.fail_after = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pipelines.is_empty() {
            return Err(anyhow!("config must define at least one pipeline"));
        }
        let mut seen = std::collections::HashSet::new();
        for pipeline in &self.pipelines {
            if pipeline.name.trim().is_empty() {
                return Err(anyhow!("pipeline name must not be empty"));
            }
            if !seen.insert(pipeline.name.as_str()) {
                return Err(anyhow!("duplicate pipeline name {}", pipeline.name));
            }
            pipeline
                .source
                .validate()
                .map_err(|e| anyhow!("pipeline {}: {}", pipeline.name, e))?;
        }
        if self.health.heal_after.is_zero() {
            return Err(anyhow!("heal_after must be greater than zero"));
        }
        if self.health.fail_after <= self.health.heal_after {
            return Err(anyhow!("fail_after must be greater than heal_after"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_spec_requires_single_key() {
        let ok: Vec<ElementSpec> =
            serde_json::from_str(r#"[{"detect_objects": {"model": "m"}}, {"svg_overlay": null}]"#)
                .unwrap();
        assert_eq!(ok[0].kind, "detect_objects");
        assert_eq!(ok[1].kind, "svg_overlay");

        let two_keys: std::result::Result<Vec<ElementSpec>, _> =
            serde_json::from_str(r#"[{"a": {}, "b": {}}]"#);
        assert!(two_keys.is_err());
    }

    #[test]
    fn null_options_parse_as_defaults() {
        let spec = ElementSpec {
            kind: "svg_overlay".to_string(),
            options: serde_json::Value::Null,
        };
        let cfg: crate::overlay::OverlayConfig = spec.parse_options().unwrap();
        assert_eq!(cfg, crate::overlay::OverlayConfig::default());
    }

    #[test]
    fn rejects_duplicate_names_and_inverted_thresholds() {
        let pipeline = PipelineConfig {
            name: "a".to_string(),
            source: SourceConfig::new("stub://a"),
            elements: Vec::new(),
        };
        let mut cfg = ServiceConfig {
            models_dir: PathBuf::from("models"),
            health: HealthSettings::default(),
            pipelines: vec![pipeline.clone(), pipeline],
        };
        assert!(cfg.validate().is_err());

        cfg.pipelines.pop();
        assert!(cfg.validate().is_ok());

        cfg.health.fail_after = Duration::from_secs(5);
        assert!(cfg.validate().is_err());
    }
}
