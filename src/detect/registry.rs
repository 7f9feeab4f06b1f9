use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backends::StubBackend;
use super::engine::DetectionEngine;
use super::stage::DetectConfig;

/// Builds an engine from a validated detection config.
pub type EngineFactory = fn(&DetectConfig) -> Result<Box<dyn DetectionEngine>>;

/// Name → factory table for detection engines.
///
/// `with_builtin` registers `stub` always and `tract` when the
/// `backend-tract` feature is compiled in.
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |_| Ok(Box::new(StubBackend::new())));
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |cfg| {
            let backend = super::backends::TractBackend::new(
                &cfg.model,
                cfg.input_width,
                cfg.input_height,
            )?;
            Ok(Box::new(backend))
        });
        registry
    }

    /// Register a factory. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, name: &str, factory: EngineFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered engine names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the engine named by `cfg.engine`.
    pub fn create(&self, cfg: &DetectConfig) -> Result<Box<dyn DetectionEngine>> {
        let factory = self.factories.get(&cfg.engine).ok_or_else(|| {
            anyhow!(
                "detection engine '{}' not registered (available: {})",
                cfg.engine,
                self.list().join(", ")
            )
        })?;
        let mut engine = factory(cfg)?;
        engine.warm_up()?;
        log::info!("detection engine {} ready for {}", engine.name(), cfg.model.display());
        Ok(engine)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(engine: &str) -> DetectConfig {
        DetectConfig {
            engine: engine.to_string(),
            ..DetectConfig::default()
        }
    }

    #[test]
    fn builtin_registry_creates_stub() -> Result<()> {
        let registry = EngineRegistry::with_builtin();
        assert!(registry.contains("stub"));
        let engine = registry.create(&config("stub"))?;
        assert_eq!(engine.name(), "stub");
        Ok(())
    }

    #[test]
    fn unknown_engine_is_an_error() {
        let registry = EngineRegistry::new();
        let err = registry.create(&config("edgetpu")).err().expect("missing engine");
        assert!(err.to_string().contains("edgetpu"));
    }
}
