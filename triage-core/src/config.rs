//! YAML configuration model for the engine: named frameworks, each a
//! list of stage descriptors wired by output name.
//!
//! ```yaml
//! parallelism: 4
//! frameworks:
//!   metric_rca:
//!     - output: dimensions
//!       kind: metric_dimensions
//!       inputs: [input]
//!     - output: contribution
//!       kind: contribution
//!       inputs: [input, dimensions]
//!       properties:
//!         k: 3
//! ```
//!
//! Properties are an open bag; each stage factory validates the keys it
//! knows about at load time.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::pipeline::StageConfig;

pub const DEFAULT_PARALLELISM: usize = 4;

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

/// One stage declaration inside a framework.
#[derive(Debug, Clone, Deserialize)]
pub struct StageDescriptor {
    pub output: String,
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl StageDescriptor {
    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            output: self.output.clone(),
            inputs: self.inputs.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// Root of the engine configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    pub frameworks: HashMap<String, Vec<StageDescriptor>>,
}

impl EngineConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn framework(&self, name: &str) -> Result<&[StageDescriptor], ConfigError> {
        self.frameworks
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::UnknownFramework {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
parallelism: 2
frameworks:
  metric_rca:
    - output: dimensions
      kind: metric_dimensions
      inputs: [input]
    - output: contribution
      kind: contribution
      inputs: [input, dimensions]
      properties:
        k: 3
"#;

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.parallelism, 2);
        let stages = config.framework("metric_rca").unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].kind, "contribution");
        let cfg = stages[1].stage_config();
        assert_eq!(cfg.prop_i64("k", -1).unwrap(), 3);
        assert_eq!(cfg.inputs, vec!["input", "dimensions"]);
    }

    #[test]
    fn test_sample_kinds_are_builtins() {
        let registry = crate::dag::registry::StageRegistry::with_builtins();
        let config = EngineConfig::from_yaml(SAMPLE).unwrap();
        for stage in config.framework("metric_rca").unwrap() {
            assert!(registry.contains(&stage.kind), "unknown kind {}", stage.kind);
        }
    }

    #[test]
    fn test_parallelism_defaults() {
        let config = EngineConfig::from_yaml("frameworks: {}").unwrap();
        assert_eq!(config.parallelism, DEFAULT_PARALLELISM);
    }

    #[test]
    fn test_unknown_framework() {
        let config = EngineConfig::from_yaml(SAMPLE).unwrap();
        assert!(matches!(
            config.framework("nope"),
            Err(ConfigError::UnknownFramework { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frameworks.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert!(config.frameworks.contains_key("metric_rca"));
        assert!(matches!(
            EngineConfig::from_file(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        assert!(matches!(
            EngineConfig::from_yaml("frameworks: ["),
            Err(ConfigError::Parse { .. })
        ));
    }
}
