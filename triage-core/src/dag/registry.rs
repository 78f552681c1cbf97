//! String-keyed stage factory registry.
//!
//! Frameworks are declared in configuration by stage kind; the registry
//! maps each kind to a factory closure that validates the stage's
//! property bag and wires in the collaborators. Unknown kinds and bad
//! properties fail at load time, before anything runs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::pipeline::{Collaborators, Pipeline, StageConfig};

/// Builds one stage from its configuration and the shared collaborators.
pub type StageFactory =
    Box<dyn Fn(StageConfig, &Collaborators) -> Result<Arc<dyn Pipeline>, ConfigError> + Send + Sync>;

#[derive(Default)]
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a kind name, replacing any previous one.
    pub fn register(&mut self, kind: &str, factory: StageFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Instantiates a stage, failing on unregistered kinds.
    pub fn build(
        &self,
        kind: &str,
        config: StageConfig,
        collaborators: &Collaborators,
    ) -> Result<Arc<dyn Pipeline>, ConfigError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownStageKind {
                stage: config.output.clone(),
                kind: kind.to_string(),
            })?;
        factory(config, collaborators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::error::StageError;
    use crate::pipeline::{PipelineContext, PipelineResult};
    use crate::sources::{InMemoryMetadata, InMemoryRelations, InMemorySource};
    use async_trait::async_trait;

    struct NullStage {
        output: String,
        inputs: Vec<String>,
    }

    #[async_trait]
    impl Pipeline for NullStage {
        fn output_name(&self) -> &str {
            &self.output
        }
        fn input_names(&self) -> &[String] {
            &self.inputs
        }
        async fn run(&self, _context: &PipelineContext) -> Result<PipelineResult, StageError> {
            Ok(PipelineResult::new(vec![Entity::dataset(1.0, "fixture")]))
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            source: Arc::new(InMemorySource::new()),
            metadata: Arc::new(InMemoryMetadata::new()),
            relations: Arc::new(InMemoryRelations::new()),
        }
    }

    #[test]
    fn test_build_registered_kind() {
        let mut registry = StageRegistry::new();
        registry.register(
            "null",
            Box::new(|cfg, _| {
                Ok(Arc::new(NullStage {
                    output: cfg.output,
                    inputs: cfg.inputs,
                }) as Arc<dyn Pipeline>)
            }),
        );
        let stage = registry
            .build("null", StageConfig::new("out", &["input"]), &collaborators())
            .unwrap();
        assert_eq!(stage.output_name(), "out");
    }

    #[test]
    fn test_unknown_kind_fails() {
        let registry = StageRegistry::new();
        let result = registry.build("nope", StageConfig::new("out", &[]), &collaborators());
        assert!(matches!(result, Err(ConfigError::UnknownStageKind { .. })));
    }
}
