//! The pipeline contract: the unit of computation in a framework DAG.
//!
//! A pipeline is configured once from a [`StageConfig`] (by its factory in
//! the stage registry) and invoked repeatedly with a [`PipelineContext`]
//! scoped to its declared inputs. `context.filter(..)` is the only way a
//! stage observes upstream data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{Entity, EntityKind, EntityType, RangeKind};
use crate::error::{ConfigError, StageError};
use crate::fusion::MaxScoreSet;
use crate::sources::{AggregateSource, MetadataStore, RelationStore};

/// Read-only handles to the external collaborators a stage may need.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn AggregateSource>,
    pub metadata: Arc<dyn MetadataStore>,
    pub relations: Arc<dyn RelationStore>,
}

/// Static configuration of one stage: its output name, upstream input
/// names, and a property bag.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub output: String,
    pub inputs: Vec<String>,
    pub properties: HashMap<String, serde_json::Value>,
}

impl StageConfig {
    pub fn new(output: &str, inputs: &[&str]) -> Self {
        Self {
            output: output.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn prop_i64(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.properties.get(key) {
            None => Ok(default),
            Some(v) => v.as_i64().ok_or_else(|| self.invalid(key, "expected integer")),
        }
    }

    pub fn prop_f64(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.properties.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| self.invalid(key, "expected number")),
        }
    }

    pub fn prop_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.properties.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.invalid(key, "expected boolean")),
        }
    }

    pub fn prop_str(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.properties.get(key) {
            None => Ok(default.to_string()),
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| self.invalid(key, "expected string")),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<String, ConfigError> {
        match self.properties.get(key) {
            None => Err(ConfigError::MissingProperty {
                stage: self.output.clone(),
                property: key.to_string(),
            }),
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| self.invalid(key, "expected string")),
        }
    }

    pub fn prop_str_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        match self.properties.get(key) {
            None => Ok(Vec::new()),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(key, "expected list of strings"))
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "expected list of strings")),
        }
    }

    fn invalid(&self, key: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidProperty {
            stage: self.output.clone(),
            property: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The entities a stage sees: its declared upstream outputs, keyed by
/// output name. Built by the executor per stage invocation.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    outputs: HashMap<String, Vec<Entity>>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, entities: Vec<Entity>) {
        self.outputs.insert(name.to_string(), entities);
    }

    /// Builds the context for one stage from the global output map,
    /// restricted to the stage's declared inputs.
    pub fn scoped(all: &HashMap<String, Vec<Entity>>, inputs: &[String]) -> Self {
        let mut ctx = Self::new();
        for name in inputs {
            if let Some(entities) = all.get(name) {
                ctx.insert(name, entities.clone());
            }
        }
        ctx
    }

    /// Every entity of the requested variant, merged across the declared
    /// upstream outputs (URN-deduped, max score, encounter order).
    pub fn filter(&self, ty: EntityType) -> Vec<Entity> {
        let mut set = MaxScoreSet::new();
        let mut names: Vec<&String> = self.outputs.keys().collect();
        names.sort(); // deterministic merge order
        for name in names {
            set.extend(
                self.outputs[name]
                    .iter()
                    .filter(|e| e.entity_type() == ty)
                    .cloned(),
            );
        }
        set.into_vec()
    }

    /// Every entity regardless of variant, merged across the declared
    /// upstream outputs (URN-deduped, max score, encounter order).
    pub fn all(&self) -> Vec<Entity> {
        let mut set = MaxScoreSet::new();
        let mut names: Vec<&String> = self.outputs.keys().collect();
        names.sort();
        for name in names {
            set.extend(self.outputs[name].iter().cloned());
        }
        set.into_vec()
    }

    /// The single time range of the given kind, required by derived
    /// analysis stages.
    pub fn time_range(&self, kind: RangeKind) -> Result<Entity, StageError> {
        self.filter(EntityType::TimeRange)
            .into_iter()
            .find(|e| matches!(e.kind(), EntityKind::TimeRange { kind: k, .. } if *k == kind))
            .ok_or_else(|| StageError::MissingTimeRange {
                kind: kind.as_str().to_string(),
            })
    }
}

/// Output of one stage invocation, published under the stage's output
/// name.
#[derive(Debug, Default)]
pub struct PipelineResult {
    pub entities: Vec<Entity>,
}

impl PipelineResult {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// One DAG node: a function from upstream entities to a new entity set.
///
/// A stage receiving no matching upstream entities returns an empty
/// result rather than failing; a returned error fails the invocation.
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn output_name(&self) -> &str;

    fn input_names(&self) -> &[String];

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError>;
}
