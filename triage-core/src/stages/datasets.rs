//! Metric ↔ dataset expansion via the metadata store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::entity::{Entity, EntityType};
use crate::error::{ConfigError, StageError};
use crate::fusion::MaxScoreSet;
use crate::pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
use crate::sources::MetadataStore;

/// Maps each context metric to its owning dataset. Metrics the metadata
/// store cannot resolve are logged and skipped.
pub struct MetricDatasetStage {
    output: String,
    inputs: Vec<String>,
    metadata: Arc<dyn MetadataStore>,
}

impl MetricDatasetStage {
    pub fn new(config: StageConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        Ok(Self {
            output: config.output,
            inputs: config.inputs,
            metadata: Arc::clone(&collaborators.metadata),
        })
    }
}

#[async_trait]
impl Pipeline for MetricDatasetStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let mut set = MaxScoreSet::new();
        for metric in context.filter(EntityType::Metric) {
            let Some(id) = metric.metric_id() else {
                continue;
            };
            match self.metadata.metric(id).await? {
                Some(meta) => {
                    set.insert(Entity::dataset(metric.score(), &meta.dataset));
                }
                None => {
                    warn!(metric_id = id, "metric not found in metadata, skipping");
                }
            }
        }
        Ok(PipelineResult::new(set.into_vec()))
    }
}

/// Maps each context dataset to its active native metrics.
///
/// Properties: `exclude_metrics` (list of metric names to drop, on top of
/// pruning inactive metrics).
pub struct DatasetMetricsStage {
    output: String,
    inputs: Vec<String>,
    exclude_metrics: Vec<String>,
    metadata: Arc<dyn MetadataStore>,
}

impl DatasetMetricsStage {
    pub fn new(config: StageConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        Ok(Self {
            exclude_metrics: config.prop_str_list("exclude_metrics")?,
            output: config.output,
            inputs: config.inputs,
            metadata: Arc::clone(&collaborators.metadata),
        })
    }
}

#[async_trait]
impl Pipeline for DatasetMetricsStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let mut set = MaxScoreSet::new();
        for dataset in context.filter(EntityType::Dataset) {
            let crate::entity::EntityKind::Dataset { name } = dataset.kind() else {
                continue;
            };
            for meta in self.metadata.metrics_of_dataset(name).await? {
                if !meta.active || self.exclude_metrics.contains(&meta.name) {
                    continue;
                }
                set.insert(Entity::metric(dataset.score(), meta.id));
            }
        }
        Ok(PipelineResult::new(set.into_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{InMemoryMetadata, InMemoryRelations, InMemorySource, MetricMeta};
    use std::collections::HashMap;

    fn collaborators() -> Collaborators {
        let metadata = InMemoryMetadata::new().with_metrics(vec![
            MetricMeta {
                id: 1,
                name: "pageviews".to_string(),
                dataset: "web".to_string(),
                active: true,
            },
            MetricMeta {
                id: 2,
                name: "errors".to_string(),
                dataset: "web".to_string(),
                active: true,
            },
            MetricMeta {
                id: 3,
                name: "stale".to_string(),
                dataset: "web".to_string(),
                active: false,
            },
        ]);
        Collaborators {
            source: Arc::new(InMemorySource::new()),
            metadata: Arc::new(metadata),
            relations: Arc::new(InMemoryRelations::new()),
        }
    }

    fn context(entities: Vec<Entity>) -> PipelineContext {
        let mut all = HashMap::new();
        all.insert("input".to_string(), entities);
        PipelineContext::scoped(&all, &["input".to_string()])
    }

    #[tokio::test]
    async fn test_metric_to_dataset_skips_unresolved() {
        let stage = MetricDatasetStage::new(
            StageConfig::new("datasets", &["input"]),
            &collaborators(),
        )
        .unwrap();
        let ctx = context(vec![Entity::metric(0.7, 1), Entity::metric(1.0, 99)]);
        let result = stage.run(&ctx).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].urn(), "triage:dataset:web");
        assert_eq!(result.entities[0].score(), 0.7);
    }

    #[tokio::test]
    async fn test_dataset_to_metrics_prunes_inactive_and_excluded() {
        let stage = DatasetMetricsStage::new(
            StageConfig::new("metrics", &["input"])
                .with_property("exclude_metrics", serde_json::json!(["errors"])),
            &collaborators(),
        )
        .unwrap();
        let ctx = context(vec![Entity::dataset(1.0, "web")]);
        let result = stage.run(&ctx).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].urn(), "triage:metric:1");
    }
}
