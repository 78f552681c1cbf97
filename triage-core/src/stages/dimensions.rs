//! Expands metric dimension filters into Provided dimension entities.

use async_trait::async_trait;

use crate::entity::{Entity, EntityType, Provenance};
use crate::error::{ConfigError, StageError};
use crate::fusion::MaxScoreSet;
use crate::pipeline::{Pipeline, PipelineContext, PipelineResult, StageConfig};

/// Each positive filter `(key, value)` on a context metric becomes a
/// `Dimension` entity carrying the metric's score. Negation filters are
/// search state, not user intent, and are skipped.
pub struct MetricDimensionsStage {
    output: String,
    inputs: Vec<String>,
}

impl MetricDimensionsStage {
    pub fn new(config: StageConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            output: config.output,
            inputs: config.inputs,
        })
    }
}

#[async_trait]
impl Pipeline for MetricDimensionsStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let mut set = MaxScoreSet::new();
        for metric in context.filter(EntityType::Metric) {
            for (key, value) in metric.filters() {
                if value.starts_with('!') {
                    continue;
                }
                set.insert(Entity::dimension(
                    metric.score(),
                    key,
                    value,
                    Provenance::Provided,
                ));
            }
        }
        Ok(PipelineResult::new(set.into_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_expands_filters_skipping_negations() {
        let metric = Entity::metric(0.8, 1).with_filters(&[
            ("country".into(), "US".into()),
            ("env".into(), "!prod".into()),
        ]);
        let mut all = HashMap::new();
        all.insert("input".to_string(), vec![metric]);
        let ctx = PipelineContext::scoped(&all, &["input".to_string()]);

        let stage = MetricDimensionsStage::new(StageConfig::new("dims", &["input"])).unwrap();
        let result = stage.run(&ctx).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(
            result.entities[0].urn(),
            "triage:dimension:country:us:provided"
        );
        assert_eq!(result.entities[0].score(), 0.8);
    }

    #[tokio::test]
    async fn test_dedups_across_metrics_max_score() {
        let a = Entity::metric(0.3, 1).with_filters(&[("country".into(), "us".into())]);
        let b = Entity::metric(0.9, 2).with_filters(&[("country".into(), "US".into())]);
        let mut all = HashMap::new();
        all.insert("input".to_string(), vec![a, b]);
        let ctx = PipelineContext::scoped(&all, &["input".to_string()]);

        let stage = MetricDimensionsStage::new(StageConfig::new("dims", &["input"])).unwrap();
        let result = stage.run(&ctx).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].score(), 0.9);
    }
}
