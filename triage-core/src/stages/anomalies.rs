//! Past-anomaly retrieval: prior anomalies on context metrics, scored by
//! time proximity and weighted by the surfacing window and metric.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{Entity, EntityKind, EntityType, RangeKind};
use crate::error::{ConfigError, StageError};
use crate::fusion::{self, MaxScoreSet};
use crate::pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
use crate::scoring::{StrategyType, TimeFrame, time_score};
use crate::sources::MetadataStore;

const ANOMALY_EVENT_SOURCE: &str = "anomaly";

/// Fetches historic anomalies of every context metric within the anomaly
/// and baseline windows and emits them as event entities with
/// `score = time_score × window.score × metric.score`.
///
/// Children of merged anomalies are skipped. Properties: `strategy`
/// (default `triangular`), `k`.
pub struct AnomalyEventsStage {
    output: String,
    inputs: Vec<String>,
    strategy: StrategyType,
    k: i64,
    metadata: Arc<dyn MetadataStore>,
}

impl AnomalyEventsStage {
    pub fn new(config: StageConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        Ok(Self {
            strategy: StrategyType::parse(&config.prop_str("strategy", "triangular")?)?,
            k: config.prop_i64("k", -1)?,
            output: config.output,
            inputs: config.inputs,
            metadata: Arc::clone(&collaborators.metadata),
        })
    }
}

#[async_trait]
impl Pipeline for AnomalyEventsStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let metrics = context.filter(EntityType::Metric);
        let lookback = context
            .time_range(RangeKind::Analysis)
            .ok()
            .and_then(|e| e.time_bounds())
            .map(|(start, _)| start);

        let mut set = MaxScoreSet::new();
        for kind in [RangeKind::Anomaly, RangeKind::Baseline] {
            let Ok(window) = context.time_range(kind) else {
                continue;
            };
            let EntityKind::TimeRange { start, end, .. } = window.kind() else {
                continue;
            };
            let (start, end) = (*start, *end);
            let frame = TimeFrame::new(lookback.unwrap_or(start), start, end);
            let window = Arc::new(window);

            for metric in &metrics {
                let Some(id) = metric.metric_id() else {
                    continue;
                };
                for record in self.metadata.anomalies(id, frame.lookback, end).await? {
                    if record.child {
                        continue;
                    }
                    let score = time_score(self.strategy, frame, record.start)
                        * window.score()
                        * metric.score();
                    let entity = Entity::event(
                        score,
                        ANOMALY_EVENT_SOURCE,
                        record.id,
                        record.start,
                        record.end,
                        record.dimensions,
                    )
                    .with_related(vec![Arc::clone(&window), Arc::new(metric.clone())]);
                    set.insert(entity);
                }
            }
        }

        Ok(PipelineResult::new(fusion::top_k(&set.into_vec(), self.k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{AnomalyRecord, InMemoryMetadata, InMemoryRelations, InMemorySource};
    use std::collections::{BTreeMap, HashMap};

    fn anomaly(id: i64, metric_id: i64, start: i64, child: bool) -> AnomalyRecord {
        AnomalyRecord {
            id,
            metric_id,
            start,
            end: start + 50,
            dimensions: BTreeMap::new(),
            child,
        }
    }

    fn collaborators(anomalies: Vec<AnomalyRecord>) -> Collaborators {
        Collaborators {
            source: Arc::new(InMemorySource::new()),
            metadata: Arc::new(InMemoryMetadata::new().with_anomalies(anomalies)),
            relations: Arc::new(InMemoryRelations::new()),
        }
    }

    fn context(entities: Vec<Entity>) -> PipelineContext {
        let mut all = HashMap::new();
        all.insert("input".to_string(), entities);
        PipelineContext::scoped(&all, &["input".to_string()])
    }

    #[tokio::test]
    async fn test_scores_weighted_by_window_and_metric() {
        let stage = AnomalyEventsStage::new(
            StageConfig::new("anomalies", &["input"]),
            &collaborators(vec![anomaly(10, 1, 1000, false)]),
        )
        .unwrap();
        let ctx = context(vec![
            Entity::time_range(RangeKind::Anomaly, 1000, 2000, 1.0),
            Entity::time_range(RangeKind::Analysis, 0, 2000, 1.0),
            Entity::metric(0.5, 1),
        ]);
        let result = stage.run(&ctx).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        // triangular peak at window start, halved by the metric score
        assert_eq!(result.entities[0].score(), 0.5);
        assert_eq!(result.entities[0].related().len(), 2);
    }

    #[tokio::test]
    async fn test_child_anomalies_filtered() {
        let stage = AnomalyEventsStage::new(
            StageConfig::new("anomalies", &["input"]),
            &collaborators(vec![anomaly(10, 1, 1000, true), anomaly(11, 1, 1100, false)]),
        )
        .unwrap();
        let ctx = context(vec![
            Entity::time_range(RangeKind::Anomaly, 1000, 2000, 1.0),
            Entity::metric(1.0, 1),
        ]);
        let result = stage.run(&ctx).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].urn(), "triage:event:anomaly:11");
    }
}
