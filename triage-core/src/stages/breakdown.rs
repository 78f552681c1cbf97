//! Single-shot dimension breakdown: every shifted slice becomes a
//! filtered metric entity, without iterative peeling.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use crate::entity::{EntityType, RangeKind};
use crate::error::{ConfigError, StageError};
use crate::fusion;
use crate::pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
use crate::sources::{AggregateSource, MetadataStore, Window};
use crate::stages::contribution::dimension_costs;

const DEFAULT_TIMEOUT_MS: i64 = 120_000;
const DEFAULT_FETCH_PARALLELISM: usize = 3;

/// Turns each context metric's shifted (dimension, value) slices into
/// filtered Metric entities, `top_k`-normalized across the whole batch.
///
/// Slices with no shift are dropped unless `ignore_score` is set.
/// Per-metric failures are logged and that metric skipped. Properties:
/// `k`, `ignore_score`, `exclude_dimensions`, `timeout_ms`,
/// `parallelism`.
pub struct BreakdownStage {
    output: String,
    inputs: Vec<String>,
    k: i64,
    ignore_score: bool,
    exclude_dimensions: Vec<String>,
    timeout_ms: i64,
    parallelism: usize,
    source: Arc<dyn AggregateSource>,
    metadata: Arc<dyn MetadataStore>,
}

impl BreakdownStage {
    pub fn new(config: StageConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        let parallelism = config.prop_i64("parallelism", DEFAULT_FETCH_PARALLELISM as i64)?;
        if parallelism < 1 {
            return Err(ConfigError::InvalidProperty {
                stage: config.output.clone(),
                property: "parallelism".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            k: config.prop_i64("k", -1)?,
            ignore_score: config.prop_bool("ignore_score", false)?,
            exclude_dimensions: config.prop_str_list("exclude_dimensions")?,
            timeout_ms: config.prop_i64("timeout_ms", DEFAULT_TIMEOUT_MS)?,
            parallelism: parallelism as usize,
            output: config.output,
            inputs: config.inputs,
            source: Arc::clone(&collaborators.source),
            metadata: Arc::clone(&collaborators.metadata),
        })
    }

    async fn dimensions_of(&self, metric_id: i64) -> Result<Vec<String>, StageError> {
        let Some(meta) = self.metadata.metric(metric_id).await? else {
            return Ok(Vec::new());
        };
        let Some(dataset) = self.metadata.dataset(&meta.dataset).await? else {
            return Ok(Vec::new());
        };
        Ok(dataset
            .dimensions
            .iter()
            .filter(|d| !self.exclude_dimensions.contains(d))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Pipeline for BreakdownStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let anomaly = context.time_range(RangeKind::Anomaly)?;
        let baseline = context.time_range(RangeKind::Baseline)?;
        let (start, end) = anomaly.time_bounds().unwrap_or_default();
        let current = Window::new(start, end);
        let (start, end) = baseline.time_bounds().unwrap_or_default();
        let reference = Window::new(start, end);

        let deadline =
            Instant::now() + std::time::Duration::from_millis(self.timeout_ms.max(0) as u64);
        let mut entities = Vec::new();

        for metric in context.filter(EntityType::Metric) {
            let Some(metric_id) = metric.metric_id() else {
                continue;
            };
            let dimensions = self.dimensions_of(metric_id).await?;
            if dimensions.is_empty() {
                warn!(urn = %metric.urn(), "no candidate dimensions, skipping metric");
                continue;
            }

            let costs = match dimension_costs(
                &self.source,
                metric_id,
                metric.filters(),
                &dimensions,
                current,
                reference,
                self.parallelism,
                deadline,
            )
            .await
            {
                Ok(costs) => costs,
                Err(e) => {
                    warn!(urn = %metric.urn(), error = %e, "breakdown failed, skipping metric");
                    continue;
                }
            };

            for cost in costs {
                if cost.score <= 0.0 && !self.ignore_score {
                    continue;
                }
                let mut filters = metric.filters().to_vec();
                filters.push((cost.name, cost.value));
                entities.push(
                    metric
                        .with_filters(&filters)
                        .with_score(cost.score * metric.score()),
                );
            }
        }

        Ok(PipelineResult::new(fusion::top_k_normalized(&entities, self.k)))
    }
}
