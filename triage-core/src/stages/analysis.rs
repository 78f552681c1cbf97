//! Ranks context metrics by how anomalous their recent behavior looks:
//! quantile thresholds fit on the baseline window, violation ratio
//! measured over the anomaly window.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::entity::{Entity, EntityType, RangeKind};
use crate::error::{ConfigError, StageError};
use crate::fusion;
use crate::pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
use crate::sources::{AggregateSource, MetadataStore, Window};

const DEFAULT_QUANTILE: f64 = 0.90;
const DEFAULT_GRANULARITY_MS: i64 = 3_600_000;

/// Scores each context metric by the fraction of anomaly-window buckets
/// that fall outside quantile thresholds fit on the baseline window.
///
/// Per-metric fetch failures are logged and the metric skipped; the
/// remaining metrics still produce results. Properties: `quantile`
/// (default 0.90), `k`.
pub struct MetricAnalysisStage {
    output: String,
    inputs: Vec<String>,
    quantile: f64,
    k: i64,
    source: Arc<dyn AggregateSource>,
    metadata: Arc<dyn MetadataStore>,
}

impl MetricAnalysisStage {
    pub fn new(config: StageConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        let quantile = config.prop_f64("quantile", DEFAULT_QUANTILE)?;
        if !(0.5..1.0).contains(&quantile) {
            return Err(ConfigError::InvalidProperty {
                stage: config.output.clone(),
                property: "quantile".to_string(),
                reason: "expected a value in [0.5, 1.0)".to_string(),
            });
        }
        Ok(Self {
            quantile,
            k: config.prop_i64("k", -1)?,
            output: config.output,
            inputs: config.inputs,
            source: Arc::clone(&collaborators.source),
            metadata: Arc::clone(&collaborators.metadata),
        })
    }

    async fn violation_ratio(&self, metric: &Entity, test: Window, train: Window) -> Result<f64, StageError> {
        let id = metric.metric_id().unwrap_or_default();
        let granularity = match self.metadata.metric(id).await? {
            Some(meta) => self
                .metadata
                .dataset(&meta.dataset)
                .await?
                .map(|d| d.granularity_ms)
                .unwrap_or(DEFAULT_GRANULARITY_MS),
            None => DEFAULT_GRANULARITY_MS,
        };

        let train_series = self
            .source
            .series(id, train, metric.filters(), granularity)
            .await?;
        let test_series = self
            .source
            .series(id, test, metric.filters(), granularity)
            .await?;
        if train_series.is_empty() || test_series.is_empty() {
            return Ok(0.0);
        }

        let mut values: Vec<f64> = train_series.iter().map(|(_, v)| *v).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let lower = quantile_of(&values, 1.0 - self.quantile);
        let upper = quantile_of(&values, self.quantile);

        let violations = test_series
            .iter()
            .filter(|(_, v)| *v < lower || *v > upper)
            .count();
        Ok(violations as f64 / test_series.len() as f64)
    }
}

/// Nearest-rank quantile over a sorted slice.
fn quantile_of(sorted: &[f64], q: f64) -> f64 {
    let index = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[async_trait]
impl Pipeline for MetricAnalysisStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let anomaly = context.time_range(RangeKind::Anomaly)?;
        let baseline = context.time_range(RangeKind::Baseline)?;
        let (test_start, test_end) = anomaly.time_bounds().unwrap_or_default();
        let (train_start, train_end) = baseline.time_bounds().unwrap_or_default();
        let test = Window::new(test_start, test_end);
        let train = Window::new(train_start, train_end);

        let mut scored = Vec::new();
        for metric in context.filter(EntityType::Metric) {
            match self.violation_ratio(&metric, test, train).await {
                Ok(ratio) => scored.push(metric.with_score(ratio)),
                Err(e) => {
                    warn!(urn = %metric.urn(), error = %e, "series fetch failed, skipping metric");
                }
            }
        }

        Ok(PipelineResult::new(fusion::top_k_normalized(&scored, self.k)))
    }
}
