//! Iterative dimension-contribution attribution ("cube peeling").
//!
//! Each iteration finds the (dimension, value) slice whose contribution
//! share shifted the most between the baseline and anomaly windows,
//! emits it, then appends a negation filter and searches the remainder.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::entity::{Entity, EntityType, Provenance, RangeKind};
use crate::error::{ConfigError, SourceError, StageError};
use crate::fusion::MaxScoreSet;
use crate::pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
use crate::sources::{AggregateSource, MetadataStore, Window};

const DEFAULT_K: i64 = 3;
const DEFAULT_TIMEOUT_MS: i64 = 120_000;
const DEFAULT_FETCH_PARALLELISM: usize = 3;

/// Contribution fractions differ by rounding when a share moves from one
/// slice to another, so score comparisons tolerate a small epsilon.
const SCORE_TIE_EPSILON: f64 = 1e-9;

/// One (dimension, value) slice with its contribution-share shift.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DimensionCost {
    pub name: String,
    pub value: String,
    /// Signed shift of the slice's contribution fraction.
    pub delta: f64,
    pub score: f64,
}

/// Computes contribution-share shifts for every (dimension, value) slice
/// under the given filters, fetching breakdowns concurrently with one
/// absolute deadline shared by all fetches.
///
/// A failed fetch for one dimension drops that dimension's rows; an
/// expired deadline fails the whole call.
pub(crate) async fn dimension_costs(
    source: &Arc<dyn AggregateSource>,
    metric_id: i64,
    filters: &[(String, String)],
    dimensions: &[String],
    current: Window,
    baseline: Window,
    parallelism: usize,
    deadline: Instant,
) -> Result<Vec<DimensionCost>, SourceError> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut tasks: JoinSet<Result<Vec<DimensionCost>, SourceError>> = JoinSet::new();

    for dimension in dimensions {
        let source = Arc::clone(source);
        let filters = filters.to_vec();
        let dimension = dimension.clone();
        let permit = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = permit.acquire_owned().await;
            let fetch = async {
                let cur = source
                    .breakdown(metric_id, current, &filters, &dimension, 0)
                    .await;
                let base = source
                    .breakdown(metric_id, baseline, &filters, &dimension, 0)
                    .await;
                (cur, base)
            };
            let (cur, base) = tokio::time::timeout_at(deadline, fetch)
                .await
                .map_err(|_| SourceError::DeadlineExceeded)?;
            match (cur, base) {
                (Ok(cur), Ok(base)) => Ok(slice_costs(&dimension, &cur, &base)),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(dimension = %dimension, error = %e, "breakdown fetch failed, dropping dimension");
                    Ok(Vec::new())
                }
            }
        });
    }

    let mut costs = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let rows = joined.map_err(|e| SourceError::Fetch {
            message: format!("breakdown task panicked: {e}"),
        })??;
        costs.extend(rows);
    }

    // score desc, growth preferred on ties, then lexicographic for
    // determinism. Scores are compared on an epsilon grid: opposite
    // shifts of the same share differ in the last f64 bit and must
    // still tie, and quantizing keeps the comparator a total order.
    let bucket = |score: f64| (score / SCORE_TIE_EPSILON).round() as i64;
    costs.sort_by(|a, b| {
        bucket(b.score)
            .cmp(&bucket(a.score))
            .then(b.delta.partial_cmp(&a.delta).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| (&a.name, &a.value).cmp(&(&b.name, &b.value)))
    });
    Ok(costs)
}

/// Normalizes both breakdowns to contribution fractions and scores each
/// value by the absolute shift.
fn slice_costs(dimension: &str, current: &[(String, f64)], baseline: &[(String, f64)]) -> Vec<DimensionCost> {
    let cur_total: f64 = current.iter().map(|(_, v)| v).sum();
    let base_total: f64 = baseline.iter().map(|(_, v)| v).sum();

    let fraction = |rows: &[(String, f64)], total: f64, value: &str| -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        rows.iter()
            .find(|(v, _)| v == value)
            .map(|(_, v)| v / total)
            .unwrap_or(0.0)
    };

    let mut values: Vec<&String> = current.iter().map(|(v, _)| v).collect();
    for (v, _) in baseline {
        if !values.contains(&v) {
            values.push(v);
        }
    }

    values
        .into_iter()
        .filter(|v| !v.is_empty())
        .map(|value| {
            let delta = fraction(current, cur_total, value) - fraction(baseline, base_total, value);
            DimensionCost {
                name: dimension.to_string(),
                value: value.clone(),
                delta,
                score: delta.abs(),
            }
        })
        .collect()
}

/// Peels the top-shifted dimension slice off a single context metric `k`
/// times, emitting one Generated Dimension entity per iteration with
/// `score = (sub_total / total) × metric.score`.
///
/// Exactly one metric is allowed in context; the computation is too
/// expensive to fan out per metric. Data-source failures degrade to a
/// partial result for the metric instead of failing the invocation.
///
/// Properties: `k`, `exclude_dimensions`, `timeout_ms`, `parallelism`.
pub struct ContributionStage {
    output: String,
    inputs: Vec<String>,
    k: i64,
    exclude_dimensions: Vec<String>,
    timeout_ms: i64,
    parallelism: usize,
    source: Arc<dyn AggregateSource>,
    metadata: Arc<dyn MetadataStore>,
}

impl ContributionStage {
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
            k: config.prop_i64("k", DEFAULT_K)?,
            exclude_dimensions: config.prop_str_list("exclude_dimensions")?,
            timeout_ms: config.prop_i64("timeout_ms", DEFAULT_TIMEOUT_MS)?,
            parallelism: parallelism as usize,
            output: config.output,
            inputs: config.inputs,
            source: Arc::clone(&collaborators.source),
            metadata: Arc::clone(&collaborators.metadata),
        })
    }

    async fn candidate_dimensions(&self, metric_id: i64) -> Result<Vec<String>, StageError> {
        let Some(meta) = self.metadata.metric(metric_id).await? else {
            warn!(metric_id, "metric not found in metadata");
            return Ok(Vec::new());
        };
        let Some(dataset) = self.metadata.dataset(&meta.dataset).await? else {
            warn!(dataset = %meta.dataset, "dataset not found in metadata");
            return Ok(Vec::new());
        };
        if !dataset.additive {
            warn!(dataset = %dataset.name, "dataset is not additive, contribution shares are approximate");
        }
        Ok(dataset
            .dimensions
            .iter()
            .filter(|d| !self.exclude_dimensions.contains(d))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Pipeline for ContributionStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let metrics = context.filter(EntityType::Metric);
        let metric = match metrics.as_slice() {
            [] => return Ok(PipelineResult::empty()),
            [metric] => metric.clone(),
            many => {
                return Err(StageError::TooManyMetrics {
                    stage: self.output.clone(),
                    count: many.len(),
                });
            }
        };
        let Some(metric_id) = metric.metric_id() else {
            return Ok(PipelineResult::empty());
        };

        let anomaly = context.time_range(RangeKind::Anomaly)?;
        let baseline = context.time_range(RangeKind::Baseline)?;
        let (start, end) = anomaly.time_bounds().unwrap_or_default();
        let current = Window::new(start, end);
        let (start, end) = baseline.time_bounds().unwrap_or_default();
        let reference = Window::new(start, end);

        let dimensions = self.candidate_dimensions(metric_id).await?;
        if dimensions.is_empty() {
            return Ok(PipelineResult::empty());
        }

        let total = match self
            .source
            .aggregate(metric_id, current, metric.filters())
            .await
        {
            Ok(total) if total > 0.0 => total,
            Ok(_) => {
                warn!(urn = %metric.urn(), "metric total is not positive, nothing to attribute");
                return Ok(PipelineResult::empty());
            }
            Err(e) => {
                warn!(urn = %metric.urn(), error = %e, "total fetch failed, skipping metric");
                return Ok(PipelineResult::empty());
            }
        };

        let deadline = Instant::now() + std::time::Duration::from_millis(self.timeout_ms.max(0) as u64);
        let related = vec![Arc::new(metric.clone()), Arc::new(anomaly)];
        let mut filters = metric.filters().to_vec();
        let mut set = MaxScoreSet::new();

        for iteration in 0..self.k.max(0) {
            let sub_total = match self
                .source
                .aggregate(metric_id, current, &filters)
                .await
            {
                Ok(sub_total) => sub_total,
                Err(e) => {
                    warn!(urn = %metric.urn(), error = %e, "remainder fetch failed, returning partial result");
                    break;
                }
            };

            let costs = match dimension_costs(
                &self.source,
                metric_id,
                &filters,
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
                    warn!(urn = %metric.urn(), error = %e, "attribution iteration failed, returning partial result");
                    break;
                }
            };

            let Some(top) = costs.into_iter().find(|c| c.score > 0.0) else {
                break;
            };
            info!(
                iteration,
                dimension = %top.name,
                value = %top.value,
                delta = top.delta,
                "peeled dimension slice"
            );

            let score = (sub_total / total) * metric.score();
            set.insert(
                Entity::dimension(score, &top.name, &top.value, Provenance::Generated)
                    .with_related(related.clone()),
            );
            filters.push((top.name, format!("!{}", top.value)));
        }

        Ok(PipelineResult::new(set.into_vec()))
    }
}
