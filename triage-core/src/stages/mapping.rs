//! Legacy saved-relationship expansion: metrics to related metrics and
//! datasets via the relation store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::entity::EntityType;
use crate::error::{ConfigError, StageError};
use crate::fusion::MaxScoreSet;
use crate::pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
use crate::sources::{MetadataStore, RelationStore};
use crate::urn;

/// Upper bound on hull expansion rounds; saved relation graphs are
/// shallow in practice and a runaway graph must not stall the invocation.
const MAX_HULL_ROUNDS: usize = 8;

/// Expands each context metric through saved URN-to-URN relationships.
///
/// The hull over metric-to-metric edges is computed as a bounded
/// fixed-point loop; scores multiply along the path. The source metric's
/// positive dimension filters carry over to each related metric, pruned
/// to the dimensions its own dataset actually has.
pub struct MetricMappingStage {
    output: String,
    inputs: Vec<String>,
    relations: Arc<dyn RelationStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl MetricMappingStage {
    pub fn new(config: StageConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        Ok(Self {
            output: config.output,
            inputs: config.inputs,
            relations: Arc::clone(&collaborators.relations),
            metadata: Arc::clone(&collaborators.metadata),
        })
    }

    /// Keeps only positive filters whose key is a dimension of the
    /// target metric's dataset.
    async fn pruned_filters(
        &self,
        metric_id: i64,
        filters: &[(String, String)],
    ) -> Result<Vec<(String, String)>, StageError> {
        let Some(meta) = self.metadata.metric(metric_id).await? else {
            warn!(metric_id, "related metric not found in metadata, keeping no filters");
            return Ok(Vec::new());
        };
        let Some(dataset) = self.metadata.dataset(&meta.dataset).await? else {
            warn!(dataset = %meta.dataset, "dataset not found in metadata, keeping no filters");
            return Ok(Vec::new());
        };
        Ok(filters
            .iter()
            .filter(|(key, value)| !value.starts_with('!') && dataset.dimensions.contains(key))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Pipeline for MetricMappingStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let mut set = MaxScoreSet::new();

        for metric in context.filter(EntityType::Metric) {
            let base = metric.without_filters();

            // bounded fixed-point hull over metric-to-metric edges
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(base.urn());
            let mut frontier: Vec<(String, f64)> = vec![(base.urn(), metric.score())];

            for _ in 0..MAX_HULL_ROUNDS {
                let mut next: Vec<(String, f64)> = Vec::new();
                for (from, path_score) in frontier.drain(..) {
                    for mapping in self.relations.from_urn(&from).await? {
                        let score = path_score * mapping.score;
                        if urn::is_type(&mapping.to_urn, urn::TYPE_METRIC) {
                            let related = urn::parse(&mapping.to_urn, score)?;
                            if related.without_filters().urn() == base.urn() {
                                continue;
                            }
                            if let Some(id) = related.metric_id() {
                                let filters =
                                    self.pruned_filters(id, metric.filters()).await?;
                                set.insert(related.with_filters(&filters));
                            }
                            if visited.insert(related.without_filters().urn()) {
                                next.push((related.without_filters().urn(), score));
                            }
                        } else if urn::is_type(&mapping.to_urn, urn::TYPE_DATASET) {
                            set.insert(urn::parse(&mapping.to_urn, score)?);
                        } else {
                            warn!(urn = %mapping.to_urn, "unsupported mapping target, skipping");
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
        }

        Ok(PipelineResult::new(set.into_vec()))
    }
}
