//! Calendar-event retrieval and relevance scoring.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{Entity, EntityKind, EntityType, RangeKind};
use crate::error::{ConfigError, StageError};
use crate::fusion::{self, MaxScoreSet};
use crate::pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
use crate::scoring::{EventScorer, StrategyType, TimeFrame};
use crate::sources::MetadataStore;

/// Events are fetched slightly beyond the window bounds so that decayed
/// but still-relevant candidates are not cut off at the edge. Two days.
const DEFAULT_OVERFETCH_MS: i64 = 172_800_000;

/// Retrieves events of one source around the anomaly and baseline
/// windows and scores them with the configured strategy.
///
/// Properties: `event_source` (default `holiday`), `strategy` (default
/// `compound`), `dimension` (dimension name matched against context
/// Dimension entities, default `country`), `overfetch_ms`, `k`.
pub struct EventsStage {
    output: String,
    inputs: Vec<String>,
    event_source: String,
    strategy: StrategyType,
    dimension: String,
    overfetch_ms: i64,
    k: i64,
    metadata: Arc<dyn MetadataStore>,
}

impl EventsStage {
    pub fn new(config: StageConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        Ok(Self {
            event_source: config.prop_str("event_source", "holiday")?,
            strategy: StrategyType::parse(&config.prop_str("strategy", "compound")?)?,
            dimension: config.prop_str("dimension", "country")?,
            overfetch_ms: config.prop_i64("overfetch_ms", DEFAULT_OVERFETCH_MS)?,
            k: config.prop_i64("k", -1)?,
            output: config.output,
            inputs: config.inputs,
            metadata: Arc::clone(&collaborators.metadata),
        })
    }
}

#[async_trait]
impl Pipeline for EventsStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let scored_dimensions = context.filter(EntityType::Dimension);
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
            let frame = TimeFrame::new(
                lookback.unwrap_or(start - self.overfetch_ms),
                start,
                end,
            );
            let scorer = EventScorer::new(
                self.strategy,
                frame,
                &self.dimension,
                &scored_dimensions,
            );
            let window = Arc::new(window);

            let records = self
                .metadata
                .events(
                    &self.event_source,
                    frame.lookback - self.overfetch_ms,
                    end + self.overfetch_ms,
                )
                .await?;
            for record in records {
                let score = scorer.score(record.start, &record.dimensions) * window.score();
                let entity = Entity::event(
                    score,
                    &record.source,
                    record.id,
                    record.start,
                    record.end,
                    record.dimensions,
                )
                .with_related(vec![Arc::clone(&window)]);
                set.insert(entity);
            }
        }

        Ok(PipelineResult::new(fusion::top_k(&set.into_vec(), self.k)))
    }
}
