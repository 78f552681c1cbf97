//! Derives Baseline/Analysis time ranges from the Anomaly seed range.

use async_trait::async_trait;

use crate::entity::{Entity, EntityKind, RangeKind};
use crate::error::{ConfigError, StageError};
use crate::pipeline::{Pipeline, PipelineContext, PipelineResult, StageConfig};

/// Emits one derived [`EntityKind::TimeRange`] per invocation.
///
/// Properties: `kind` (required, `baseline` or `analysis`), `offset_ms`
/// (shift backwards from the anomaly range), `buffer_ms` (extends the
/// derived range's start further into the past).
pub struct TimeRangeStage {
    output: String,
    inputs: Vec<String>,
    kind: RangeKind,
    offset_ms: i64,
    buffer_ms: i64,
}

impl TimeRangeStage {
    pub fn new(config: StageConfig) -> Result<Self, ConfigError> {
        let kind = match config.require_str("kind")?.as_str() {
            "baseline" => RangeKind::Baseline,
            "analysis" => RangeKind::Analysis,
            other => {
                return Err(ConfigError::InvalidProperty {
                    stage: config.output.clone(),
                    property: "kind".to_string(),
                    reason: format!("cannot derive '{other}' range"),
                });
            }
        };
        Ok(Self {
            kind,
            offset_ms: config.prop_i64("offset_ms", 0)?,
            buffer_ms: config.prop_i64("buffer_ms", 0)?,
            output: config.output,
            inputs: config.inputs,
        })
    }
}

#[async_trait]
impl Pipeline for TimeRangeStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        let anomaly = context.time_range(RangeKind::Anomaly)?;
        let EntityKind::TimeRange { start, end, .. } = anomaly.kind() else {
            unreachable!("time_range returns TimeRange entities only");
        };
        let derived = Entity::time_range(
            self.kind,
            start - self.offset_ms - self.buffer_ms,
            end - self.offset_ms,
            anomaly.score(),
        );
        Ok(PipelineResult::new(vec![derived]))
    }
}
