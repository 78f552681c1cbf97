//! Generic graph-plumbing stages: truncation, rescaling, union.

use async_trait::async_trait;

use crate::error::{ConfigError, StageError};
use crate::fusion;
use crate::pipeline::{Pipeline, PipelineContext, PipelineResult, StageConfig};

/// Truncates the union of its inputs to the `k` highest-scored entities.
pub struct TopKStage {
    output: String,
    inputs: Vec<String>,
    k: i64,
}

impl TopKStage {
    pub fn new(config: StageConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            k: config.prop_i64("k", -1)?,
            output: config.output,
            inputs: config.inputs,
        })
    }
}

#[async_trait]
impl Pipeline for TopKStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        Ok(PipelineResult::new(fusion::top_k(&context.all(), self.k)))
    }
}

/// Min-max rescales the union of its inputs into [0, 1].
pub struct NormalizeStage {
    output: String,
    inputs: Vec<String>,
}

impl NormalizeStage {
    pub fn new(config: StageConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            output: config.output,
            inputs: config.inputs,
        })
    }
}

#[async_trait]
impl Pipeline for NormalizeStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        Ok(PipelineResult::new(fusion::normalize_scores(&context.all())))
    }
}

/// Identity union of its inputs; wiring glue for frameworks that need to
/// funnel several outputs into one name.
pub struct PassthroughStage {
    output: String,
    inputs: Vec<String>,
}

impl PassthroughStage {
    pub fn new(config: StageConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            output: config.output,
            inputs: config.inputs,
        })
    }
}

#[async_trait]
impl Pipeline for PassthroughStage {
    fn output_name(&self) -> &str {
        &self.output
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    async fn run(&self, context: &PipelineContext) -> Result<PipelineResult, StageError> {
        Ok(PipelineResult::new(context.all()))
    }
}
