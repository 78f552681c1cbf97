//! Framework DAG executor — validates the stage graph at load time and
//! runs stages in dependency order with bounded parallelism.
//!
//! The context is append-only: each stage publishes its complete output
//! under its output name, and a downstream stage never observes a partial
//! upstream result. Any stage failure fails the whole invocation; there
//! is no retry at this layer.

pub mod registry;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::entity::Entity;
use crate::error::{ConfigError, StageError, TriageError};
use crate::fusion::{self, MaxScoreSet};
use crate::pipeline::{Pipeline, PipelineContext, PipelineResult};

/// Reserved context name under which caller-supplied seed entities are
/// published before any stage runs.
pub const INPUT_NAME: &str = "input";

/// Per-stage execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageState {
    Configured,
    Running,
    Done,
    Failed,
}

/// One named, fully-wired DAG of stages.
pub struct Framework {
    name: String,
    stages: Vec<Arc<dyn Pipeline>>,
    parallelism: usize,
}

/// Aggregated output of one framework invocation.
#[derive(Debug)]
pub struct FrameworkResult {
    /// Every stage output plus the seed set, keyed by output name.
    pub outputs: HashMap<String, Vec<Entity>>,
    /// Entities from sink stages, URN-merged and sorted by score
    /// descending.
    pub results: Vec<Entity>,
}

impl Framework {
    /// Builds a framework, failing fast on structural configuration
    /// errors: duplicate or reserved output names, inputs no stage
    /// produces, and cycles.
    pub fn new(
        name: &str,
        stages: Vec<Arc<dyn Pipeline>>,
        parallelism: usize,
    ) -> Result<Self, ConfigError> {
        let mut produced: HashSet<&str> = HashSet::new();
        produced.insert(INPUT_NAME);
        for stage in &stages {
            if stage.output_name() == INPUT_NAME {
                return Err(ConfigError::ReservedName {
                    name: INPUT_NAME.to_string(),
                });
            }
            if !produced.insert(stage.output_name()) {
                return Err(ConfigError::DuplicateOutput {
                    name: stage.output_name().to_string(),
                });
            }
        }

        for stage in &stages {
            for input in stage.input_names() {
                if !produced.contains(input.as_str()) {
                    return Err(ConfigError::UnknownInput {
                        stage: stage.output_name().to_string(),
                        input: input.clone(),
                    });
                }
            }
        }

        check_acyclic(&stages)?;

        Ok(Self {
            name: name.to_string(),
            stages,
            parallelism: parallelism.max(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the framework over the given seed entities.
    ///
    /// Stages run as soon as all their declared inputs are done,
    /// concurrently up to the configured parallelism. Returns the merged
    /// sink output sorted by score descending.
    pub async fn run(&self, seeds: Vec<Entity>) -> Result<FrameworkResult, TriageError> {
        let mut outputs: HashMap<String, Vec<Entity>> = HashMap::new();
        outputs.insert(INPUT_NAME.to_string(), seeds);

        let producer: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.output_name(), i))
            .collect();

        // dependents[i] lists stages waiting on stage i's output
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        let mut remaining: Vec<usize> = vec![0; self.stages.len()];
        for (i, stage) in self.stages.iter().enumerate() {
            for input in stage.input_names() {
                if let Some(&p) = producer.get(input.as_str()) {
                    dependents[p].push(i);
                    remaining[i] += 1;
                }
            }
        }

        let mut states = vec![StageState::Configured; self.stages.len()];
        let mut ready: Vec<usize> = (0..self.stages.len())
            .filter(|&i| remaining[i] == 0)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks: JoinSet<(usize, Result<PipelineResult, StageError>)> = JoinSet::new();
        let mut done = 0usize;

        while done < self.stages.len() {
            for i in ready.drain(..) {
                let stage = Arc::clone(&self.stages[i]);
                let context = PipelineContext::scoped(&outputs, stage.input_names());
                let permit = Arc::clone(&semaphore);
                states[i] = StageState::Running;
                debug!(framework = %self.name, stage = stage.output_name(), "stage running");
                tasks.spawn(async move {
                    // bounds concurrent stage execution; closed-semaphore
                    // errors cannot happen while the executor holds it
                    let _permit = permit.acquire_owned().await;
                    let result = stage.run(&context).await;
                    (i, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                // no runnable stage left but not all done: validated
                // graphs cannot reach this
                let stuck: Vec<&str> = states
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| **s != StageState::Done)
                    .map(|(i, _)| self.stages[i].output_name())
                    .collect();
                warn!(framework = %self.name, ?stuck, "scheduler stalled with unfinished stages");
                break;
            };
            let (i, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    return Err(StageError::Failed {
                        stage: self.name.clone(),
                        message: format!("stage task panicked: {e}"),
                    }
                    .into());
                }
            };

            match result {
                Ok(result) => {
                    let stage = &self.stages[i];
                    debug!(
                        framework = %self.name,
                        stage = stage.output_name(),
                        entities = result.entities.len(),
                        "stage done"
                    );
                    states[i] = StageState::Done;
                    outputs.insert(stage.output_name().to_string(), result.entities);
                    done += 1;
                    for &d in &dependents[i] {
                        remaining[d] -= 1;
                        if remaining[d] == 0 {
                            ready.push(d);
                        }
                    }
                }
                Err(e) => {
                    states[i] = StageState::Failed;
                    warn!(
                        framework = %self.name,
                        stage = self.stages[i].output_name(),
                        error = %e,
                        "stage failed, aborting invocation"
                    );
                    return Err(e.into());
                }
            }
        }

        let results = self.collect_sinks(&outputs);
        Ok(FrameworkResult { outputs, results })
    }

    /// Merges the outputs of sink stages (outputs consumed by no other
    /// stage), sorted by score descending.
    fn collect_sinks(&self, outputs: &HashMap<String, Vec<Entity>>) -> Vec<Entity> {
        let consumed: HashSet<&str> = self
            .stages
            .iter()
            .flat_map(|s| s.input_names().iter().map(String::as_str))
            .collect();

        let mut set = MaxScoreSet::new();
        for stage in &self.stages {
            if !consumed.contains(stage.output_name()) {
                if let Some(entities) = outputs.get(stage.output_name()) {
                    set.extend(entities.iter().cloned());
                }
            }
        }
        fusion::top_k(&set.into_vec(), -1)
    }
}

/// Kahn's algorithm over output-name edges; reports the stages left on a
/// cycle.
fn check_acyclic(stages: &[Arc<dyn Pipeline>]) -> Result<(), ConfigError> {
    let producer: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.output_name(), i))
        .collect();

    let mut indegree: Vec<usize> = vec![0; stages.len()];
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (i, stage) in stages.iter().enumerate() {
        for input in stage.input_names() {
            if let Some(&p) = producer.get(input.as_str()) {
                edges[p].push(i);
                indegree[i] += 1;
            }
        }
    }

    let mut queue: Vec<usize> = (0..stages.len()).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = queue.pop() {
        visited += 1;
        for &d in &edges[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                queue.push(d);
            }
        }
    }

    if visited != stages.len() {
        let cyclic: Vec<String> = (0..stages.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| stages[i].output_name().to_string())
            .collect();
        return Err(ConfigError::CyclicGraph { stages: cyclic });
    }
    Ok(())
}
