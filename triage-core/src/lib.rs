//! # Triage Core
//!
//! Root-cause-analysis engine library. Provides the entity/URN model,
//! score-fusion utilities, scoring strategies, the pipeline contract and
//! DAG executor, the built-in stage library, collaborator interfaces with
//! in-memory implementations, and the engine facade.

pub mod config;
pub mod dag;
pub mod engine;
pub mod entity;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod scoring;
pub mod sources;
pub mod stages;
pub mod urn;

// Re-export commonly used types at the crate root.
pub use config::{EngineConfig, StageDescriptor};
pub use dag::{Framework, FrameworkResult, INPUT_NAME, registry::StageRegistry};
pub use engine::{RcaEngine, expand_related};
pub use entity::{Entity, EntityKind, EntityType, Provenance, RangeKind};
pub use error::{ConfigError, Result, SourceError, StageError, TriageError, UrnError};
pub use fusion::{MaxScoreSet, group_top_k_per_type, normalize_scores, top_k, top_k_normalized};
pub use pipeline::{Collaborators, Pipeline, PipelineContext, PipelineResult, StageConfig};
pub use scoring::{EventScorer, StrategyType, TimeFrame};
pub use sources::{
    AggregateSource, AnomalyRecord, DataPoint, DatasetMeta, EntityMapping, EventRecord,
    InMemoryMetadata, InMemoryRelations, InMemorySource, MetadataStore, MetricMeta, RelationStore,
    Window,
};
