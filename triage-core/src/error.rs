//! Error types for the Triage RCA engine.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering configuration, URN parsing, stage execution, and remote-source
//! domains. Configuration and graph-structure errors are raised at load
//! time and are non-recoverable; per-entity resolution misses are handled
//! locally by the stages and never surface here.

/// Top-level error type for the Triage core library.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URN error: {0}")]
    Urn(#[from] UrnError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating a framework configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown framework: {name}")]
    UnknownFramework { name: String },

    #[error("Unknown stage kind '{kind}' for stage '{stage}'")]
    UnknownStageKind { stage: String, kind: String },

    #[error("Unknown scoring strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Stage '{stage}' is missing required property '{property}'")]
    MissingProperty { stage: String, property: String },

    #[error("Invalid value for property '{property}' of stage '{stage}': {reason}")]
    InvalidProperty {
        stage: String,
        property: String,
        reason: String,
    },

    #[error("Duplicate stage output name: {name}")]
    DuplicateOutput { name: String },

    #[error("Stage output name '{name}' is reserved")]
    ReservedName { name: String },

    #[error("Stage '{stage}' declares input '{input}' which no stage produces")]
    UnknownInput { stage: String, input: String },

    #[error("Stage graph contains a cycle through: {stages:?}")]
    CyclicGraph { stages: Vec<String> },

    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },

    #[error("Configuration file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the URN codec.
#[derive(Debug, thiserror::Error)]
pub enum UrnError {
    #[error("Malformed URN '{urn}': {reason}")]
    Malformed { urn: String, reason: String },
}

impl UrnError {
    pub(crate) fn malformed(urn: &str, reason: impl Into<String>) -> Self {
        UrnError::Malformed {
            urn: urn.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a stage during framework execution.
///
/// A stage error fails the whole invocation; recoverable conditions are
/// logged and degraded inside the stage instead of being raised.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Context is missing required {kind} time range")]
    MissingTimeRange { kind: String },

    #[error("Stage '{stage}' cannot process {count} metrics at a time (expensive computation, limit 1)")]
    TooManyMetrics { stage: String, count: usize },

    #[error("Stage '{stage}' failed: {message}")]
    Failed { stage: String, message: String },

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("URN error: {0}")]
    Urn(#[from] UrnError),
}

/// Errors from remote collaborator fetches.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("Fetch deadline exceeded")]
    DeadlineExceeded,
}

/// Convenience result alias for the Triage core library.
pub type Result<T> = std::result::Result<T, TriageError>;
