//! Error types for report resolution, dispatch and configuration

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    /// The watched instance exposes no accessor with this name.
    #[error("unresolved attribute: {accessor}")]
    UnresolvedAttribute { accessor: String },

    /// A computed rule raised while resolving a report field.
    #[error("rule for {field} failed: {source}")]
    Rule {
        field: String,
        source: anyhow::Error,
    },

    #[error("condition evaluation failed: {0}")]
    ConditionEvaluation(anyhow::Error),

    #[error("dispatch via {strategy} failed: {source}")]
    Dispatch {
        strategy: &'static str,
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ReportError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for report operations
pub type Result<T> = std::result::Result<T, ReportError>;
