//! # Error Types
//!
//! A single error enum covers every failure the builders, the renderer and the
//! dialects can report. All failures are deterministic functions of the input, so
//! nothing here is retryable.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    /// A builder lifecycle rule was broken: ending a builder with an open child,
    /// reusing an ended builder or leaving a subquery placeholder unbound.
    #[error("Builder chaining error: {0}")]
    BuilderChaining(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Metamodel error: {0}")]
    Metamodel(String),

    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CriteriaError>;

impl From<config::ConfigError> for CriteriaError {
    fn from(err: config::ConfigError) -> Self {
        CriteriaError::Configuration(err.to_string())
    }
}

impl CriteriaError {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        CriteriaError::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn is_builder_chaining(&self) -> bool {
        matches!(self, CriteriaError::BuilderChaining(_))
    }
}

/// Raised when a builder is ended (or its result consumed) while a child is open.
pub fn builder_not_ended() -> CriteriaError {
    CriteriaError::BuilderChaining("A builder was not ended properly.".to_string())
}

/// Raised when a child is started while a sibling child is still open.
pub fn previous_builder_not_ended() -> CriteriaError {
    CriteriaError::BuilderChaining(
        "There was an attempt to start a builder but a previous builder was not ended."
            .to_string(),
    )
}

/// Raised when any method is called on a builder after it has been ended.
pub fn builder_already_ended(kind: &str) -> CriteriaError {
    CriteriaError::BuilderChaining(format!("The {kind} builder has already been ended."))
}
