//! Error handling for pointflow
//!
//! Pipeline operations report [`PipelineError`]; this module adds the
//! crate-level error used by configuration loading, pipeline descriptions
//! read from disk and the command-line front end.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for pointflow operations
#[derive(Error, Debug)]
pub enum PointFlowError {
    /// Errors raised by the pipeline engine
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PointFlowError>,
    },
}

impl PointFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PointFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The pipeline error underneath any context wrappers.
    pub fn pipeline(&self) -> Option<&PipelineError> {
        match self {
            PointFlowError::Pipeline(e) => Some(e),
            PointFlowError::WithContext { source, .. } => source.pipeline(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PointFlowError {
    fn from(err: serde_json::Error) -> Self {
        PointFlowError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PointFlowError {
    fn from(err: toml::de::Error) -> Self {
        PointFlowError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for PointFlowError {
    fn from(err: toml::ser::Error) -> Self {
        PointFlowError::Serialization(err.to_string())
    }
}

/// Result type alias for pointflow operations
pub type Result<T> = std::result::Result<T, PointFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PointFlowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PointFlowError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = PointFlowError::Config("chunk_size must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: chunk_size must be positive"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = PointFlowError::Serialization("bad toml".to_string());
        let with_ctx = err.with_context("Failed to load pointflow.toml");
        assert!(with_ctx.to_string().contains("Failed to load pointflow.toml"));
        assert!(with_ctx.to_string().contains("bad toml"));
    }

    #[test]
    fn test_pipeline_error_seen_through_context() {
        let result: std::result::Result<(), PipelineError> =
            Err(PipelineError::UnknownStage("readers.las".to_string()));
        let err = result.context("Building pipeline").unwrap_err();
        assert_eq!(err.pipeline().map(|e| e.kind()), Some(ErrorKind::UnknownStage));
    }
}
