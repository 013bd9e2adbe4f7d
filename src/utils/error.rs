//! Error types for the playback pipeline
//!
//! Library code returns `PipelineError` through the crate `Result` alias.
//! Per-packet decode problems are not errors: they are reported as
//! `DecodeOutcome` values so the engine can retry or drop the packet.

use thiserror::Error;

/// Main error type for the playback pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Hardware decoder creation, configuration or I/O failures
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Graphics context or surface failures
    #[error("Render error: {0}")]
    Render(String),

    /// Audio device failures
    #[error("Audio error: {0}")]
    Audio(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown decoder, player or stream id
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create a decoder error from string
    pub fn decoder_error<S: Into<String>>(msg: S) -> Self {
        PipelineError::Decoder(msg.into())
    }

    /// Create an invalid input error from string
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        PipelineError::InvalidInput(msg.into())
    }
}

/// Convenience type alias for Results in the pipeline
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for converting other errors to PipelineError
pub trait IntoPipelineError<T> {
    /// Convert this error into a PipelineError with the given context
    fn audio_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPipelineError<T> for std::result::Result<T, E> {
    fn audio_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PipelineError::Audio(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PipelineError::Config(format!("{}: {}", context, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Render("Failed to create context".to_string());
        assert_eq!(err.to_string(), "Render error: Failed to create context");

        let err = PipelineError::NotFound("decoder-7".to_string());
        assert_eq!(err.to_string(), "Resource not found: decoder-7");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::FileIO(_)));
    }

    #[test]
    fn test_into_pipeline_error_trait() {
        let result: std::result::Result<(), &str> = Err("device busy");
        let converted = result.audio_err("Opening output");

        match converted {
            Err(PipelineError::Audio(msg)) => {
                assert_eq!(msg, "Opening output: device busy");
            }
            _ => panic!("Expected Audio error"),
        }
    }
}
