/*!
    Error types for the hardware encoding pipeline.
*/

use std::time::Duration;

use thiserror::Error;

use crate::CodecStatus;

/**
    Error type for the hardware encoding pipeline.
*/
#[derive(Debug, Error)]
pub enum Error {
    /// The encoder has no running session.
    #[error("encoder is not initialized")]
    Uninitialized,

    /// The operation is not valid in the encoder's current state.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// The hardware codec could not be created or configured.
    #[error("configuration failed: {message}")]
    Config { message: String },

    /// A hardware codec operation failed mid-stream.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// The hardware codec is unusable; the caller should switch to a software encoder.
    #[error("hardware codec unusable, falling back to software: {message}")]
    FallbackSoftware { message: String },

    /// The frame buffer kind does not match the configured input mode.
    #[error("unsupported input: {message}")]
    UnsupportedInput { message: String },

    /// The device requested a layout or format that is not handled.
    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },

    /// The output thread did not stop within the release timeout.
    #[error("timed out after {waited:?} waiting for the output thread")]
    Timeout { waited: Duration },

    /// The hardware codec failed while being released on the output thread.
    #[error("codec release failed: {message}")]
    Shutdown { message: String },

    /// I/O error (thread spawn failure, output file, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /**
        Create an invalid state error with the given message.
    */
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /**
        Create a configuration error with the given message.
    */
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /**
        Create a codec error with the given message.
    */
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /**
        Create a software fallback error with the given message.
    */
    pub fn fallback_software(message: impl Into<String>) -> Self {
        Self::FallbackSoftware {
            message: message.into(),
        }
    }

    /**
        Create an unsupported input error with the given message.
    */
    pub fn unsupported_input(message: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            message: message.into(),
        }
    }

    /**
        Create an unsupported format error with the given message.
    */
    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
        }
    }

    /**
        Create a shutdown error with the given message.
    */
    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown {
            message: message.into(),
        }
    }

    /**
        Returns the status code this error is reported as.
    */
    pub fn status(&self) -> CodecStatus {
        match self {
            Self::Uninitialized => CodecStatus::Uninitialized,
            Self::Timeout { .. } => CodecStatus::Timeout,
            Self::FallbackSoftware { .. } => CodecStatus::FallbackSoftware,
            Self::InvalidState { .. }
            | Self::Config { .. }
            | Self::Codec { .. }
            | Self::UnsupportedInput { .. }
            | Self::UnsupportedFormat { .. }
            | Self::Shutdown { .. }
            | Self::Io(_) => CodecStatus::Error,
        }
    }
}

/**
    Result type alias for the hardware encoding pipeline.
*/
pub type Result<T> = std::result::Result<T, Error>;
