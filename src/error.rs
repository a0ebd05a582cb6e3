use std::path::PathBuf;
use thiserror::Error;

// Main application error type

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("Intake error: {0}")]
    Intake(String),
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

// One classified failure of a remote hop. `is_transient` decides whether
// the Retrying Forwarder may try again.
#[derive(Error, Debug)]
pub enum HopError {
    #[error("attempt timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response did not match the expected schema: {0}")]
    Schema(String),
    #[error("request could not be built: {0}")]
    Request(String),
    #[error("source image unreadable: {0}")]
    Unreadable(String),
}

impl HopError {
    // Timeouts, connection-level failures and 5xx are retryable; 408/504
    // are the gateway flavors of a timeout. Everything else is a
    // client-side problem that a retry cannot fix.
    pub fn is_transient(&self) -> bool {
        match self {
            HopError::Timeout | HopError::Connect(_) => true,
            HopError::Status { status, .. } => *status >= 500 || *status == 408,
            HopError::Schema(_) | HopError::Request(_) | HopError::Unreadable(_) => false,
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HopError::Timeout
        } else if err.is_decode() {
            HopError::Schema(err.to_string())
        } else {
            HopError::Connect(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to encode artifact: {0}")]
    Encode(image::ImageError),
    #[error("failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
