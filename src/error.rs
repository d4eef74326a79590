use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of one upstream poll. Always retried by the scheduler after backoff.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream returned status {0}")]
    Status(StatusCode),
    #[error("upstream payload is not a JSON object: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else {
            FetchError::Request(err)
        }
    }
}

/// Per-channel payload problems. The channel's batch is dropped for the cycle.
#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("channel entry is malformed: {0}")]
    Malformed(String),
    #[error("channel carried no valid numeric values")]
    NoValidValues,
    #[error("channel carried {got} valid values, batch size is {want}")]
    ShortBatch { got: usize, want: usize },
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("scaler expects {expected} feature columns, window is univariate")]
    FeatureMismatch { expected: usize },
    #[error("model expects {expected} inputs, window has {got}")]
    Shape { expected: usize, got: usize },
    #[error("layer {layer} expects {expected} inputs, got {got}")]
    LayerShape {
        layer: usize,
        expected: usize,
        got: usize,
    },
    #[error("scaler failed: {0}")]
    Scale(String),
    #[error("model produced no output")]
    EmptyOutput,
    #[error("model produced a non-finite value")]
    NonFinite,
    #[error("predictor did not finish within {0:?}")]
    Timeout(Duration),
    #[error("predictor task failed: {0}")]
    Task(String),
}

/// Model or scaler artifacts that could not be loaded at startup.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid artifact {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}
