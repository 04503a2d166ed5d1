use std::path::PathBuf;

use thiserror::Error;

use crate::sensors::SensorCategory;

/// Failures surfaced by the sensor suite.
///
/// Only `Configuration`, `Io`, `AlreadyCollecting` and `ServiceStopped` ever
/// reach the caller of a public operation. The remaining variants describe
/// failures that are contained where they happen and only logged.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is unavailable")]
    SensorUnavailable(SensorCategory),

    #[error("transient read error from {category}: {message}")]
    TransientRead {
        category: SensorCategory,
        message: String,
    },

    #[error("background save of {file} failed: {message}")]
    BackgroundSave { file: String, message: String },

    #[error("data collection already in progress")]
    AlreadyCollecting,

    #[error("sensor suite service is no longer running")]
    ServiceStopped,
}

impl SuiteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transient(category: SensorCategory, err: impl std::fmt::Display) -> Self {
        Self::TransientRead {
            category,
            message: err.to_string(),
        }
    }
}

pub type SuiteResult<T> = Result<T, SuiteError>;
