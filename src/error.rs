use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::tools::ToolError;

/// Everything that can go wrong between a cache request and a published rendition.
///
/// Cloneable so one job outcome can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Malformed cache key: {0}")]
    MalformedKey(String),

    #[error("Unsupported media kind: {0}")]
    UnsupportedKind(String),

    #[error("Invalid angle {0}, valid angle values are: -270, -180, -90, 90, 180 and 270")]
    InvalidAngle(i64),

    #[error("Invalid content id: {0:?}")]
    InvalidId(String),

    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Probe failed for {}: {reason}", .path.display())]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("Unknown conversion path from {source_kind} ({mimetype}) to {destination_kind}")]
    UnsupportedConversion {
        mimetype: String,
        source_kind: String,
        destination_kind: String,
    },

    #[error("Converter failed: {0}")]
    ConverterFailed(#[from] ToolError),

    #[error("Publish to {} failed: {reason}", .path.display())]
    PublishFailed { path: PathBuf, reason: String },

    #[error("Job aborted: {0}")]
    JobAborted(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}

impl CacheError {
    /// Stable name of the variant, reported to clients next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::MalformedKey(_) => "MalformedKey",
            CacheError::UnsupportedKind(_) => "UnsupportedKind",
            CacheError::InvalidAngle(_) => "InvalidAngle",
            CacheError::InvalidId(_) => "InvalidId",
            CacheError::SourceNotFound(_) => "SourceNotFound",
            CacheError::ProbeFailed { .. } => "ProbeFailed",
            CacheError::UnsupportedConversion { .. } => "UnsupportedConversion",
            CacheError::ConverterFailed(_) => "ConverterFailed",
            CacheError::PublishFailed { .. } => "PublishFailed",
            CacheError::JobAborted(_) => "JobAborted",
            CacheError::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
