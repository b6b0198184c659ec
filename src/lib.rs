//! media_cache - derived-media cache
//!
//! Produces renditions of source media (resized or rotated images, WebM
//! transcodes, waveform and first-page previews) on first request and serves
//! them from a flat cache directory afterwards. Conversions shell out to
//! system tools (`ffmpeg`, `convert`, `unoconv`, `exiftool`, `file`).

pub mod config;
pub mod converter;
pub mod error;
pub mod executor;
pub mod format;
pub mod metrics;
pub mod organ;
pub mod pipeline;
pub mod probe;
pub mod scheduler;
pub mod store;
pub mod tools;
pub mod validation;

pub use config::{CacheConfig, ConfigError};
pub use converter::{Converter, ConverterRegistry, Destination, Route};
pub use error::{CacheError, Result};
pub use executor::{Transform, TransformExecutor};
pub use format::{Angle, CacheKey, FormatDescriptor, FormatRequest, MediaKind};
pub use probe::{Dimensions, MediaProbe, Probe, SourceDescriptor, SourceKind};
pub use scheduler::{JobClass, JobStatus, Scheduler};
pub use store::CacheStore;
pub use tools::{ToolCommand, ToolError, ToolPaths};
