//! Organ interface for the media cache
//!
//! Exposes the cache through the Stimulus/Response pattern so the daemon (or
//! an embedding orchestrator) can drive it with plain JSON.
//!
//! ## Available Operations
//!
//! 1. `cache.get` - Path of a rendition, produced on first request
//! 2. `cache.get_all` - Every cached rendition of an id and kind
//! 3. `cache.remove` - Delete all renditions of some ids
//! 4. `cache.status` - Pending and running jobs
//! 5. `cache.capabilities` - Capability card query
//! 6. `metrics` - Metrics snapshot
//!
//! ## Example
//!
//! ```rust,no_run
//! use media_cache::organ::{CacheOrgan, Organ, Stimulus};
//! use media_cache::{CacheConfig, CacheStore};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CacheStore::open(&CacheConfig::new("/var/cache/media"))?;
//! let organ = CacheOrgan::new(store);
//!
//! let response = organ.stimulate(Stimulus {
//!     op: "cache.get".to_string(),
//!     input: json!({"id": "42", "source": "/data/42.jpg", "format": {"type": "image", "width": 200}}),
//!     context: HashMap::new(),
//! }).await?;
//! println!("{}", response.output["path"]);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::error::CacheError;
use crate::format::{FormatRequest, MediaKind};
use crate::metrics::Timer;
use crate::store::CacheStore;
use crate::validation::validate_input;

const OPERATIONS: [&str; 6] = [
    "cache.get",
    "cache.get_all",
    "cache.remove",
    "cache.status",
    "cache.capabilities",
    "metrics",
];

/// Input to an organ operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stimulus {
    pub op: String,
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Output of an organ operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
    pub cost: Option<f64>,
}

#[async_trait]
pub trait Organ: Send + Sync {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError>;
    fn describe(&self) -> OrganCard;
}

#[derive(Debug, Error)]
pub enum OrganError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl OrganError {
    fn code(&self) -> &'static str {
        match self {
            OrganError::UnsupportedOperation(_) => "UnsupportedOperation",
            OrganError::InvalidInput(_) => "InvalidInput",
            OrganError::SerializationError(_) => "SerializationError",
            OrganError::Cache(e) => e.code(),
        }
    }
}

/// Organ capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub division: String,
    pub subsystem: String,
    pub tags: Vec<String>,
    pub execution_modes: Vec<String>,
    pub functions: Vec<FunctionCard>,
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Value,
}

#[derive(Deserialize)]
struct GetInput {
    id: String,
    source: PathBuf,
    format: FormatRequest,
}

#[derive(Deserialize)]
struct GetAllInput {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RemoveInput {
    ids: Vec<String>,
}

/// Media cache organ
pub struct CacheOrgan {
    store: CacheStore,
    card: OrganCard,
}

impl CacheOrgan {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            card: organ_card(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    fn input_schema(&self, op: &str) -> Option<&Value> {
        self.card
            .functions
            .iter()
            .find(|f| f.name == op)
            .and_then(|f| f.input_schema.as_ref())
    }

    async fn handle_get(&self, input: Value) -> Result<Value, OrganError> {
        let input: GetInput = parse(input)?;
        let path = self.store.get(&input.id, &input.source, &input.format).await?;
        Ok(json!({ "path": path }))
    }

    async fn handle_get_all(&self, input: Value) -> Result<Value, OrganError> {
        let input: GetAllInput = parse(input)?;
        let kind: MediaKind = input.kind.parse()?;
        let paths = self.store.get_all(&input.id, kind).await?;
        Ok(json!({ "paths": paths }))
    }

    async fn handle_remove(&self, input: Value) -> Result<Value, OrganError> {
        let input: RemoveInput = parse(input)?;
        let removed = self.store.remove(input.ids.as_slice()).await?;
        Ok(json!({ "removed": removed }))
    }

    fn handle_status(&self) -> Result<Value, OrganError> {
        Ok(json!({ "jobs": self.store.status() }))
    }

    async fn dispatch(&self, op: &str, input: Value) -> Result<Value, OrganError> {
        if let Some(schema) = self.input_schema(op) {
            validate_input(&input, schema)?;
        }

        match op {
            "cache.get" => self.handle_get(input).await,
            "cache.get_all" => self.handle_get_all(input).await,
            "cache.remove" => self.handle_remove(input).await,
            "cache.status" => self.handle_status(),
            "cache.capabilities" => Ok(serde_json::to_value(&self.card)?),
            "metrics" => Ok(json!(self.store.metrics().snapshot())),
            _ => Err(OrganError::UnsupportedOperation(op.to_string())),
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(input: Value) -> Result<T, OrganError> {
    serde_json::from_value(input).map_err(|e| OrganError::InvalidInput(e.to_string()))
}

#[async_trait]
impl Organ for CacheOrgan {
    /// Operation failures come back as `ok: false` responses; the `Err`
    /// side is reserved for failures of the organ itself.
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError> {
        let timer = Timer::new();
        let metrics = self.store.metrics();

        let (ok, output) = match self.dispatch(&stimulus.op, stimulus.input).await {
            Ok(output) => (true, output),
            Err(e) => {
                warn!("{} failed: {}", stimulus.op, e);
                let mut output = json!({
                    "error": e.code(),
                    "message": e.to_string(),
                });
                if matches!(e, OrganError::UnsupportedOperation(_)) {
                    output["available_operations"] = json!(OPERATIONS);
                }
                (false, output)
            }
        };

        let latency = timer.elapsed_ms();
        metrics.record_request(&stimulus.op, ok, latency);

        Ok(Response {
            ok,
            output,
            latency_ms: latency,
            cost: None,
        })
    }

    fn describe(&self) -> OrganCard {
        self.card.clone()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn organ_card() -> OrganCard {
    let kinds: Vec<&str> = MediaKind::ALL.iter().map(|k| k.as_str()).collect();

    OrganCard {
        name: "media_cache".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Derived-media cache: resized, rotated and transcoded renditions of source media, produced once and served from disk".to_string(),
        division: "media".to_string(),
        subsystem: "cache".to_string(),
        tags: strings(&["media", "cache", "image", "video", "audio", "document", "thumbnail", "ffmpeg"]),
        execution_modes: strings(&["embedded", "server"]),
        functions: vec![
            FunctionCard {
                name: "cache.get".to_string(),
                description: "Return the cached rendition of an id in the requested format, producing it from the source on first request".to_string(),
                tags: strings(&["cache", "conversion", "thumbnail"]),
                examples: strings(&[
                    "200px wide JPEG preview of a photo",
                    "WebM transcode of an uploaded video rotated by 90 degrees",
                    "Waveform picture of an audio track",
                ]),
                idempotent: true,
                side_effects: strings(&["writes cache file", "invokes ffmpeg, convert, unoconv"]),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "description": "Content id, prefix of the cache filename" },
                        "source": { "type": "string", "description": "Path of the source file" },
                        "format": {
                            "type": "object",
                            "description": "Requested rendition",
                            "properties": {
                                "type": { "type": "string", "enum": kinds },
                                "width": { "type": "integer" },
                                "height": { "type": "integer" },
                                "angle": { "type": "integer", "enum": [-270, -180, -90, 0, 90, 180, 270] },
                                "mirror": { "type": "boolean" }
                            },
                            "required": ["type"]
                        }
                    },
                    "required": ["id", "source", "format"]
                })),
                output_schema: json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } }
                }),
            },
            FunctionCard {
                name: "cache.get_all".to_string(),
                description: "List every cached rendition of an id for one media kind".to_string(),
                tags: strings(&["cache", "listing"]),
                examples: strings(&["All image renditions of content 42"]),
                idempotent: true,
                side_effects: vec![],
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "type": { "type": "string", "enum": kinds }
                    },
                    "required": ["id", "type"]
                })),
                output_schema: json!({
                    "type": "object",
                    "properties": { "paths": { "type": "array", "items": { "type": "string" } } }
                }),
            },
            FunctionCard {
                name: "cache.remove".to_string(),
                description: "Delete all cached renditions of the given ids".to_string(),
                tags: strings(&["cache", "eviction"]),
                examples: strings(&["Drop every rendition of a deleted upload"]),
                idempotent: true,
                side_effects: strings(&["deletes cache files"]),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "ids": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["ids"]
                })),
                output_schema: json!({
                    "type": "object",
                    "properties": { "removed": { "type": "integer" } }
                }),
            },
            FunctionCard {
                name: "cache.status".to_string(),
                description: "Pending and running conversion jobs".to_string(),
                tags: strings(&["cache", "diagnostics"]),
                examples: strings(&["Check whether a large transcode is still queued"]),
                idempotent: true,
                side_effects: vec![],
                input_schema: None,
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "jobs": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "filename": { "type": "string" },
                                    "format": { "type": "object" },
                                    "running": { "type": "boolean" },
                                    "queued_at": { "type": "string" }
                                }
                            }
                        }
                    }
                }),
            },
            FunctionCard {
                name: "cache.capabilities".to_string(),
                description: "Return organ capability card with all available functions".to_string(),
                tags: strings(&["metadata", "discovery"]),
                examples: strings(&["Discover available cache operations"]),
                idempotent: true,
                side_effects: vec![],
                input_schema: None,
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "version": { "type": "string" },
                        "functions": { "type": "array" }
                    }
                }),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::converter::ConverterRegistry;
    use crate::metrics::Metrics;
    use crate::probe::MediaProbe;
    use std::sync::Arc;

    fn organ(dir: &std::path::Path) -> CacheOrgan {
        let config = CacheConfig {
            cache_path: dir.join("cache"),
            scratch_path: Some(dir.join("scratch")),
            ..CacheConfig::default()
        };
        let store = CacheStore::with_components(
            &config,
            Arc::new(MediaProbe::default()),
            ConverterRegistry::empty(),
            Metrics::new(),
        )
        .unwrap();
        CacheOrgan::new(store)
    }

    fn stimulus(op: &str, input: Value) -> Stimulus {
        Stimulus {
            op: op.to_string(),
            input,
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_organ_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let organ = organ(dir.path());

        let response = organ.stimulate(stimulus("cache.capabilities", json!({}))).await.unwrap();
        assert!(response.ok);
        assert_eq!(response.output["name"], "media_cache");
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let dir = tempfile::tempdir().unwrap();
        let organ = organ(dir.path());

        let response = organ.stimulate(stimulus("invalid.operation", json!({}))).await.unwrap();
        assert!(!response.ok);
        assert_eq!(response.output["error"], "UnsupportedOperation");
        assert!(response.output["available_operations"].is_array());
    }

    #[tokio::test]
    async fn test_schema_rejects_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let organ = organ(dir.path());

        let response = organ
            .stimulate(stimulus("cache.get", json!({"id": "1", "source": "/tmp/x.jpg"})))
            .await
            .unwrap();
        assert!(!response.ok);
        assert_eq!(response.output["error"], "InvalidInput");

        let response = organ
            .stimulate(stimulus("cache.remove", json!({"ids": "1"})))
            .await
            .unwrap();
        assert_eq!(response.output["error"], "InvalidInput");
    }

    #[tokio::test]
    async fn test_cache_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let organ = organ(dir.path());

        let response = organ
            .stimulate(stimulus(
                "cache.get",
                json!({"id": "1", "source": "/tmp/x.jpg", "format": {"type": "image", "angle": 45}}),
            ))
            .await
            .unwrap();
        assert!(!response.ok);
        assert_eq!(response.output["error"], "InvalidAngle");

        let response = organ
            .stimulate(stimulus("cache.get_all", json!({"id": "1", "type": "hologram"})))
            .await
            .unwrap();
        assert_eq!(response.output["error"], "UnsupportedKind");
    }

    #[tokio::test]
    async fn test_status_and_remove_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let organ = organ(dir.path());

        let response = organ.stimulate(stimulus("cache.status", json!({}))).await.unwrap();
        assert!(response.ok);
        assert_eq!(response.output["jobs"], json!([]));

        let response = organ
            .stimulate(stimulus("cache.remove", json!({"ids": ["1", "2"]})))
            .await
            .unwrap();
        assert_eq!(response.output["removed"], 0);

        let snapshot = organ.store().metrics().snapshot();
        assert_eq!(snapshot.operations.status, 1);
        assert_eq!(snapshot.operations.remove, 1);
    }

    #[test]
    fn test_organ_card() {
        let card = organ_card();
        assert_eq!(card.name, "media_cache");
        assert_eq!(card.subsystem, "cache");
        assert_eq!(card.functions.len(), 5);
        assert!(card.functions.iter().all(|f| OPERATIONS.contains(&f.name.as_str())));
    }
}
