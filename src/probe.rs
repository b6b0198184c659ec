//! Source inspection
//!
//! ## Backend Priority
//!
//! 1. **ExifTool** (primary) - mimetype, dimensions and compression in one JSON call
//! 2. **file(1)** (fallback) - mimetype only
//! 3. **file magic** (in-process) - `infer`, then `tree_magic_mini`; mimetype only
//!
//! Dimensions are only ever reported by the primary backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::tools::{ToolCommand, ToolError, ToolPaths};

/// Intrinsic pixel size of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// What a source file is, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Image,
    RawImage,
    Video,
    Audio,
    Document,
    Other,
}

impl SourceKind {
    pub fn from_mimetype(mimetype: &str) -> SourceKind {
        let mimetype = mimetype.trim().to_lowercase();

        if RAW_MIMETYPES.contains(&mimetype.as_str()) {
            SourceKind::RawImage
        } else if mimetype.starts_with("image/") {
            SourceKind::Image
        } else if mimetype.starts_with("video/") {
            SourceKind::Video
        } else if mimetype.starts_with("audio/") {
            SourceKind::Audio
        } else if DOCUMENT_MIMETYPES.contains(&mimetype.as_str())
            || DOCUMENT_MIMETYPE_PREFIXES
                .iter()
                .any(|prefix| mimetype.starts_with(prefix))
        {
            SourceKind::Document
        } else {
            SourceKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Image => "image",
            SourceKind::RawImage => "raw-image",
            SourceKind::Video => "video",
            SourceKind::Audio => "audio",
            SourceKind::Document => "document",
            SourceKind::Other => "other",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RAW_MIMETYPES: &[&str] = &[
    "image/x-canon-cr2",
    "image/x-canon-cr3",
    "image/x-canon-crw",
    "image/x-nikon-nef",
    "image/x-nikon-nrw",
    "image/x-sony-arw",
    "image/x-adobe-dng",
    "image/x-fuji-raf",
    "image/x-olympus-orf",
    "image/x-panasonic-rw2",
    "image/x-pentax-pef",
    "image/x-samsung-srw",
];

const DOCUMENT_MIMETYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/rtf",
    "text/rtf",
    "text/plain",
];

const DOCUMENT_MIMETYPE_PREFIXES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.",
    "application/vnd.oasis.opendocument.",
];

/// An input under transformation.
///
/// Pipelines never mutate the descriptor they were handed; multi-stage
/// pipelines build a derived descriptor for the intermediate file instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    pub mimetype: String,
    pub dimensions: Option<Dimensions>,
    /// Video compression tag as reported by the probe (e.g. `dvsd`).
    pub compression: Option<String>,
}

impl SourceDescriptor {
    pub fn new(path: impl Into<PathBuf>, mimetype: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mimetype: mimetype.into(),
            dimensions: None,
            compression: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some(Dimensions { width, height });
        self
    }

    pub fn kind(&self) -> SourceKind {
        SourceKind::from_mimetype(&self.mimetype)
    }

    /// Descriptor for an intermediate file produced by an earlier stage.
    pub fn derived(
        &self,
        path: impl Into<PathBuf>,
        mimetype: impl Into<String>,
        dimensions: Option<Dimensions>,
    ) -> Self {
        Self {
            path: path.into(),
            mimetype: mimetype.into(),
            dimensions,
            compression: None,
        }
    }
}

/// Source inspection capability used by the scheduler.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<SourceDescriptor>;
}

/// Probe backed by external tools with an in-process magic fallback.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    tools: ToolPaths,
}

impl MediaProbe {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    /// Mimetype of `path`.
    pub async fn classify(&self, path: &Path) -> Result<String> {
        Ok(self.inspect(path).await?.mimetype)
    }

    /// Intrinsic dimensions of `path`, `None` when only a fallback could identify it.
    pub async fn measure(&self, path: &Path) -> Result<Option<Dimensions>> {
        Ok(self.inspect(path).await?.dimensions)
    }

    async fn exiftool(&self, path: &Path) -> std::result::Result<SourceDescriptor, ToolError> {
        let parsed = ToolCommand::new(&self.tools.exiftool)
            .args(&["-j", "-n", "-MIMEType", "-ImageWidth", "-ImageHeight", "-Compression"])
            .output(path)
            .execute_json()
            .await?;

        parse_exiftool_output(path, &parsed)
    }

    async fn file_command(&self, path: &Path) -> std::result::Result<String, ToolError> {
        let output = ToolCommand::new(&self.tools.file)
            .args(&["-b", "-L", "--mime-type"])
            .output(path)
            .execute()
            .await?;

        let mimetype = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // file(1) reports open errors on stdout with a zero exit status
        if mimetype.is_empty() || !mimetype.contains('/') || mimetype.contains(char::is_whitespace) {
            return Err(ToolError::InvalidOutput(format!("unexpected mimetype {:?}", mimetype)));
        }
        Ok(mimetype)
    }
}

#[async_trait]
impl Probe for MediaProbe {
    async fn inspect(&self, path: &Path) -> Result<SourceDescriptor> {
        let primary = match self.exiftool(path).await {
            Ok(source) => return Ok(source),
            Err(e) => e,
        };
        debug!("exiftool failed for {}: {}, trying file(1)", path.display(), primary);

        let fallback = match self.file_command(path).await {
            Ok(mimetype) => return Ok(SourceDescriptor::new(path, mimetype)),
            Err(e) => e,
        };
        debug!("file(1) failed for {}: {}, sniffing magic", path.display(), fallback);

        match sniff_mimetype(path).await {
            Some(mimetype) => Ok(SourceDescriptor::new(path, mimetype)),
            None => Err(CacheError::ProbeFailed {
                path: path.to_path_buf(),
                reason: format!("{}; {}", primary, fallback),
            }),
        }
    }
}

/// Magic-number sniff without any external tool.
pub async fn sniff_mimetype(path: &Path) -> Option<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Ok(Some(kind)) = infer::get_from_path(&path) {
            return Some(kind.mime_type().to_string());
        }
        tree_magic_mini::from_filepath(&path)
            .filter(|mime| *mime != "application/octet-stream")
            .map(|mime| mime.to_string())
    })
    .await
    .ok()
    .flatten()
}

fn parse_exiftool_output(
    path: &Path,
    parsed: &serde_json::Value,
) -> std::result::Result<SourceDescriptor, ToolError> {
    let tags = parsed
        .as_array()
        .and_then(|entries| entries.first())
        .ok_or_else(|| ToolError::InvalidOutput("No metadata found".to_string()))?;

    let mimetype = tags
        .get("MIMEType")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidOutput("No MIMEType reported".to_string()))?;

    let get_u32 = |key: &str| -> Option<u32> {
        tags.get(key).and_then(|v| {
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
    };

    let dimensions = match (get_u32("ImageWidth"), get_u32("ImageHeight")) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Some(Dimensions { width, height }),
        _ => None,
    };

    let compression = tags.get("Compression").and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    });

    Ok(SourceDescriptor {
        path: path.to_path_buf(),
        mimetype: mimetype.to_string(),
        dimensions,
        compression,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mimetype_classification() {
        assert_eq!(SourceKind::from_mimetype("image/jpeg"), SourceKind::Image);
        assert_eq!(SourceKind::from_mimetype("image/x-canon-cr2"), SourceKind::RawImage);
        assert_eq!(SourceKind::from_mimetype("video/mp4"), SourceKind::Video);
        assert_eq!(SourceKind::from_mimetype("audio/mpeg"), SourceKind::Audio);
        assert_eq!(SourceKind::from_mimetype("application/pdf"), SourceKind::Document);
        assert_eq!(
            SourceKind::from_mimetype(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            SourceKind::Document
        );
        assert_eq!(SourceKind::from_mimetype("application/zip"), SourceKind::Other);
    }

    #[test]
    fn test_parse_exiftool_output() {
        let parsed = json!([{
            "SourceFile": "clip.avi",
            "MIMEType": "video/x-msvideo",
            "ImageWidth": 720,
            "ImageHeight": 576,
            "Compression": "dvsd"
        }]);
        let source = parse_exiftool_output(Path::new("clip.avi"), &parsed).unwrap();
        assert_eq!(source.mimetype, "video/x-msvideo");
        assert_eq!(source.dimensions, Some(Dimensions { width: 720, height: 576 }));
        assert_eq!(source.compression.as_deref(), Some("dvsd"));
        assert_eq!(source.kind(), SourceKind::Video);
    }

    #[test]
    fn test_parse_exiftool_output_without_mimetype() {
        let parsed = json!([{ "SourceFile": "x" }]);
        assert!(parse_exiftool_output(Path::new("x"), &parsed).is_err());
        assert!(parse_exiftool_output(Path::new("x"), &json!([])).is_err());
    }

    #[tokio::test]
    async fn test_sniff_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        image::RgbImage::new(4, 2).save(&path).unwrap();

        assert_eq!(sniff_mimetype(&path).await.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_probe_fails_for_missing_file() {
        let probe = MediaProbe::default();
        let err = probe
            .inspect(Path::new("/nonexistent/definitely/missing.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ProbeFailed { .. }));
    }

    #[tokio::test]
    async fn test_probe_identifies_generated_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.png");
        image::RgbImage::new(35, 15).save(&path).unwrap();

        let probe = MediaProbe::default();
        let mimetype = probe.classify(&path).await.unwrap();
        assert_eq!(SourceKind::from_mimetype(&mimetype), SourceKind::Image);
    }
}
