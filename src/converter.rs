//! Conversion routing
//!
//! A closed table maps `(source kind, destination kind)` to exactly one
//! [`Route`]; each route is served by a [`Converter`] held in the
//! [`ConverterRegistry`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{CacheError, Result};
use crate::format::{FormatDescriptor, MediaKind};
use crate::pipeline::{
    AudioToAudio, AudioToImage, DocumentToDocument, DocumentToImage, ImageToImage, VideoToImage,
    VideoToVideo,
};
use crate::probe::{SourceDescriptor, SourceKind};
use crate::tools::ToolPaths;

/// Where and how a converter should produce its output.
#[derive(Debug, Clone)]
pub struct Destination {
    pub format: FormatDescriptor,
    /// Exclusively-owned scratch directory; outputs must be written here.
    pub scratch: PathBuf,
    /// Thread hint for tools that parallelize internally.
    pub threads: usize,
    pub deinterlace: bool,
}

impl Destination {
    pub fn new(format: FormatDescriptor, scratch: impl Into<PathBuf>) -> Self {
        Self {
            format,
            scratch: scratch.into(),
            threads: 1,
            deinterlace: false,
        }
    }

    /// Same scratch and settings, different output format.
    pub fn with_format(&self, format: FormatDescriptor) -> Self {
        Self {
            format,
            ..self.clone()
        }
    }
}

/// Converter capability: transform `source` into a file inside
/// `destination.scratch` and return its path.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    ImageToImage,
    VideoToImage,
    VideoToVideo,
    AudioToImage,
    AudioToAudio,
    DocumentToImage,
    DocumentToDocument,
}

impl Route {
    pub const ALL: [Route; 7] = [
        Route::ImageToImage,
        Route::VideoToImage,
        Route::VideoToVideo,
        Route::AudioToImage,
        Route::AudioToAudio,
        Route::DocumentToImage,
        Route::DocumentToDocument,
    ];

    /// The routing table. `None` for combinations with no pipeline.
    pub fn lookup(source: SourceKind, destination: MediaKind) -> Option<Route> {
        use MediaKind as D;
        use SourceKind as S;

        match (source, destination) {
            (S::Image | S::RawImage, D::Image) => Some(Route::ImageToImage),
            (S::Video, D::Image) => Some(Route::VideoToImage),
            (S::Video, D::Video) => Some(Route::VideoToVideo),
            (S::Audio, D::Image) => Some(Route::AudioToImage),
            (S::Audio, D::Audio) => Some(Route::AudioToAudio),
            (S::Document, D::Image) => Some(Route::DocumentToImage),
            (S::Document, D::Document) => Some(Route::DocumentToDocument),
            (S::Image | S::RawImage, D::Video | D::Audio | D::Document)
            | (S::Video, D::Audio | D::Document)
            | (S::Audio, D::Video | D::Document)
            | (S::Document, D::Video | D::Audio)
            | (S::Other, _) => None,
        }
    }

    /// Resolve the route for a probed source, with diagnostics on failure.
    pub fn resolve(source: &SourceDescriptor, destination: MediaKind) -> Result<Route> {
        let kind = source.kind();
        Route::lookup(kind, destination).ok_or_else(|| CacheError::UnsupportedConversion {
            mimetype: source.mimetype.clone(),
            source_kind: kind.to_string(),
            destination_kind: destination.to_string(),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::ImageToImage => "image2image",
            Route::VideoToImage => "video2image",
            Route::VideoToVideo => "video2video",
            Route::AudioToImage => "audio2image",
            Route::AudioToAudio => "audio2audio",
            Route::DocumentToImage => "document2image",
            Route::DocumentToDocument => "document2document",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converters by route.
#[derive(Clone)]
pub struct ConverterRegistry {
    converters: HashMap<Route, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// Registry with no converters; every lookup fails until routes are added.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// The tool-backed pipelines for every route.
    pub fn builtin(tools: &ToolPaths) -> Self {
        let image = ImageToImage::new(tools.clone());
        let document = DocumentToDocument::new(tools.clone());

        Self::empty()
            .with(Route::ImageToImage, image.clone())
            .with(Route::VideoToImage, VideoToImage::new(tools.clone(), image.clone()))
            .with(Route::VideoToVideo, VideoToVideo::new(tools.clone()))
            .with(Route::AudioToImage, AudioToImage::new(tools.clone(), image.clone()))
            .with(Route::AudioToAudio, AudioToAudio::new(tools.clone()))
            .with(
                Route::DocumentToImage,
                DocumentToImage::new(tools.clone(), document.clone(), image),
            )
            .with(Route::DocumentToDocument, document)
    }

    /// Install or replace the converter for `route`.
    pub fn with(mut self, route: Route, converter: impl Converter + 'static) -> Self {
        self.converters.insert(route, Arc::new(converter));
        self
    }

    pub fn with_shared(mut self, route: Route, converter: Arc<dyn Converter>) -> Self {
        self.converters.insert(route, converter);
        self
    }

    /// Converter for `route`, or `UnsupportedConversion` when none is installed.
    pub fn get(&self, route: Route, source: &SourceDescriptor, destination: MediaKind) -> Result<Arc<dyn Converter>> {
        self.converters
            .get(&route)
            .cloned()
            .ok_or_else(|| CacheError::UnsupportedConversion {
                mimetype: source.mimetype.clone(),
                source_kind: source.kind().to_string(),
                destination_kind: destination.to_string(),
            })
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<_> = self.converters.keys().map(Route::as_str).collect();
        routes.sort_unstable();
        f.debug_struct("ConverterRegistry").field("routes", &routes).finish()
    }
}
