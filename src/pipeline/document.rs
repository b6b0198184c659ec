//! Document renditions: PDF normalization and first-page previews.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{ImageToImage, JPEG_QUALITY};
use crate::converter::{Converter, Destination};
use crate::error::Result;
use crate::probe::{Dimensions, SourceDescriptor};
use crate::tools::{tool_path, ToolCommand, ToolPaths};

const PDF_MIMETYPE: &str = "application/pdf";
const PREVIEW_CANVAS: u32 = 600;

/// Any office document to PDF; PDFs pass through untouched.
#[derive(Debug, Clone)]
pub struct DocumentToDocument {
    tools: ToolPaths,
}

impl DocumentToDocument {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Converter for DocumentToDocument {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf> {
        let output = destination.scratch.join("document2document.pdf");

        if source.mimetype == PDF_MIMETYPE {
            tokio::fs::copy(&source.path, &output).await?;
            return Ok(output);
        }

        ToolCommand::new(&self.tools.unoconv)
            .args(&["-f", "pdf", "-o"])
            .output(&output)
            .path(&source.path)
            .current_dir(&destination.scratch)
            .execute()
            .await?;

        Ok(output)
    }
}

/// First page on a neutral square canvas, then the image pipeline.
#[derive(Debug, Clone)]
pub struct DocumentToImage {
    tools: ToolPaths,
    document: DocumentToDocument,
    image: ImageToImage,
}

impl DocumentToImage {
    pub fn new(tools: ToolPaths, document: DocumentToDocument, image: ImageToImage) -> Self {
        Self { tools, document, image }
    }
}

#[async_trait]
impl Converter for DocumentToImage {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf> {
        let pdf = self.document.convert(source, destination).await?;
        let quality = JPEG_QUALITY.to_string();

        let page = destination.scratch.join("document2image1.jpg");
        ToolCommand::new(&self.tools.convert)
            .arg(format!("{}[0]", tool_path(&pdf)))
            .args(&["-thumbnail", "x590", "-background", "white", "-alpha", "remove"])
            .args(&["-quality", quality.as_str()])
            .output(&page)
            .current_dir(&destination.scratch)
            .execute()
            .await?;

        let canvas = destination.scratch.join("document2image2.jpg");
        ToolCommand::new(&self.tools.convert)
            .path(&page)
            .args(&["-gravity", "center", "-background", "#EFEFEF"])
            .arg("-extent")
            .arg(format!("{0}x{0}", PREVIEW_CANVAS))
            .args(&["-quality", quality.as_str()])
            .output(&canvas)
            .current_dir(&destination.scratch)
            .execute()
            .await?;

        let preview = source.derived(
            canvas,
            "image/jpeg",
            Some(Dimensions {
                width: PREVIEW_CANVAS,
                height: PREVIEW_CANVAS,
            }),
        );
        self.image.convert(&preview, destination).await
    }
}
