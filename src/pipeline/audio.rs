//! Audio renditions via FFmpeg

use async_trait::async_trait;
use std::path::PathBuf;

use super::ImageToImage;
use crate::converter::{Converter, Destination};
use crate::error::Result;
use crate::probe::{Dimensions, SourceDescriptor};
use crate::tools::{ToolCommand, ToolPaths};

const WAVEFORM_WIDTH: u32 = 720;
const WAVEFORM_COLOR: &str = "0x327DE6";

/// Vorbis in a WebM container.
#[derive(Debug, Clone)]
pub struct AudioToAudio {
    tools: ToolPaths,
}

impl AudioToAudio {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Converter for AudioToAudio {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf> {
        let output = destination.scratch.join("audio2audio.webm");

        ToolCommand::new(&self.tools.ffmpeg)
            .arg("-y")
            .input(&source.path)
            .args(&[
                "-vn",                 // Drop cover art
                "-codec:a", "libvorbis",
                "-b:a", "128k",
                "-ar", "44100",
            ])
            .arg("-threads")
            .arg(destination.threads.max(1).to_string())
            .args(&["-f", "webm"])
            .output(&output)
            .current_dir(&destination.scratch)
            .execute()
            .await?;

        Ok(output)
    }
}

/// Waveform picture of the track, then the image pipeline.
#[derive(Debug, Clone)]
pub struct AudioToImage {
    tools: ToolPaths,
    image: ImageToImage,
}

impl AudioToImage {
    pub fn new(tools: ToolPaths, image: ImageToImage) -> Self {
        Self { tools, image }
    }

    /// Waveform canvas size: requested width (default 720), height at 4:3 unless given.
    pub fn waveform_size(width: Option<u32>, height: Option<u32>) -> Dimensions {
        let width = width.unwrap_or(WAVEFORM_WIDTH).max(1);
        let height = height
            .unwrap_or_else(|| (u64::from(width) * 3 / 4) as u32)
            .max(1);
        Dimensions { width, height }
    }
}

#[async_trait]
impl Converter for AudioToImage {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf> {
        let picture = destination.scratch.join("audio2image.png");
        let size = Self::waveform_size(destination.format.width, destination.format.height);

        ToolCommand::new(&self.tools.ffmpeg)
            .arg("-y")
            .input(&source.path)
            .arg("-filter_complex")
            .arg(format!(
                "aformat=channel_layouts=mono,showwavespic=s={}x{}:colors={}",
                size.width, size.height, WAVEFORM_COLOR
            ))
            .args(&["-frames:v", "1"])
            .output(&picture)
            .current_dir(&destination.scratch)
            .execute()
            .await?;

        let waveform = source.derived(picture, "image/png", Some(size));
        self.image.convert(&waveform, destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_defaults() {
        assert_eq!(
            AudioToImage::waveform_size(None, None),
            Dimensions { width: 720, height: 540 }
        );
        assert_eq!(
            AudioToImage::waveform_size(Some(20), None),
            Dimensions { width: 20, height: 15 }
        );
        assert_eq!(
            AudioToImage::waveform_size(Some(20), Some(30)),
            Dimensions { width: 20, height: 30 }
        );
        assert_eq!(
            AudioToImage::waveform_size(Some(1), None),
            Dimensions { width: 1, height: 1 }
        );
        assert_eq!(
            AudioToImage::waveform_size(Some(u32::MAX), None),
            Dimensions { width: u32::MAX, height: 3_221_225_471 }
        );
    }
}
