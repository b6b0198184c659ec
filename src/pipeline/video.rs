//! Video renditions via FFmpeg

use async_trait::async_trait;
use std::path::PathBuf;

use super::ImageToImage;
use crate::converter::{Converter, Destination};
use crate::error::Result;
use crate::format::{Angle, FormatDescriptor};
use crate::probe::SourceDescriptor;
use crate::tools::{ToolCommand, ToolPaths};

/// Compose the `-vf` chain for a video rendition.
///
/// Order: deinterlace, rotate, mirror, scale.
pub fn video_filters(format: &FormatDescriptor, deinterlace: bool) -> Vec<String> {
    let mut filters = Vec::new();

    if deinterlace {
        filters.push("yadif".to_string());
    }

    match format.angle {
        Some(Angle::Quarter) => filters.push("transpose=2".to_string()),
        Some(Angle::Half) => filters.push("transpose=1,transpose=1".to_string()),
        Some(Angle::ThreeQuarter) => filters.push("transpose=1".to_string()),
        None => {}
    }

    if format.mirror {
        filters.push("hflip".to_string());
    }

    match (format.width, format.height) {
        (Some(w), Some(h)) => filters.push(format!("scale={}:{}", w, h)),
        (Some(w), None) => filters.push(format!("scale={}:-1", w)),
        (None, Some(h)) => filters.push(format!("scale=-1:{}", h)),
        (None, None) => {}
    }

    filters
}

/// First frame of a video, then the image pipeline.
#[derive(Debug, Clone)]
pub struct VideoToImage {
    tools: ToolPaths,
    image: ImageToImage,
}

impl VideoToImage {
    pub fn new(tools: ToolPaths, image: ImageToImage) -> Self {
        Self { tools, image }
    }
}

#[async_trait]
impl Converter for VideoToImage {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf> {
        let frame = destination.scratch.join("video2image.jpg");

        let mut cmd = ToolCommand::new(&self.tools.ffmpeg)
            .arg("-y")
            .input(&source.path);

        if destination.deinterlace {
            cmd = cmd.args(&["-filter:v", "yadif"]);
        }

        cmd.args(&["-frames:v", "1", "-an", "-q:v", "1"])
            .output(&frame)
            .current_dir(&destination.scratch)
            .execute()
            .await?;

        let still = source.derived(frame, "image/jpeg", source.dimensions);
        self.image.convert(&still, destination).await
    }
}

/// Two-pass VP8/Vorbis WebM transcode.
#[derive(Debug, Clone)]
pub struct VideoToVideo {
    tools: ToolPaths,
}

impl VideoToVideo {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    fn base_command(&self, source: &SourceDescriptor, destination: &Destination) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.tools.ffmpeg)
            .arg("-y")
            .input(&source.path);

        let filters = video_filters(&destination.format, destination.deinterlace);
        if !filters.is_empty() {
            cmd = cmd.arg("-vf").arg(filters.join(","));
        }

        cmd.args(&[
            "-codec:v", "libvpx",
            "-cpu-used", "0",
            "-b:v", "500k",
            "-qmin", "10",
            "-qmax", "42",
            "-maxrate", "500k",
            "-bufsize", "1000k",
        ])
        .arg("-threads")
        .arg(destination.threads.max(1).to_string())
        .arg("-passlogfile")
        .output(destination.scratch.join("video2video"))
        .current_dir(&destination.scratch)
    }
}

#[async_trait]
impl Converter for VideoToVideo {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf> {
        let pass1 = destination.scratch.join("video2video_pass1.webm");
        let pass2 = destination.scratch.join("video2video_pass2.webm");

        self.base_command(source, destination)
            .args(&["-an", "-pass", "1", "-f", "webm"])
            .output(&pass1)
            .execute()
            .await?;

        self.base_command(source, destination)
            .args(&[
                "-codec:a", "libvorbis",
                "-b:a", "128k",
                "-ar", "44100",
                "-pass", "2",
                "-f", "webm",
            ])
            .output(&pass2)
            .execute()
            .await?;

        Ok(pass2)
    }
}
