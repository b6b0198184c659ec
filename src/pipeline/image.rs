//! Image renditions
//!
//! Decoding, rotation, mirroring, resizing and JPEG encoding happen in
//! process with `image` and `fast_image_resize`. External tools are only
//! used to get pixels out of formats the `image` crate cannot read: camera
//! raw files go through ImageMagick, anything else through ffmpeg.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::JPEG_QUALITY;
use crate::converter::{Converter, Destination};
use crate::error::Result;
use crate::format::{Angle, FormatDescriptor};
use crate::probe::{SourceDescriptor, SourceKind};
use crate::tools::{ToolCommand, ToolError, ToolPaths};

/// Upper bound on the pixels of any intermediate or final rendition.
pub const MAX_OUTPUT_PIXELS: u64 = 100_000_000;

/// Target size after rotation, plus an optional centered crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub width: u32,
    pub height: u32,
    /// `(x, y, width, height)` applied after resizing.
    pub crop: Option<(u32, u32, u32, u32)>,
}

/// Work out how to reach the requested size from a `width`×`height` image.
///
/// One dimension keeps the aspect ratio; both dimensions resize to fill and
/// crop the overflow around the center.
pub fn plan_resize(width: u32, height: u32, format: &FormatDescriptor) -> ResizePlan {
    let (sw, sh) = (f64::from(width.max(1)), f64::from(height.max(1)));
    let scaled = |v: f64| (v.round() as u32).max(1);

    match (format.width, format.height) {
        (None, None) => ResizePlan { width, height, crop: None },
        (Some(w), None) => ResizePlan {
            width: w,
            height: scaled(f64::from(w) * sh / sw),
            crop: None,
        },
        (None, Some(h)) => ResizePlan {
            width: scaled(f64::from(h) * sw / sh),
            height: h,
            crop: None,
        },
        (Some(w), Some(h)) => {
            let scale = (f64::from(w) / sw).max(f64::from(h) / sh);
            let rw = scaled(sw * scale).max(w);
            let rh = scaled(sh * scale).max(h);
            ResizePlan {
                width: rw,
                height: rh,
                crop: Some(((rw - w) / 2, (rh - h) / 2, w, h)),
            }
        }
    }
}

/// Apply rotation, mirroring and resizing to decoded pixels.
pub fn render(img: DynamicImage, format: &FormatDescriptor) -> std::result::Result<RgbImage, ToolError> {
    let mut rgb = flatten(img);

    // Angles are counterclockwise; imageops rotates clockwise.
    rgb = match format.angle {
        None => rgb,
        Some(Angle::Quarter) => imageops::rotate270(&rgb),
        Some(Angle::Half) => imageops::rotate180(&rgb),
        Some(Angle::ThreeQuarter) => imageops::rotate90(&rgb),
    };

    if format.mirror {
        imageops::flip_horizontal_in_place(&mut rgb);
    }

    let plan = plan_resize(rgb.width(), rgb.height(), format);
    let pixels = u64::from(plan.width) * u64::from(plan.height);
    if pixels > MAX_OUTPUT_PIXELS {
        return Err(ToolError::Codec(format!(
            "Resize to {}x{} exceeds {} pixels",
            plan.width, plan.height, MAX_OUTPUT_PIXELS
        )));
    }
    if (plan.width, plan.height) != rgb.dimensions() {
        rgb = resize(rgb, plan.width, plan.height)?;
    }

    if let Some((x, y, w, h)) = plan.crop {
        rgb = imageops::crop_imm(&rgb, x, y, w, h).to_image();
    }

    Ok(rgb)
}

/// Composite any alpha channel onto white.
fn flatten(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }

    let rgba = img.into_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let alpha = u16::from(src[3]);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    rgb
}

fn resize(rgb: RgbImage, width: u32, height: u32) -> std::result::Result<RgbImage, ToolError> {
    use fast_image_resize as fr;
    use fr::images::Image as FrImage;

    let (src_width, src_height) = rgb.dimensions();
    let src_image = FrImage::from_vec_u8(src_width, src_height, rgb.into_raw(), fr::PixelType::U8x3)
        .map_err(|e| ToolError::Codec(format!("Failed to create source image: {:?}", e)))?;

    let mut dst_image = FrImage::new(width, height, src_image.pixel_type());

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, None)
        .map_err(|e| ToolError::Codec(format!("Resize failed: {:?}", e)))?;

    RgbImage::from_raw(width, height, dst_image.buffer().to_vec())
        .ok_or_else(|| ToolError::Codec("Failed to create image from resized data".to_string()))
}

fn save_jpeg(rgb: &RgbImage, path: &Path) -> std::result::Result<(), ToolError> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|e| ToolError::Codec(format!("Failed to save image: {}", e)))?;
    writer.flush()?;
    Ok(())
}

/// Resize/rotate/mirror pipeline producing a JPEG.
#[derive(Debug, Clone)]
pub struct ImageToImage {
    tools: ToolPaths,
}

impl ImageToImage {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    /// Decode a camera raw file to PNG via ImageMagick's format prefix (`cr2:`, `nef:`, ...).
    async fn decode_raw(&self, source: &SourceDescriptor, scratch: &Path) -> Result<PathBuf> {
        let output = scratch.join("image2image_raw.png");
        let format = source
            .mimetype
            .rsplit('-')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        ToolCommand::new(&self.tools.convert)
            .arg(format!("{}:{}", format, source.path.display()))
            .output(&output)
            .current_dir(scratch)
            .execute()
            .await?;

        Ok(output)
    }

    /// Decode with ffmpeg when the `image` crate does not know the format.
    async fn decode_with_ffmpeg(&self, input: &Path, scratch: &Path) -> Result<PathBuf> {
        let output = scratch.join("image2image_decoded.png");

        ToolCommand::new(&self.tools.ffmpeg)
            .arg("-y")
            .input(input)
            .args(&["-frames:v", "1"])
            .output(&output)
            .current_dir(scratch)
            .execute()
            .await?;

        Ok(output)
    }
}

async fn open(path: PathBuf) -> std::result::Result<DynamicImage, ToolError> {
    tokio::task::spawn_blocking(move || {
        image::open(&path).map_err(|e| ToolError::Codec(format!("Failed to load image: {}", e)))
    })
    .await
    .map_err(|e| ToolError::Codec(format!("Decode task failed: {}", e)))?
}

#[async_trait]
impl Converter for ImageToImage {
    async fn convert(&self, source: &SourceDescriptor, destination: &Destination) -> Result<PathBuf> {
        let input = if source.kind() == SourceKind::RawImage {
            self.decode_raw(source, &destination.scratch).await?
        } else {
            source.path.clone()
        };

        let img = match open(input.clone()).await {
            Ok(img) => img,
            Err(e) => {
                debug!("{}, decoding {} with ffmpeg", e, input.display());
                let decoded = self.decode_with_ffmpeg(&input, &destination.scratch).await?;
                open(decoded).await?
            }
        };

        let output = destination.scratch.join("image2image.jpg");
        let format = destination.format;
        let target = output.clone();

        tokio::task::spawn_blocking(move || -> std::result::Result<(), ToolError> {
            let rgb = render(img, &format)?;
            save_jpeg(&rgb, &target)
        })
        .await
        .map_err(|e| ToolError::Codec(format!("Render task failed: {}", e)))??;

        Ok(output)
    }
}
