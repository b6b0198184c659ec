//! Built-in transformation pipelines, one per [`Route`](crate::converter::Route).

mod audio;
mod document;
mod image;
mod video;

pub use audio::{AudioToAudio, AudioToImage};
pub use document::{DocumentToDocument, DocumentToImage};
pub use self::image::{plan_resize, render, ImageToImage, ResizePlan};
pub use video::{video_filters, VideoToImage, VideoToVideo};

/// JPEG quality for every image rendition.
pub const JPEG_QUALITY: u8 = 91;
