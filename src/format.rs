//! Cache key codec
//!
//! A rendition is identified by a content id and a normalized format. The
//! pair is encoded into a flat filename,
//! `{id}_w{width}_h{height}_s{square}_a{angle}_m{mirror}.{ext}`, which is both
//! the dedup key for in-flight jobs and the on-disk index of the cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CacheError, Result};

/// Output media kind of a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Image,
        MediaKind::Video,
        MediaKind::Audio,
        MediaKind::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    /// File extension of published renditions. Audio uses the WebM audio
    /// extension so that keys stay decodable back to their kind.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "webm",
            MediaKind::Audio => "weba",
            MediaKind::Document => "pdf",
        }
    }

    pub fn from_extension(ext: &str) -> Option<MediaKind> {
        MediaKind::ALL.into_iter().find(|kind| kind.extension() == ext)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            "document" => Ok(MediaKind::Document),
            other => Err(CacheError::UnsupportedKind(other.to_string())),
        }
    }
}

/// A right-angle rotation, counterclockwise.
///
/// Signed requests are folded onto the counterclockwise range, so `-90`
/// and `270` name the same rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Angle {
    Quarter,
    Half,
    ThreeQuarter,
}

impl Angle {
    /// Normalize a requested angle. `0` means no rotation.
    pub fn from_degrees(degrees: i64) -> Result<Option<Angle>> {
        match degrees {
            0 => Ok(None),
            90 | -270 => Ok(Some(Angle::Quarter)),
            180 | -180 => Ok(Some(Angle::Half)),
            270 | -90 => Ok(Some(Angle::ThreeQuarter)),
            other => Err(CacheError::InvalidAngle(other)),
        }
    }

    pub fn degrees(&self) -> i64 {
        match self {
            Angle::Quarter => 90,
            Angle::Half => 180,
            Angle::ThreeQuarter => 270,
        }
    }

    /// Whether the rotation swaps width and height.
    pub fn is_transposing(&self) -> bool {
        !matches!(self, Angle::Half)
    }
}

impl TryFrom<i64> for Angle {
    type Error = CacheError;

    fn try_from(degrees: i64) -> Result<Self> {
        Angle::from_degrees(degrees)?.ok_or(CacheError::InvalidAngle(0))
    }
}

impl From<Angle> for i64 {
    fn from(angle: Angle) -> i64 {
        angle.degrees()
    }
}

/// Format as requested by a client, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatRequest {
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<bool>,
}

impl FormatRequest {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn angle(mut self, angle: i64) -> Self {
        self.angle = Some(angle);
        self
    }

    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Validate and canonicalize. Zero dimensions and a zero angle collapse
    /// to "absent"; non-right angles are rejected.
    pub fn normalize(&self) -> Result<FormatDescriptor> {
        Ok(FormatDescriptor {
            kind: self.kind.parse()?,
            width: self.width.filter(|w| *w > 0),
            height: self.height.filter(|h| *h > 0),
            angle: match self.angle {
                Some(degrees) => Angle::from_degrees(degrees)?,
                None => None,
            },
            mirror: self.mirror.unwrap_or(false),
        })
    }
}

/// A validated, normalized output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub angle: Option<Angle>,
    pub mirror: bool,
}

impl FormatDescriptor {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            width: None,
            height: None,
            angle: None,
            mirror: false,
        }
    }

    /// Both dimensions equal, including both absent.
    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    pub fn is_native_size(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// `(id, format)` identifying one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    id: String,
    format: FormatDescriptor,
}

impl CacheKey {
    pub fn new(id: impl Into<String>, format: FormatDescriptor) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self { id, format })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Canonical filename of the rendition inside the cache directory.
    pub fn file_name(&self) -> String {
        let f = &self.format;
        format!(
            "{}_w{}_h{}_s{}_a{}_m{}.{}",
            self.id,
            f.width.unwrap_or(0),
            f.height.unwrap_or(0),
            u8::from(f.is_square()),
            f.angle.map(|a| a.degrees()).unwrap_or(0),
            u8::from(f.mirror),
            f.kind.extension(),
        )
    }

    /// Inverse of [`CacheKey::file_name`].
    pub fn parse(file_name: &str) -> Result<Self> {
        let malformed = || CacheError::MalformedKey(file_name.to_string());

        let (stem, ext) = file_name.rsplit_once('.').ok_or_else(malformed)?;
        let kind = MediaKind::from_extension(ext).ok_or_else(malformed)?;

        // Fields are parsed from the right; the id may itself contain '_'.
        let mut fields = stem.rsplitn(6, '_');
        let mirror = take_field(fields.next(), 'm').ok_or_else(malformed)?;
        let angle = take_field(fields.next(), 'a').ok_or_else(malformed)?;
        let square = take_field(fields.next(), 's').ok_or_else(malformed)?;
        let height = take_field(fields.next(), 'h').ok_or_else(malformed)?;
        let width = take_field(fields.next(), 'w').ok_or_else(malformed)?;
        let id = fields.next().ok_or_else(malformed)?;

        let width = u32::try_from(width).map_err(|_| malformed())?;
        let height = u32::try_from(height).map_err(|_| malformed())?;
        let mirror = match mirror {
            0 => false,
            1 => true,
            _ => return Err(malformed()),
        };
        let angle = match angle {
            0 => None,
            90 => Some(Angle::Quarter),
            180 => Some(Angle::Half),
            270 => Some(Angle::ThreeQuarter),
            _ => return Err(malformed()),
        };

        let format = FormatDescriptor {
            kind,
            width: Some(width).filter(|w| *w > 0),
            height: Some(height).filter(|h| *h > 0),
            angle,
            mirror,
        };

        if i64::from(u8::from(format.is_square())) != square {
            return Err(malformed());
        }

        CacheKey::new(id, format).map_err(|_| malformed())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Ids become filename prefixes, so they must stay inside the cache directory.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\', '\0']) || id == "." || id == ".." {
        return Err(CacheError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn take_field(field: Option<&str>, tag: char) -> Option<i64> {
    field?.strip_prefix(tag)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, request: FormatRequest) -> CacheKey {
        CacheKey::new(id, request.normalize().unwrap()).unwrap()
    }

    #[test]
    fn test_file_name_layout() {
        let k = key("42", FormatRequest::new(MediaKind::Image).width(20));
        assert_eq!(k.file_name(), "42_w20_h0_s0_a0_m0.jpg");

        let k = key("42", FormatRequest::new(MediaKind::Image).width(20).height(20).mirror(true));
        assert_eq!(k.file_name(), "42_w20_h20_s1_a0_m1.jpg");

        let k = key("7", FormatRequest::new(MediaKind::Video).angle(90));
        assert_eq!(k.file_name(), "7_w0_h0_s1_a90_m0.webm");

        let k = key("7", FormatRequest::new(MediaKind::Audio));
        assert_eq!(k.file_name(), "7_w0_h0_s1_a0_m0.weba");
    }

    #[test]
    fn test_equivalent_requests_share_a_key() {
        let plain = key("1", FormatRequest::new(MediaKind::Image));
        let zeroed = key(
            "1",
            FormatRequest::new(MediaKind::Image).width(0).height(0).angle(0).mirror(false),
        );
        assert_eq!(plain.file_name(), zeroed.file_name());

        let ccw = key("1", FormatRequest::new(MediaKind::Image).angle(-90));
        let cw = key("1", FormatRequest::new(MediaKind::Image).angle(270));
        assert_eq!(ccw.file_name(), cw.file_name());
    }

    #[test]
    fn test_parse_recovers_format() {
        let requests = [
            FormatRequest::new(MediaKind::Image).width(20),
            FormatRequest::new(MediaKind::Image).width(75).height(175).angle(90),
            FormatRequest::new(MediaKind::Video).height(30).angle(-180).mirror(true),
            FormatRequest::new(MediaKind::Audio),
            FormatRequest::new(MediaKind::Document).width(600).height(600),
        ];

        for request in requests {
            let original = key("id_with_underscores", request);
            let parsed = CacheKey::parse(&original.file_name()).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for name in [
            "1_w20_h0_s0_a0_m0",
            "1_w20_h0_s0_a0_m0.png",
            "1_w20_h0_s0_a0.jpg",
            "_w20_h0_s0_a0_m0.jpg",
            "1_w20_h0_s1_a0_m0.jpg",
            "1_w20_h0_s0_a45_m0.jpg",
            "1_w20_h0_s0_a0_m2.jpg",
            "1_wx_h0_s0_a0_m0.jpg",
        ] {
            assert!(
                matches!(CacheKey::parse(name), Err(CacheError::MalformedKey(_))),
                "accepted {}",
                name
            );
        }
    }

    #[test]
    fn test_angle_normalization() {
        assert_eq!(Angle::from_degrees(0).unwrap(), None);
        assert_eq!(Angle::from_degrees(-270).unwrap(), Some(Angle::Quarter));
        assert_eq!(Angle::from_degrees(-180).unwrap(), Some(Angle::Half));
        assert!(matches!(Angle::from_degrees(45), Err(CacheError::InvalidAngle(45))));
        assert!(matches!(Angle::from_degrees(360), Err(CacheError::InvalidAngle(360))));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let request = FormatRequest {
            kind: "hologram".to_string(),
            ..Default::default()
        };
        assert!(matches!(request.normalize(), Err(CacheError::UnsupportedKind(_))));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let format = FormatDescriptor::new(MediaKind::Image);
        for id in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(CacheKey::new(id, format), Err(CacheError::InvalidId(_))));
        }
    }

    #[test]
    fn test_request_deserializes_type_field() {
        let request: FormatRequest =
            serde_json::from_str(r#"{"type":"image","width":20,"angle":-90}"#).unwrap();
        let format = request.normalize().unwrap();
        assert_eq!(format.kind, MediaKind::Image);
        assert_eq!(format.width, Some(20));
        assert_eq!(format.angle, Some(Angle::ThreeQuarter));
    }
}
