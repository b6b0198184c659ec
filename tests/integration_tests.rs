//! Integration tests for the media cache: end-to-end renditions through the
//! built-in image pipeline and the organ surface.

use media_cache::organ::{CacheOrgan, Organ, Stimulus};
use media_cache::{CacheConfig, CacheError, CacheKey, CacheStore, FormatRequest, MediaKind};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    store: CacheStore,
    source: PathBuf,
}

impl Fixture {
    /// Cache over a temp dir and a 350x150 PNG source with a red left half.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            cache_path: dir.path().join("cache"),
            scratch_path: Some(dir.path().join("scratch")),
            threads: 2,
            ..CacheConfig::default()
        };
        let store = CacheStore::open(&config).unwrap();

        let source = dir.path().join("source.png");
        let img = image::RgbImage::from_fn(350, 150, |x, _| {
            if x < 175 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        img.save(&source).unwrap();

        Self { dir, store, source }
    }

    fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }
}

fn dimensions(path: &Path) -> (u32, u32) {
    image::image_dimensions(path).unwrap()
}

fn scratch_leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("mcs-"))
        .collect()
}

#[tokio::test]
async fn test_width_only_keeps_aspect() {
    let fx = Fixture::new();

    let path = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).width(20))
        .await
        .unwrap();

    assert_eq!(path, fx.store.cache_path().join("1_w20_h0_s0_a0_m0.jpg"));
    assert_eq!(dimensions(&path), (20, 9));
    assert!(scratch_leftovers(&fx.scratch()).is_empty());
}

#[tokio::test]
async fn test_square_is_cropped() {
    let fx = Fixture::new();

    let path = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).width(20).height(20))
        .await
        .unwrap();

    assert_eq!(path.file_name().unwrap(), "1_w20_h20_s1_a0_m0.jpg");
    assert_eq!(dimensions(&path), (20, 20));
}

#[tokio::test]
async fn test_quarter_turn_swaps_dimensions() {
    let fx = Fixture::new();

    let path = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).angle(90))
        .await
        .unwrap();

    assert_eq!(path.file_name().unwrap(), "1_w0_h0_s1_a90_m0.jpg");
    assert_eq!(dimensions(&path), (150, 350));

    // Counterclockwise: the red left half ends up at the bottom.
    let img = image::open(&path).unwrap().to_rgb8();
    let bottom = img.get_pixel(75, 340);
    let top = img.get_pixel(75, 10);
    assert!(bottom[0] > 200 && bottom[2] < 60, "bottom pixel {:?}", bottom);
    assert!(top[2] > 200 && top[0] < 60, "top pixel {:?}", top);
}

#[tokio::test]
async fn test_negative_angle_shares_key() {
    let fx = Fixture::new();

    let a = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).angle(-90))
        .await
        .unwrap();
    let b = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).angle(270))
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(a.file_name().unwrap(), "1_w0_h0_s1_a270_m0.jpg");
}

#[tokio::test]
async fn test_remove_all_renditions_of_id() {
    let fx = Fixture::new();
    let mut created = Vec::new();
    for width in [20, 30] {
        let request = FormatRequest::new(MediaKind::Image).width(width);
        created.push(fx.store.get("9", &fx.source, &request).await.unwrap());
    }
    fx.store
        .get("2", &fx.source, &FormatRequest::new(MediaKind::Image).width(20))
        .await
        .unwrap();

    assert_eq!(fx.store.get_all("9", MediaKind::Image).await.unwrap(), created);
    assert_eq!(fx.store.remove(&["9"]).await.unwrap(), 2);
    assert!(created.iter().all(|path| !path.exists()));
    assert_eq!(fx.store.get_all("2", MediaKind::Image).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_angle_rejected_without_job() {
    let fx = Fixture::new();

    let err = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).angle(45))
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::InvalidAngle(45)));
    assert!(fx.store.status().is_empty());
    assert!(fx.store.get_all("1", MediaKind::Image).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_request_is_a_hit() {
    let fx = Fixture::new();
    let request = FormatRequest::new(MediaKind::Image).width(20).mirror(true);

    let first = fx.store.get("1", &fx.source, &request).await.unwrap();
    let modified = std::fs::metadata(&first).unwrap().modified().unwrap();

    // The source is gone; a hit must not need it.
    std::fs::remove_file(&fx.source).unwrap();
    let second = fx.store.get("1", &fx.source, &request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(std::fs::metadata(&second).unwrap().modified().unwrap(), modified);

    let snapshot = fx.store.metrics().snapshot();
    assert_eq!(snapshot.cache.misses, 1);
    assert_eq!(snapshot.cache.hits, 1);
    assert_eq!(snapshot.cache.conversions_published, 1);
}

#[tokio::test]
async fn test_published_names_parse_back() {
    let fx = Fixture::new();
    let request = FormatRequest::new(MediaKind::Image).height(30).angle(-180).mirror(true);

    let path = fx.store.get("photo_7", &fx.source, &request).await.unwrap();
    let key = CacheKey::parse(path.file_name().unwrap().to_str().unwrap()).unwrap();

    assert_eq!(key.id(), "photo_7");
    assert_eq!(*key.format(), request.normalize().unwrap());
}

#[tokio::test]
async fn test_unsupported_conversion_fails_job() {
    let fx = Fixture::new();

    let err = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Video))
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::UnsupportedConversion { .. }));
    assert!(fx.store.status().is_empty());
    assert!(scratch_leftovers(&fx.scratch()).is_empty());
}

#[tokio::test]
async fn test_oversized_request_fails_job_only() {
    let fx = Fixture::new();

    let err = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).width(1_000_000))
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::ConverterFailed(_)), "{:?}", err);
    assert!(fx.store.status().is_empty());
    assert!(scratch_leftovers(&fx.scratch()).is_empty());

    // The store keeps serving afterwards.
    let path = fx
        .store
        .get("1", &fx.source, &FormatRequest::new(MediaKind::Image).width(20))
        .await
        .unwrap();
    assert_eq!(dimensions(&path), (20, 9));
}

fn stimulus(op: &str, input: serde_json::Value) -> Stimulus {
    Stimulus {
        op: op.to_string(),
        input,
        context: HashMap::new(),
    }
}

#[tokio::test]
async fn test_organ_round_trip() {
    let fx = Fixture::new();
    let organ = CacheOrgan::new(fx.store.clone());
    let source = fx.source.to_str().unwrap();

    let response = organ
        .stimulate(stimulus(
            "cache.get",
            json!({"id": "9", "source": source, "format": {"type": "image", "width": 20}}),
        ))
        .await
        .unwrap();
    assert!(response.ok, "{}", response.output);
    let path = PathBuf::from(response.output["path"].as_str().unwrap());
    assert_eq!(dimensions(&path), (20, 9));

    let response = organ
        .stimulate(stimulus("cache.get_all", json!({"id": "9", "type": "image"})))
        .await
        .unwrap();
    assert_eq!(response.output["paths"].as_array().unwrap().len(), 1);

    let response = organ
        .stimulate(stimulus("cache.remove", json!({"ids": ["9"]})))
        .await
        .unwrap();
    assert_eq!(response.output["removed"], 1);

    let response = organ.stimulate(stimulus("metrics", json!({}))).await.unwrap();
    assert_eq!(response.output["operations"]["get"], 1);
    assert_eq!(response.output["cache"]["misses"], 1);
}

#[tokio::test]
async fn test_organ_describe() {
    let fx = Fixture::new();
    let organ = CacheOrgan::new(fx.store.clone());
    let card = organ.describe();

    assert_eq!(card.name, "media_cache");
    assert_eq!(card.division, "media");
    assert!(card.execution_modes.contains(&"server".to_string()));
    let names: Vec<&str> = card.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["cache.get", "cache.get_all", "cache.remove", "cache.status", "cache.capabilities"]
    );
}

#[tokio::test]
async fn test_organ_missing_source() {
    let fx = Fixture::new();
    let organ = CacheOrgan::new(fx.store.clone());

    let response = organ
        .stimulate(stimulus(
            "cache.get",
            json!({"id": "1", "source": "/nonexistent/file.png", "format": {"type": "image"}}),
        ))
        .await
        .unwrap();

    assert!(!response.ok);
    assert_eq!(response.output["error"], "SourceNotFound");
}
