//! The cache itself: lookups, enumeration and removal over one directory.
//!
//! Published renditions live flat in `cache_path`, named by their
//! [`CacheKey`]. Presence of the file is the only record of a cache entry;
//! there is no index to keep in sync.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::converter::ConverterRegistry;
use crate::error::{CacheError, Result};
use crate::format::{validate_id, CacheKey, FormatRequest, MediaKind};
use crate::metrics::Metrics;
use crate::probe::{MediaProbe, Probe};
use crate::scheduler::{JobStatus, Scheduler};

#[derive(Clone)]
pub struct CacheStore {
    cache_path: PathBuf,
    scheduler: Scheduler,
    metrics: Arc<Metrics>,
}

impl CacheStore {
    /// Open a store with the built-in probe and converters.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        Self::with_components(
            config,
            Arc::new(MediaProbe::new(config.tools.clone())),
            ConverterRegistry::builtin(&config.tools),
            Metrics::new(),
        )
    }

    /// Open a store with an explicit probe, converter set and metrics sink.
    /// Creates the cache and scratch directories when missing.
    pub fn with_components(
        config: &CacheConfig,
        probe: Arc<dyn Probe>,
        registry: ConverterRegistry,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.cache_path)?;
        std::fs::create_dir_all(config.scratch_root())?;

        info!(
            "Cache at {} (scratch {}, {} image slots)",
            config.cache_path.display(),
            config.scratch_root().display(),
            config.image_capacity()
        );

        Ok(Self {
            cache_path: config.cache_path.clone(),
            scheduler: Scheduler::new(config, probe, registry, Arc::clone(&metrics)),
            metrics,
        })
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Path of the rendition of `id` in `request`'s format, producing it from
    /// `source` when it is not cached yet.
    ///
    /// The format is validated before anything else, so a bad request never
    /// creates a job.
    pub async fn get(&self, id: &str, source: impl AsRef<Path>, request: &FormatRequest) -> Result<PathBuf> {
        let format = request.normalize()?;
        let key = CacheKey::new(id, format)?;
        let path = self.cache_path.join(key.file_name());

        if is_file(&path).await {
            debug!("Cache hit {}", key);
            self.metrics.record_lookup(true);
            return Ok(path);
        }

        let source = source.as_ref();
        if !is_file(source).await {
            return Err(CacheError::SourceNotFound(source.to_path_buf()));
        }

        debug!("Cache miss {}", key);
        self.metrics.record_lookup(false);
        self.scheduler.enqueue(&key, source).await
    }

    /// Every cached rendition of `id` of the given kind, sorted by path.
    pub async fn get_all(&self, id: &str, kind: MediaKind) -> Result<Vec<PathBuf>> {
        validate_id(id)?;

        let mut paths: Vec<PathBuf> = self
            .entries()
            .await?
            .into_iter()
            .filter(|(key, _)| key.id() == id && key.format().kind == kind)
            .map(|(_, path)| path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Delete every rendition of the given ids. Returns how many files were removed.
    ///
    /// Running jobs are not cancelled; a rendition they publish afterwards stays.
    pub async fn remove<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        for id in ids {
            validate_id(id.as_ref())?;
        }

        let mut removed = 0;
        for (key, path) in self.entries().await? {
            if !ids.iter().any(|id| id.as_ref() == key.id()) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                // Gone already, another remove got there first
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("Removed {} cached renditions", removed);
        Ok(removed)
    }

    /// Pending and running jobs, oldest first.
    pub fn status(&self) -> Vec<JobStatus> {
        self.scheduler.status()
    }

    /// Parsable cache entries. Staging files and foreign names are skipped.
    async fn entries(&self) -> Result<Vec<(CacheKey, PathBuf)>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.cache_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match CacheKey::parse(name) {
                Ok(key) => entries.push((key, entry.path())),
                Err(_) if name.starts_with('.') => {}
                Err(e) => warn!("Ignoring {}: {}", name, e),
            }
        }

        Ok(entries)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
