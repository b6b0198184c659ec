//! Cache population scheduler
//!
//! Owns the job table. Concurrent requests for the same cache key attach to
//! one job and all receive its single outcome. Jobs are admitted into two
//! pools by the kind of rendition they produce:
//!
//! - **image-like** (image, document): `threads` slots
//! - **heavy** (video, audio): one slot, since transcodes already use every core
//!
//! Admission runs inside the table's critical section whenever a job is
//! added or finishes, so a freed slot is reused immediately by the oldest
//! pending job of the same class. Transforms run on their own tasks; the
//! admission pass never waits for one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::CacheConfig;
use crate::converter::{ConverterRegistry, Route};
use crate::error::{CacheError, Result};
use crate::executor::{Transform, TransformExecutor};
use crate::format::{CacheKey, FormatDescriptor, MediaKind};
use crate::metrics::Metrics;
use crate::probe::Probe;

/// Slots in the heavy pool.
pub const HEAVY_CAPACITY: usize = 1;

/// Compression tag of DV sources, which are interlaced.
const INTERLACED_COMPRESSION: &str = "dvsd";

/// Admission pool of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobClass {
    ImageLike,
    Heavy,
}

impl JobClass {
    pub fn of(kind: MediaKind) -> JobClass {
        match kind {
            MediaKind::Image | MediaKind::Document => JobClass::ImageLike,
            MediaKind::Video | MediaKind::Audio => JobClass::Heavy,
        }
    }
}

/// Diagnostic view of a pending or running job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub filename: String,
    pub source: PathBuf,
    pub format: FormatDescriptor,
    pub class: JobClass,
    pub running: bool,
    pub queued_at: DateTime<Utc>,
}

type Outcome = Result<PathBuf>;

struct Job {
    key: CacheKey,
    source: PathBuf,
    class: JobClass,
    seq: u64,
    running: bool,
    queued_at: DateTime<Utc>,
    done: watch::Sender<Option<Outcome>>,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Job>,
    next_seq: u64,
}

struct Inner {
    jobs: Mutex<JobTable>,
    cache_path: PathBuf,
    image_capacity: usize,
    probe: Arc<dyn Probe>,
    registry: ConverterRegistry,
    executor: TransformExecutor,
    metrics: Arc<Metrics>,
}

/// Cheap to clone; all clones share one job table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: &CacheConfig,
        probe: Arc<dyn Probe>,
        registry: ConverterRegistry,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(JobTable::default()),
                cache_path: config.cache_path.clone(),
                image_capacity: config.image_capacity(),
                probe,
                registry,
                executor: TransformExecutor::new(config.scratch_root()),
                metrics,
            }),
        }
    }

    pub fn capacity(&self, class: JobClass) -> usize {
        match class {
            JobClass::ImageLike => self.inner.image_capacity,
            JobClass::Heavy => HEAVY_CAPACITY,
        }
    }

    /// Produce the rendition for `key` from `source`, or wait for the job
    /// already producing it. Resolves to the published cache path.
    pub async fn enqueue(&self, key: &CacheKey, source: &Path) -> Result<PathBuf> {
        let filename = key.file_name();

        let mut done = {
            let mut table = self.table();
            let existing = table
                .jobs
                .get(&filename)
                .map(|job| (job.running, job.done.subscribe()));
            match existing {
                Some((running, rx)) => {
                    debug!("Attaching to {} job {}", if running { "running" } else { "pending" }, filename);
                    rx
                }
                None => {
                    // Outputs are persisted before their job leaves the table, so
                    // a file seen here was published by a job this caller missed.
                    let published = self.inner.cache_path.join(&filename);
                    if published.is_file() {
                        debug!("Job {} finished before attach", filename);
                        return Ok(published);
                    }

                    let (tx, rx) = watch::channel(None);
                    let seq = table.next_seq;
                    table.next_seq += 1;
                    table.jobs.insert(
                        filename.clone(),
                        Job {
                            key: key.clone(),
                            source: source.to_path_buf(),
                            class: JobClass::of(key.format().kind),
                            seq,
                            running: false,
                            queued_at: Utc::now(),
                            done: tx,
                        },
                    );
                    debug!("Queued job {} from {}", filename, source.display());
                    self.admit(&mut table);
                    rx
                }
            }
        };

        let outcome = match done.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(CacheError::JobAborted(format!("{} was dropped", filename))))
    }

    /// Snapshot of every pending or running job, oldest first.
    pub fn status(&self) -> Vec<JobStatus> {
        let table = self.table();
        let mut jobs: Vec<&Job> = table.jobs.values().collect();
        jobs.sort_by_key(|job| job.seq);
        jobs.into_iter()
            .map(|job| JobStatus {
                filename: job.key.file_name(),
                source: job.source.clone(),
                format: *job.key.format(),
                class: job.class,
                running: job.running,
                queued_at: job.queued_at,
            })
            .collect()
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Promote pending jobs while their pool has free slots.
    fn admit(&self, table: &mut JobTable) {
        for class in [JobClass::ImageLike, JobClass::Heavy] {
            let running = table
                .jobs
                .values()
                .filter(|job| job.class == class && job.running)
                .count();
            let free = self.capacity(class).saturating_sub(running);
            if free == 0 {
                continue;
            }

            let mut pending: Vec<&mut Job> = table
                .jobs
                .values_mut()
                .filter(|job| job.class == class && !job.running)
                .collect();
            pending.sort_by_key(|job| job.seq);

            for job in pending.into_iter().take(free) {
                job.running = true;
                debug!("Starting job {}", job.key);
                let scheduler = self.clone();
                let key = job.key.clone();
                let source = job.source.clone();
                tokio::spawn(async move { scheduler.execute(key, source).await });
            }
        }
    }

    async fn execute(self, key: CacheKey, source: PathBuf) {
        let inner = Arc::clone(&self.inner);
        let job_key = key.clone();
        let work = tokio::spawn(async move { inner.transform(&job_key, &source).await });

        let outcome = match work.await {
            Ok(outcome) => outcome,
            Err(e) => Err(CacheError::JobAborted(e.to_string())),
        };

        match &outcome {
            Ok(path) => {
                info!("Published {}", path.display());
                self.inner.metrics.record_conversion(true);
            }
            Err(e) => {
                error!("Job {} failed: {}", key, e);
                self.inner.metrics.record_conversion(false);
            }
        }

        let mut table = self.table();
        if let Some(job) = table.jobs.remove(&key.file_name()) {
            job.done.send_replace(Some(outcome));
        }
        self.admit(&mut table);
    }
}

impl Inner {
    async fn transform(&self, key: &CacheKey, source: &Path) -> Result<PathBuf> {
        let format = *key.format();
        let source = self.probe.inspect(source).await?;
        let route = Route::resolve(&source, format.kind)?;
        let converter = self.registry.get(route, &source, format.kind)?;

        let mut transform = Transform::new(format, self.cache_path.join(key.file_name()));
        transform.threads = self.image_capacity;
        transform.deinterlace = source.compression.as_deref() == Some(INTERLACED_COMPRESSION);

        debug!("{} via {} ({})", key, route, source.mimetype);
        self.executor.run(converter.as_ref(), &source, &transform).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_classes() {
        assert_eq!(JobClass::of(MediaKind::Image), JobClass::ImageLike);
        assert_eq!(JobClass::of(MediaKind::Document), JobClass::ImageLike);
        assert_eq!(JobClass::of(MediaKind::Video), JobClass::Heavy);
        assert_eq!(JobClass::of(MediaKind::Audio), JobClass::Heavy);
    }

    #[test]
    fn test_capacities_follow_config() {
        let config = CacheConfig {
            threads: 3,
            ..CacheConfig::default()
        };
        let scheduler = Scheduler::new(
            &config,
            Arc::new(crate::probe::MediaProbe::default()),
            ConverterRegistry::empty(),
            Metrics::new(),
        );
        assert_eq!(scheduler.capacity(JobClass::ImageLike), 3);
        assert_eq!(scheduler.capacity(JobClass::Heavy), 1);
        assert!(scheduler.status().is_empty());
    }
}
