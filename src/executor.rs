//! Transform execution in an isolated scratch directory.
//!
//! Each run gets a fresh `mcs-*` directory under the scratch root. The
//! converter writes there; on success its output is copied next to the
//! canonical cache path and renamed into place, so readers see either the
//! whole rendition or nothing. The scratch directory is removed on every
//! exit path.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::converter::{Converter, Destination};
use crate::error::{CacheError, Result};
use crate::format::FormatDescriptor;
use crate::probe::SourceDescriptor;

const SCRATCH_PREFIX: &str = "mcs-";
const STAGING_PREFIX: &str = ".publish-";

/// Everything a run needs besides the converter and the source.
#[derive(Debug, Clone)]
pub struct Transform {
    pub format: FormatDescriptor,
    pub threads: usize,
    pub deinterlace: bool,
    /// Canonical cache path of the rendition.
    pub publish_to: PathBuf,
}

impl Transform {
    pub fn new(format: FormatDescriptor, publish_to: impl Into<PathBuf>) -> Self {
        Self {
            format,
            threads: 1,
            deinterlace: false,
            publish_to: publish_to.into(),
        }
    }

    fn destination(&self, scratch: &Path) -> Destination {
        Destination {
            format: self.format,
            scratch: scratch.to_path_buf(),
            threads: self.threads,
            deinterlace: self.deinterlace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformExecutor {
    scratch_root: PathBuf,
}

impl TransformExecutor {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Run `converter` on `source` and publish its output to `transform.publish_to`.
    pub async fn run(
        &self,
        converter: &dyn Converter,
        source: &SourceDescriptor,
        transform: &Transform,
    ) -> Result<PathBuf> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_root)?;
        debug!("scratch {} for {}", scratch.path().display(), transform.publish_to.display());

        let destination = transform.destination(scratch.path());
        let result = match converter.convert(source, &destination).await {
            Ok(output) => publish(&output, &transform.publish_to).await,
            Err(e) => Err(e),
        };

        discard(scratch).await;
        result.map(|_| transform.publish_to.clone())
    }
}

/// Remove a scratch directory; failures are logged, never propagated.
async fn discard(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    match tokio::task::spawn_blocking(move || scratch.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to remove scratch directory {}: {}", path.display(), e),
        Err(e) => warn!("Scratch cleanup task for {} failed: {}", path.display(), e),
    }
}

/// Copy `output` to a staging file beside `target`, then rename it into place.
async fn publish(output: &Path, target: &Path) -> Result<()> {
    let output = output.to_path_buf();
    let target = target.to_path_buf();
    let failed = |reason: String| CacheError::PublishFailed {
        path: target.clone(),
        reason,
    };

    let staged_target = target.clone();
    let copied = tokio::task::spawn_blocking(move || stage_and_persist(&output, &staged_target))
        .await
        .map_err(|e| failed(e.to_string()))?;

    copied.map_err(|e| failed(e.to_string()))
}

fn stage_and_persist(output: &Path, target: &Path) -> io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no parent"))?;

    let mut input = std::fs::File::open(output)?;
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(dir)?;

    io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o644))?;
    }

    staged.persist(target).map_err(|e| e.error)?;
    Ok(())
}
