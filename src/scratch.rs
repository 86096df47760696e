//! Scratch-file naming and cleanup.
//!
//! Intermediate containers (the video-only encode, the transcoded audio, the
//! staged output) are created exclusively through [`tempfile`], so two jobs
//! sharing a directory never write to the same file. [`ScratchFiles`] owns
//! them and removes whatever is left on every exit path.
//!
//! Generated *output* names come from an injected [`NameSource`], so tests
//! can predict them.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempPath;

use crate::error::ReelError;

/// Supplies unique identifiers for generated output file names.
pub trait NameSource: Send + Sync + Debug {
    /// Return an identifier never returned before by this source.
    fn unique_id(&self) -> String;
}

/// Last millisecond stamp handed out by any [`ClockNames`] in this process.
static LAST_CLOCK_ID: AtomicU64 = AtomicU64::new(0);

/// Time-derived names: milliseconds since the Unix epoch, bumped forward
/// when two ids are requested within the same millisecond, plus the process
/// id. The bump is process-wide, so separate instances never repeat.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockNames;

impl ClockNames {
    pub fn new() -> Self {
        Self
    }
}

impl NameSource for ClockNames {
    fn unique_id(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let previous = LAST_CLOCK_ID
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        let stamp = now.max(previous.saturating_add(1));
        format!("{stamp}_{}", std::process::id())
    }
}

/// Deterministic names `0`, `1`, `2`, ... for tests and reproducible runs.
#[derive(Debug, Default)]
pub struct SequentialNames {
    next: AtomicU64,
}

impl SequentialNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl NameSource for SequentialNames {
    fn unique_id(&self) -> String {
        self.next.fetch_add(1, Ordering::AcqRel).to_string()
    }
}

/// Build `<dir>/<prefix>_<id>.<extension>`.
pub(crate) fn named_path(
    names: &dyn NameSource,
    dir: &Path,
    prefix: &str,
    extension: &str,
) -> PathBuf {
    dir.join(format!("{prefix}_{}.{extension}", names.unique_id()))
}

/// Scratch files owned by one job.
///
/// Every file is removed when the set is dropped; [`cleanup`](Self::cleanup)
/// does the same but reports removal failures.
#[derive(Debug, Default)]
pub(crate) struct ScratchFiles {
    paths: Vec<TempPath>,
}

impl ScratchFiles {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Exclusively create an empty `<prefix><random>.<extension>` in `dir`
    /// and return its path.
    pub(crate) fn create(
        &mut self,
        dir: &Path,
        prefix: &str,
        extension: &str,
    ) -> Result<PathBuf, ReelError> {
        let path = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(&format!(".{extension}"))
            .tempfile_in(dir)
            .map_err(|error| ReelError::ResourceError {
                path: dir.to_path_buf(),
                reason: format!("cannot create scratch file: {error}"),
            })?
            .into_temp_path();
        let owned = path.to_path_buf();
        log::trace!("Created scratch file {}", owned.display());
        self.paths.push(path);
        Ok(owned)
    }

    /// Move the scratch file at `path` to `destination`, releasing it from
    /// cleanup.
    pub(crate) fn persist(&mut self, path: &Path, destination: &Path) -> Result<(), ReelError> {
        let position = self
            .paths
            .iter()
            .position(|owned| **owned == *path)
            .ok_or_else(|| ReelError::ResourceError {
                path: path.to_path_buf(),
                reason: "not a scratch file of this job".to_string(),
            })?;
        let owned = self.paths.swap_remove(position);
        owned
            .persist(destination)
            .map_err(|error| ReelError::ResourceError {
                path: destination.to_path_buf(),
                reason: error.error.to_string(),
            })
    }

    /// Remove every scratch file. Failures are logged as
    /// [`ReelError::ResourceError`] at `warn` level and otherwise ignored.
    pub(crate) fn cleanup(&mut self) {
        for owned in self.paths.drain(..) {
            let path = owned.to_path_buf();
            match owned.close() {
                Ok(()) => log::debug!("Removed scratch file {}", path.display()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    let error = ReelError::ResourceError {
                        path,
                        reason: error.to_string(),
                    };
                    log::warn!("{error}");
                }
            }
        }
    }
}
