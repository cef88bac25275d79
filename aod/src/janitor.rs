//! Bounds the archive directory's disk usage by age and total size.
//!
//! Runs on its own OS thread, polling on a fixed interval rather than
//! reacting to individual archive writes. Same polling-loop shape as the
//! reference daemon's PSI collector, just walking a directory tree instead
//! of a `/proc` file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::config::CleanupConfig;
use crate::metrics::Metrics;
use crate::stop::StopSignal;

const SIZE_TRIGGER_FRACTION: f64 = 0.90;
const SIZE_TARGET_FRACTION: f64 = 0.50;

pub struct Janitor {
    archive_root: PathBuf,
    interval: Duration,
    max_total_size_bytes: u64,
    max_age: Duration,
    metrics: Arc<Metrics>,
}

struct Archive {
    path: PathBuf,
    size: u64,
    mtime: SystemTime,
}

impl Janitor {
    pub fn new(archive_root: PathBuf, cleanup: &CleanupConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            archive_root,
            interval: Duration::from_secs(cleanup.interval_sec),
            max_total_size_bytes: cleanup.max_total_size_mb * 1024 * 1024,
            max_age: Duration::from_secs(cleanup.max_age_days * 24 * 60 * 60),
            metrics,
        }
    }

    /// Runs dual-policy sweeps every `interval` until `stop` is set. The
    /// age sweep only runs once per `max_age` period of its own, tracked
    /// against `last_age_sweep` rather than the tick interval, since the
    /// two periods are independently configurable.
    pub fn run(&self, stop: &StopSignal) {
        let mut last_age_sweep = std::time::Instant::now() - self.max_age;

        while !stop.is_set() {
            self.sweep_by_size();

            if last_age_sweep.elapsed() >= self.max_age {
                self.sweep_by_age();
                last_age_sweep = std::time::Instant::now();
            }

            let slept = sleep_respecting_stop(self.interval, stop);
            if !slept {
                break;
            }
        }
    }

    fn sweep_by_size(&self) {
        let mut archives = self.list_archives();
        let total: u64 = archives.iter().map(|a| a.size).sum();

        if (total as f64) <= (self.max_total_size_bytes as f64) * SIZE_TRIGGER_FRACTION {
            return;
        }

        archives.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));

        let target = (self.max_total_size_bytes as f64 * SIZE_TARGET_FRACTION) as u64;
        let mut remaining = total;
        for archive in archives {
            if remaining <= target {
                break;
            }
            let freed = archive.size;
            if self.remove(&archive.path) {
                remaining = remaining.saturating_sub(freed);
            }
        }
    }

    fn sweep_by_age(&self) {
        let now = SystemTime::now();
        for archive in self.list_archives() {
            let age = now.duration_since(archive.mtime).unwrap_or_default();
            if age > self.max_age {
                self.remove(&archive.path);
            }
        }
    }

    fn remove(&self, path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => {
                self.metrics.inc_janitor_deletion();
                true
            }
            Err(e) => {
                log::warn!("janitor: failed to remove {}: {e}", path.display());
                self.metrics.inc_janitor_unlink_failure();
                false
            }
        }
    }

    /// Completed archives only: in-flight `aod_{ts}/` directories are
    /// never visited.
    fn list_archives(&self) -> Vec<Archive> {
        WalkDir::new(&self.archive_root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tar.zst"))
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                Some(Archive {
                    path: entry.path().to_path_buf(),
                    size: metadata.len(),
                    mtime: metadata.modified().ok()?,
                })
            })
            .collect()
    }
}

/// Sleeps in short slices so a stop request is noticed promptly instead
/// of after the full interval. Returns `false` if `stop` fired during
/// the sleep.
fn sleep_respecting_stop(total: Duration, stop: &StopSignal) -> bool {
    const SLICE: Duration = Duration::from_millis(200);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.is_set() {
            return false;
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    !stop.is_set()
}
