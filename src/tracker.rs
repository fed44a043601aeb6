use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::fs_util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedResource {
    pub kind: ResourceKind,
    pub path: PathBuf,
}

impl TrackedResource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ResourceKind::File,
            path: path.into(),
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ResourceKind::Directory,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub missing: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Default)]
struct Registry {
    resources: Vec<TrackedResource>,
}

/// Run-scoped owner of every transient path the pipeline creates.
///
/// Clones share one registry. Stages only register; the driver (or the
/// interrupt handler) is the only caller of [`ResourceTracker::cleanup`], and
/// the removal pass runs at most once however many clones call it.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    registry: Arc<Mutex<Registry>>,
    cleaned: Arc<AtomicBool>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: TrackedResource) {
        let mut registry = self.lock();
        if registry
            .resources
            .iter()
            .any(|existing| existing.path == resource.path)
        {
            return;
        }
        debug!(path = %resource.path.display(), kind = ?resource.kind, "tracking transient path");
        registry.resources.push(resource);
    }

    pub fn register_file(&self, path: impl Into<PathBuf>) {
        self.register(TrackedResource::file(path));
    }

    pub fn register_dir(&self, path: impl Into<PathBuf>) {
        self.register(TrackedResource::directory(path));
    }

    /// Registers `dir` and then creates it empty, clearing leftovers of an
    /// interrupted earlier run.
    pub fn create_staging_dir(&self, dir: &Path) -> Result<(), PipelineError> {
        self.register_dir(dir);
        fs_util::recreate_dir(dir)
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.lock()
            .resources
            .iter()
            .any(|resource| resource.path == path)
    }

    pub fn tracked(&self) -> Vec<TrackedResource> {
        self.lock().resources.clone()
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// Removes every registered path in registration order. Returns `None` when
    /// a previous call already did the work.
    pub fn cleanup(&self) -> Option<CleanupReport> {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return None;
        }
        let resources = std::mem::take(&mut self.lock().resources);
        let mut report = CleanupReport::default();
        for resource in &resources {
            match remove(resource) {
                Ok(true) => report.removed += 1,
                Ok(false) => report.missing += 1,
                Err(err) => {
                    warn!(path = %resource.path.display(), "failed to remove transient path: {err}");
                    report
                        .failed
                        .push(format!("{}: {err}", resource.path.display()));
                }
            }
        }
        debug!(
            removed = report.removed,
            missing = report.missing,
            failed = report.failed.len(),
            "cleanup finished"
        );
        Some(report)
    }

    pub fn guard(&self) -> CleanupGuard {
        CleanupGuard {
            tracker: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs [`ResourceTracker::cleanup`] when dropped unless [`CleanupGuard::finish`]
/// already did.
pub struct CleanupGuard {
    tracker: ResourceTracker,
}

impl CleanupGuard {
    pub fn finish(self) -> CleanupReport {
        self.tracker.cleanup().unwrap_or_default()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let _ = self.tracker.cleanup();
    }
}

fn remove(resource: &TrackedResource) -> io::Result<bool> {
    let result = match resource.kind {
        ResourceKind::Directory => fs::remove_dir_all(&resource.path),
        ResourceKind::File => fs::remove_file(&resource.path),
    };
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_removes_in_order_and_tolerates_missing() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("staging");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/a.sam"), b"x").unwrap();
        let file = temp.path().join("reads.fq");
        fs::write(&file, b"@r\nA\n+\nI\n").unwrap();

        let tracker = ResourceTracker::new();
        tracker.register_dir(&dir);
        tracker.register_file(&file);
        tracker.register_file(temp.path().join("never-created.fq"));
        tracker.register_file(&file);
        assert_eq!(tracker.tracked().len(), 3);

        let report = tracker.cleanup().unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.missing, 1);
        assert!(report.failed.is_empty());
        assert!(!dir.exists());
        assert!(!file.exists());
    }

    #[test]
    fn cleanup_runs_once_across_clones() {
        let tracker = ResourceTracker::new();
        let clone = tracker.clone();
        assert!(tracker.cleanup().is_some());
        assert!(clone.cleanup().is_none());
        assert!(clone.is_cleaned());
    }

    #[test]
    fn guard_cleans_on_drop() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("x.sam");
        fs::write(&file, b"x").unwrap();
        let tracker = ResourceTracker::new();
        tracker.register_file(&file);
        {
            let _guard = tracker.guard();
        }
        assert!(!file.exists());
        assert!(tracker.is_cleaned());
    }
}
