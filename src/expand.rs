use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::domain::{ArchiveKind, is_read_file};
use crate::error::PipelineError;
use crate::fs_util;
use crate::tracker::ResourceTracker;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpansionReport {
    pub produced: Vec<PathBuf>,
    /// Targets left alone because a file the run did not create already sits there.
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<ExpansionFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionFailure {
    pub archive: PathBuf,
    pub message: String,
}

/// Expands every supported archive directly inside `unit_dir` next to the
/// original. A failing archive is recorded and its siblings still run; only an
/// unreadable directory is an error.
pub fn expand_archives(
    unit_dir: &Path,
    tracker: &ResourceTracker,
    sink: &dyn ProgressSink,
) -> Result<ExpansionReport, PipelineError> {
    let archives = fs_util::list_files(unit_dir, |path| ArchiveKind::detect(path).is_some())?;
    let mut report = ExpansionReport::default();
    let total = archives.len();

    for (index, archive) in archives.iter().enumerate() {
        let Some(kind) = ArchiveKind::detect(archive) else {
            continue;
        };
        let result = match kind {
            ArchiveKind::Gzip => expand_gzip(archive, unit_dir, tracker, &mut report),
            ArchiveKind::Zip | ArchiveKind::Tar | ArchiveKind::TarGz => {
                expand_container(archive, kind, unit_dir, tracker, &mut report)
            }
        };
        let name = file_label(archive);
        match result {
            Ok(()) => {
                sink.event(
                    ProgressEvent::new(Phase::Expand, format!("expanded {name} ({kind})"))
                        .at(index + 1, total),
                );
            }
            Err(err) => {
                warn!(archive = %archive.display(), "expansion failed: {err}");
                sink.event(
                    ProgressEvent::new(Phase::Expand, format!("failed to expand {name}: {err}"))
                        .at(index + 1, total),
                );
                report.failures.push(ExpansionFailure {
                    archive: archive.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    if total > 0 {
        info!(
            unit = %unit_dir.display(),
            produced = report.produced.len(),
            failed = report.failures.len(),
            "archive expansion done"
        );
    }
    Ok(report)
}

fn expand_gzip(
    archive: &Path,
    unit_dir: &Path,
    tracker: &ResourceTracker,
    report: &mut ExpansionReport,
) -> Result<(), PipelineError> {
    let target_name = archive
        .file_stem()
        .ok_or_else(|| expansion_error(archive, "archive has no file name"))?;
    let target = unit_dir.join(target_name);
    if !claim_target(&target, tracker, report) {
        return Ok(());
    }
    if let Err(err) = fs_util::gunzip(archive, &target) {
        let _ = fs::remove_file(&target);
        return Err(expansion_error(archive, &err.to_string()));
    }
    report.produced.push(target);
    Ok(())
}

fn expand_container(
    archive: &Path,
    kind: ArchiveKind,
    unit_dir: &Path,
    tracker: &ResourceTracker,
    report: &mut ExpansionReport,
) -> Result<(), PipelineError> {
    let scratch = tempfile::Builder::new()
        .prefix(".kira-align-extract-")
        .tempdir_in(unit_dir)
        .map_err(|err| expansion_error(archive, &err.to_string()))?;
    tracker.register_dir(scratch.path());

    let extracted = match kind {
        ArchiveKind::Zip => fs_util::extract_zip(archive, scratch.path(), is_read_file),
        ArchiveKind::TarGz => fs_util::extract_tar(archive, scratch.path(), true, is_read_file),
        _ => fs_util::extract_tar(archive, scratch.path(), false, is_read_file),
    };
    let unpacked = extracted.map_err(|err| expansion_error(archive, &err.to_string()))?;
    debug!(archive = %archive.display(), unpacked, "container unpacked");

    let reads = fs_util::walk_files(scratch.path(), is_read_file)
        .map_err(|err| expansion_error(archive, &err.to_string()))?;
    let mut seen = HashSet::new();
    for read in reads {
        let Some(name) = read.file_name().map(|name| name.to_os_string()) else {
            continue;
        };
        let target = unit_dir.join(&name);
        if !seen.insert(name) {
            warn!(archive = %archive.display(), "duplicate entry {}, keeping the first", read.display());
            report.skipped.push(target);
            continue;
        }
        if !claim_target(&target, tracker, report) {
            continue;
        }
        fs_util::move_file(&read, &target)
            .map_err(|err| expansion_error(archive, &err.to_string()))?;
        report.produced.push(target);
    }
    Ok(())
}

fn claim_target(target: &Path, tracker: &ResourceTracker, report: &mut ExpansionReport) -> bool {
    if target.exists() && !tracker.is_tracked(target) {
        warn!(
            target = %target.display(),
            "plain read file already present and not created by this run, leaving it untouched"
        );
        report.skipped.push(target.to_path_buf());
        return false;
    }
    tracker.register_file(target);
    true
}

fn expansion_error(archive: &Path, message: &str) -> PipelineError {
    PipelineError::Expansion {
        archive: archive.to_path_buf(),
        message: message.to_string(),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
