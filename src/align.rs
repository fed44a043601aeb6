use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::domain::{alignment_artifact_name, is_read_file, read_stem};
use crate::engine::Toolchain;
use crate::error::PipelineError;
use crate::fs_util;
use crate::tracker::ResourceTracker;

pub fn discover_reads(unit_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    fs_util::list_files(unit_dir, is_read_file)
}

/// Aligns every read file of the unit into `staging/<stem>.sam`, one file at a
/// time. Stops at the first engine failure; artifacts written so far stay in
/// the (tracked) staging directory.
pub fn align_reads(
    toolchain: &dyn Toolchain,
    unit_dir: &Path,
    reference: &Path,
    threads: usize,
    staging: &Path,
    tracker: &ResourceTracker,
    sink: &dyn ProgressSink,
) -> Result<Vec<PathBuf>, PipelineError> {
    tracker.create_staging_dir(staging)?;
    let reads = discover_reads(unit_dir)?;
    let planned = plan_artifacts(&reads, staging)?;
    let total = planned.len();
    let mut artifacts = Vec::with_capacity(total);

    for (index, (read, artifact)) in planned.into_iter().enumerate() {
        let started = Instant::now();
        toolchain.align(reference, &read, threads, &artifact)?;
        let name = read
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        sink.event(
            ProgressEvent::new(Phase::Align, format!("aligned {name}"))
                .at(index + 1, total)
                .took(started.elapsed()),
        );
        artifacts.push(artifact);
    }

    info!(unit = %unit_dir.display(), count = artifacts.len(), "alignment done");
    Ok(artifacts)
}

fn plan_artifacts(
    reads: &[PathBuf],
    staging: &Path,
) -> Result<Vec<(PathBuf, PathBuf)>, PipelineError> {
    let mut by_stem: HashMap<String, &PathBuf> = HashMap::new();
    let mut planned = Vec::with_capacity(reads.len());
    for read in reads {
        let stem = read_stem(read).ok_or_else(|| {
            PipelineError::Filesystem(format!("unusable read file name: {}", read.display()))
        })?;
        if let Some(first) = by_stem.get(&stem) {
            return Err(PipelineError::DuplicateStem {
                first: first.display().to_string(),
                second: read.display().to_string(),
            });
        }
        by_stem.insert(stem.clone(), read);
        planned.push((read.clone(), staging.join(alignment_artifact_name(&stem))));
    }
    Ok(planned)
}
