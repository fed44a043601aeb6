use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::domain::{finalized_artifact_name, has_extension};
use crate::engine::Toolchain;
use crate::error::PipelineError;
use crate::fs_util;
use crate::tracker::ResourceTracker;

/// Turns every `*.sam` in `alignments` into a sorted, duplicate-marked and
/// indexed `finalized/<stem>.bam`. Existing outputs are overwritten, never
/// reused. Stops at the first failing artifact.
pub fn consolidate_alignments(
    toolchain: &dyn Toolchain,
    alignments: &Path,
    threads: usize,
    staging: &Path,
    tracker: &ResourceTracker,
    sink: &dyn ProgressSink,
) -> Result<Vec<PathBuf>, PipelineError> {
    tracker.create_staging_dir(staging)?;
    let inputs = fs_util::list_files(alignments, |path| has_extension(path, "sam"))?;
    let total = inputs.len();
    let mut finalized = Vec::with_capacity(total);

    for (index, input) in inputs.iter().enumerate() {
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .ok_or_else(|| {
                PipelineError::Filesystem(format!("unusable artifact name: {}", input.display()))
            })?;
        let output = staging.join(finalized_artifact_name(&stem));
        let started = Instant::now();
        toolchain.consolidate(input, threads, &output)?;
        toolchain.index(&output)?;
        sink.event(
            ProgressEvent::new(Phase::Consolidate, format!("finalized {stem}"))
                .at(index + 1, total)
                .took(started.elapsed()),
        );
        finalized.push(output);
    }

    info!(staging = %staging.display(), count = finalized.len(), "consolidation done");
    Ok(finalized)
}
