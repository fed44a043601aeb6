use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::domain::{has_extension, index_name, merged_output_name};
use crate::engine::Toolchain;
use crate::error::PipelineError;
use crate::fs_util;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// `merged_<timestamp>.bam` inside `output_dir`, suffixed `_1`, `_2`, ... when a
/// merge already happened within the same second.
pub fn merged_output_path(output_dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let candidate = output_dir.join(merged_output_name(&stamp));
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| output_dir.join(merged_output_name(&format!("{stamp}_{n}"))))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Merges every finalized `*.bam` present in `finalized` into one indexed
/// output under `output_dir`. The output directory is permanent and never
/// handed to the tracker.
pub fn merge_finalized(
    toolchain: &dyn Toolchain,
    clock: &dyn Clock,
    finalized: &Path,
    threads: usize,
    output_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, PipelineError> {
    let inputs = fs_util::list_files(finalized, |path| has_extension(path, "bam"))?;
    if inputs.is_empty() {
        return Err(PipelineError::NothingToMerge(finalized.to_path_buf()));
    }
    fs::create_dir_all(output_dir).map_err(|err| {
        PipelineError::Filesystem(format!("create {}: {err}", output_dir.display()))
    })?;

    let output = merged_output_path(output_dir, clock.now());
    let started = Instant::now();
    let merged = toolchain
        .merge(&inputs, threads, &output)
        .and_then(|()| toolchain.index(&output));
    if let Err(err) = merged {
        discard_partial(&output);
        return Err(err);
    }

    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    sink.event(
        ProgressEvent::new(
            Phase::Merge,
            format!("merged {} artifacts into {name}", inputs.len()),
        )
        .at(1, 1)
        .took(started.elapsed()),
    );
    info!(output = %output.display(), inputs = inputs.len(), "merge done");
    Ok(output)
}

fn discard_partial(output: &Path) {
    let index = index_name(output).map(|name| output.with_file_name(name));
    for path in std::iter::once(output.to_path_buf()).chain(index) {
        match fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "removed partial merge output"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), "cannot remove partial merge output: {err}"),
        }
    }
}
