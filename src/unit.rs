use std::fmt;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::align::{align_reads, discover_reads};
use crate::app::{ProgressEvent, ProgressSink};
use crate::consolidate::consolidate_alignments;
use crate::domain::Barcode;
use crate::engine::Toolchain;
use crate::error::PipelineError;
use crate::expand::{ExpansionReport, expand_archives};
use crate::merge::{Clock, merge_finalized};
use crate::tracker::ResourceTracker;

pub const ALIGNMENTS_DIR: &str = "alignments";
pub const FINALIZED_DIR: &str = "finalized";
pub const MERGED_DIR: &str = "merged";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Discovered,
    Expanding,
    Aligning,
    Consolidating,
    Merging,
    Done,
    Failed,
}

impl UnitState {
    pub fn label(self) -> &'static str {
        match self {
            UnitState::Discovered => "discovered",
            UnitState::Expanding => "expanding",
            UnitState::Aligning => "aligning",
            UnitState::Consolidating => "consolidating",
            UnitState::Merging => "merging",
            UnitState::Done => "done",
            UnitState::Failed => "failed",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitLayout {
    pub root: Utf8PathBuf,
    pub alignments: Utf8PathBuf,
    pub finalized: Utf8PathBuf,
    pub merged: Utf8PathBuf,
}

impl UnitLayout {
    pub fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_path_buf(),
            alignments: root.join(ALIGNMENTS_DIR),
            finalized: root.join(FINALIZED_DIR),
            merged: root.join(MERGED_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    pub barcode: Barcode,
    pub dir: Utf8PathBuf,
    pub state: UnitState,
    pub failed_at: Option<UnitState>,
    pub error: Option<String>,
    pub expansion: ExpansionReport,
    pub reads: usize,
    pub alignments: usize,
    pub finalized: usize,
    pub merged: Option<PathBuf>,
}

impl UnitOutcome {
    fn new(barcode: &Barcode, layout: &UnitLayout) -> Self {
        Self {
            barcode: barcode.clone(),
            dir: layout.root.clone(),
            state: UnitState::Discovered,
            failed_at: None,
            error: None,
            expansion: ExpansionReport::default(),
            reads: 0,
            alignments: 0,
            finalized: 0,
            merged: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == UnitState::Done
    }
}

/// Drives one barcode directory through expand, align, consolidate and merge.
/// A failure stops this unit only; the caller moves on to the next one.
pub struct WorkUnitProcessor<'a> {
    toolchain: &'a dyn Toolchain,
    clock: &'a dyn Clock,
    tracker: &'a ResourceTracker,
    sink: &'a dyn ProgressSink,
    threads: usize,
}

impl<'a> WorkUnitProcessor<'a> {
    pub fn new(
        toolchain: &'a dyn Toolchain,
        clock: &'a dyn Clock,
        tracker: &'a ResourceTracker,
        sink: &'a dyn ProgressSink,
        threads: usize,
    ) -> Self {
        Self {
            toolchain,
            clock,
            tracker,
            sink,
            threads,
        }
    }

    pub fn process(&self, barcode: &Barcode, layout: &UnitLayout, reference: &Path) -> UnitOutcome {
        let mut outcome = UnitOutcome::new(barcode, layout);
        let sink = UnitSink {
            inner: self.sink,
            unit: barcode.as_str(),
        };

        match self.run_stages(layout, reference, &mut outcome, &sink) {
            Ok(()) => {
                transition(&mut outcome, UnitState::Done);
                info!(unit = %barcode, "work unit done");
            }
            Err(err) => {
                warn!(unit = %barcode, stage = %outcome.state, "work unit failed: {err}");
                outcome.failed_at = Some(outcome.state);
                outcome.error = Some(err.to_string());
                transition(&mut outcome, UnitState::Failed);
            }
        }
        outcome
    }

    fn run_stages(
        &self,
        layout: &UnitLayout,
        reference: &Path,
        outcome: &mut UnitOutcome,
        sink: &dyn ProgressSink,
    ) -> Result<(), PipelineError> {
        let root = layout.root.as_std_path();

        transition(outcome, UnitState::Expanding);
        outcome.expansion = expand_archives(root, self.tracker, sink)?;

        transition(outcome, UnitState::Aligning);
        outcome.reads = discover_reads(root)?.len();
        let alignments = align_reads(
            self.toolchain,
            root,
            reference,
            self.threads,
            layout.alignments.as_std_path(),
            self.tracker,
            sink,
        )?;
        outcome.alignments = alignments.len();

        transition(outcome, UnitState::Consolidating);
        let finalized = consolidate_alignments(
            self.toolchain,
            layout.alignments.as_std_path(),
            self.threads,
            layout.finalized.as_std_path(),
            self.tracker,
            sink,
        )?;
        outcome.finalized = finalized.len();

        transition(outcome, UnitState::Merging);
        let merged = merge_finalized(
            self.toolchain,
            self.clock,
            layout.finalized.as_std_path(),
            self.threads,
            layout.merged.as_std_path(),
            sink,
        )?;
        outcome.merged = Some(merged);
        Ok(())
    }
}

fn transition(outcome: &mut UnitOutcome, next: UnitState) {
    debug!(unit = %outcome.barcode, from = %outcome.state, to = %next, "unit state");
    outcome.state = next;
}

struct UnitSink<'a> {
    inner: &'a dyn ProgressSink,
    unit: &'a str,
}

impl ProgressSink for UnitSink<'_> {
    fn event(&self, event: ProgressEvent) {
        self.inner.event(event.in_unit(self.unit));
    }
}
