use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::domain::{Barcode, BarcodePattern};
use crate::error::PipelineError;
use crate::fs_util;
use crate::unit::{UnitLayout, UnitOutcome, WorkUnitProcessor};

pub const DATA_DIR: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub name: String,
    pub root: PathBuf,
    pub status: ProjectStatus,
    pub reference: Option<PathBuf>,
    pub error: Option<String>,
    pub units: Vec<UnitOutcome>,
}

impl ProjectReport {
    pub fn failed_units(&self) -> usize {
        self.units.iter().filter(|unit| !unit.succeeded()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.status == ProjectStatus::Completed && self.failed_units() == 0
    }

    fn skipped(name: &str, root: &Path, reference: Option<PathBuf>, err: PipelineError) -> Self {
        Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            status: ProjectStatus::Skipped,
            reference,
            error: Some(err.to_string()),
            units: Vec::new(),
        }
    }
}

/// The reference to align a project against: the override when given,
/// otherwise `<project>/<default_reference>`. Must be a readable file.
pub fn resolve_reference(
    project_root: &Path,
    reference_override: Option<&Path>,
    default_reference: &Path,
) -> Result<PathBuf, PipelineError> {
    let path = match reference_override {
        Some(path) => path.to_path_buf(),
        None => project_root.join(default_reference),
    };
    if !path.is_file() {
        return Err(PipelineError::Reference {
            path,
            reason: "not an existing file".to_string(),
        });
    }
    if let Err(err) = fs::File::open(&path) {
        return Err(PipelineError::Reference {
            path,
            reason: err.to_string(),
        });
    }
    Ok(path)
}

pub fn discover_units(
    data_dir: &Path,
    pattern: &BarcodePattern,
) -> Result<Vec<(Barcode, UnitLayout)>, PipelineError> {
    let mut units = Vec::new();
    for dir in fs_util::list_dirs(data_dir)? {
        let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Ok(barcode) = pattern.parse(name) else {
            continue;
        };
        let Ok(root) = Utf8PathBuf::from_path_buf(dir.clone()) else {
            warn!(dir = %dir.display(), "skipping work unit with non-UTF-8 path");
            continue;
        };
        units.push((barcode, UnitLayout::new(&root)));
    }
    Ok(units)
}

/// Runs every work unit of one project. Reference or discovery problems skip
/// the project; unit failures are recorded and the walk continues.
pub struct ProjectWalker<'a> {
    processor: WorkUnitProcessor<'a>,
    sink: &'a dyn ProgressSink,
    reference_override: Option<&'a Path>,
    default_reference: &'a Path,
    pattern: &'a BarcodePattern,
}

impl<'a> ProjectWalker<'a> {
    pub fn new(
        processor: WorkUnitProcessor<'a>,
        sink: &'a dyn ProgressSink,
        reference_override: Option<&'a Path>,
        default_reference: &'a Path,
        pattern: &'a BarcodePattern,
    ) -> Self {
        Self {
            processor,
            sink,
            reference_override,
            default_reference,
            pattern,
        }
    }

    pub fn walk(&self, name: &str, root: &Path) -> ProjectReport {
        let reference =
            match resolve_reference(root, self.reference_override, self.default_reference) {
                Ok(reference) => reference,
                Err(err) => {
                    warn!(project = name, "skipping project: {err}");
                    self.sink.event(ProgressEvent::new(
                        Phase::Discover,
                        format!("skipping {name}: {err}"),
                    ));
                    return ProjectReport::skipped(name, root, None, err);
                }
            };

        let units = match discover_units(&root.join(DATA_DIR), self.pattern) {
            Ok(units) => units,
            Err(err) => {
                warn!(project = name, "skipping project: {err}");
                self.sink.event(ProgressEvent::new(
                    Phase::Discover,
                    format!("skipping {name}: {err}"),
                ));
                return ProjectReport::skipped(name, root, Some(reference), err);
            }
        };

        info!(project = name, units = units.len(), reference = %reference.display(), "project discovered");
        self.sink.event(ProgressEvent::new(
            Phase::Discover,
            format!("{name}: {} work unit(s)", units.len()),
        ));

        let outcomes = units
            .iter()
            .map(|(barcode, layout)| self.processor.process(barcode, layout, &reference))
            .collect();

        ProjectReport {
            name: name.to_string(),
            root: root.to_path_buf(),
            status: ProjectStatus::Completed,
            reference: Some(reference),
            error: None,
            units: outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn override_wins_over_project_default() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("ref.fasta"), b">chr1\nACGT\n").unwrap();
        let other = temp.path().join("other.fa");
        fs::write(&other, b">chr2\nTTTT\n").unwrap();

        let resolved = resolve_reference(temp.path(), None, Path::new("ref.fasta")).unwrap();
        assert_eq!(resolved, temp.path().join("ref.fasta"));
        let resolved =
            resolve_reference(temp.path(), Some(&other), Path::new("ref.fasta")).unwrap();
        assert_eq!(resolved, other);
    }

    #[test]
    fn missing_reference_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert_matches!(
            resolve_reference(temp.path(), None, Path::new("ref.fasta")),
            Err(PipelineError::Reference { .. })
        );
        fs::create_dir(temp.path().join("ref.fasta")).unwrap();
        assert_matches!(
            resolve_reference(temp.path(), None, Path::new("ref.fasta")),
            Err(PipelineError::Reference { .. })
        );
    }

    #[test]
    fn discovery_ignores_non_barcode_dirs() {
        let temp = tempfile::tempdir().unwrap();
        for dir in ["barcode02", "barcode01", "unclassified", "notes"] {
            fs::create_dir(temp.path().join(dir)).unwrap();
        }
        fs::write(temp.path().join("barcode03"), b"a file, not a unit").unwrap();
        let units = discover_units(temp.path(), &BarcodePattern::default()).unwrap();
        let names: Vec<_> = units.iter().map(|(b, _)| b.as_str().to_string()).collect();
        assert_eq!(names, vec!["barcode01", "barcode02"]);
        assert!(units[0].1.alignments.ends_with("barcode01/alignments"));
    }
}
