use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const DEFAULT_BARCODE_PATTERN: &str = r"(?i)^barcode[0-9a-z_-]*$";

const READ_EXTENSIONS: &[&str] = &["fastq", "fq"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectName(String);

impl ProjectName {
    /// Takes a directory name as it is on disk, surrounding whitespace included.
    pub fn from_dir_name(name: &str) -> Result<Self, PipelineError> {
        if !is_valid_project_name(name) {
            return Err(PipelineError::InvalidProjectName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectName {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches(['/', '\\']);
        if !is_valid_project_name(trimmed) {
            return Err(PipelineError::InvalidProjectName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

fn is_valid_project_name(name: &str) -> bool {
    !name.trim().is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Barcode(String);

impl Barcode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BarcodePattern {
    regex: Regex,
}

impl BarcodePattern {
    pub fn new(pattern: &str) -> Result<Self, PipelineError> {
        let regex =
            Regex::new(pattern).map_err(|err| PipelineError::InvalidPattern(err.to_string()))?;
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn parse(&self, name: &str) -> Result<Barcode, PipelineError> {
        if !self.matches(name) {
            return Err(PipelineError::InvalidBarcode(name.to_string()));
        }
        Ok(Barcode(name.to_string()))
    }
}

impl Default for BarcodePattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_BARCODE_PATTERN).expect("default barcode pattern is valid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gzip,
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    pub fn detect(path: &Path) -> Option<Self> {
        let name = file_name_lower(path)?;
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Some(ArchiveKind::TarGz);
        }
        if name.ends_with(".tar") {
            return Some(ArchiveKind::Tar);
        }
        if name.ends_with(".zip") {
            return Some(ArchiveKind::Zip);
        }
        let inner = name.strip_suffix(".gz")?;
        READ_EXTENSIONS
            .iter()
            .any(|ext| inner.ends_with(&format!(".{ext}")))
            .then_some(ArchiveKind::Gzip)
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Gzip => write!(f, "gzip"),
            ArchiveKind::Zip => write!(f, "zip"),
            ArchiveKind::Tar => write!(f, "tar"),
            ArchiveKind::TarGz => write!(f, "tar.gz"),
        }
    }
}

pub fn is_read_file(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|ext| READ_EXTENSIONS.iter().any(|r| ext.eq_ignore_ascii_case(r)))
        .unwrap_or(false)
}

pub fn read_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|value| value.to_str())
        .map(|value| value.to_string())
}

pub fn alignment_artifact_name(stem: &str) -> String {
    format!("{stem}.sam")
}

pub fn finalized_artifact_name(stem: &str) -> String {
    format!("{stem}.bam")
}

pub fn merged_output_name(timestamp: &str) -> String {
    format!("merged_{timestamp}.bam")
}

/// `<artifact>.bai`, the name `samtools index` writes by default.
pub fn index_name(artifact: &Path) -> Option<String> {
    artifact
        .file_name()
        .and_then(|value| value.to_str())
        .map(|value| format!("{value}.bai"))
}

pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn file_name_lower(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_project_name() {
        let name: ProjectName = " run_2024/ ".parse().unwrap();
        assert_eq!(name.as_str(), "run_2024");
        assert_matches!(
            "..".parse::<ProjectName>(),
            Err(PipelineError::InvalidProjectName(_))
        );
        assert_matches!(
            "a/b".parse::<ProjectName>(),
            Err(PipelineError::InvalidProjectName(_))
        );
    }

    #[test]
    fn directory_names_keep_their_whitespace() {
        let name = ProjectName::from_dir_name("run1 ").unwrap();
        assert_eq!(name.as_str(), "run1 ");
        assert_matches!(
            ProjectName::from_dir_name(".."),
            Err(PipelineError::InvalidProjectName(_))
        );
    }

    #[test]
    fn default_pattern_accepts_barcodes_only() {
        let pattern = BarcodePattern::default();
        assert!(pattern.matches("barcode01"));
        assert!(pattern.matches("Barcode12"));
        assert!(!pattern.matches("unclassified"));
        assert!(!pattern.matches("mybarcode01"));
        assert_matches!(
            pattern.parse("unclassified"),
            Err(PipelineError::InvalidBarcode(_))
        );
    }

    #[test]
    fn archive_detection() {
        assert_eq!(
            ArchiveKind::detect(&PathBuf::from("reads2.fq.gz")),
            Some(ArchiveKind::Gzip)
        );
        assert_eq!(
            ArchiveKind::detect(&PathBuf::from("READS.FASTQ.GZ")),
            Some(ArchiveKind::Gzip)
        );
        assert_eq!(
            ArchiveKind::detect(&PathBuf::from("pass.tar.gz")),
            Some(ArchiveKind::TarGz)
        );
        assert_eq!(
            ArchiveKind::detect(&PathBuf::from("pass.zip")),
            Some(ArchiveKind::Zip)
        );
        assert_eq!(ArchiveKind::detect(&PathBuf::from("notes.txt.gz")), None);
        assert_eq!(ArchiveKind::detect(&PathBuf::from("reads.fastq")), None);
    }

    #[test]
    fn artifact_names_follow_read_stem() {
        let read = PathBuf::from("barcode01/reads1.fastq");
        assert!(is_read_file(&read));
        let stem = read_stem(&read).unwrap();
        assert_eq!(alignment_artifact_name(&stem), "reads1.sam");
        assert_eq!(finalized_artifact_name(&stem), "reads1.bam");
        assert_eq!(
            index_name(&PathBuf::from("x/reads1.bam")).as_deref(),
            Some("reads1.bam.bai")
        );
        assert!(!is_read_file(&PathBuf::from("reads1.fq.gz")));
    }
}
