use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{BarcodePattern, DEFAULT_BARCODE_PATTERN, ProjectName};
use crate::error::PipelineError;

pub const CONFIG_FILE_NAME: &str = "kira-align.json";
pub const DEFAULT_BASE_DIR: &str = "./projects";
pub const DEFAULT_THREADS: usize = 8;
pub const DEFAULT_REFERENCE: &str = "ref.fasta";
pub const DEFAULT_PRESET: &str = "map-ont";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub threads: Option<i64>,
    #[serde(default)]
    pub default_reference: Option<PathBuf>,
    #[serde(default)]
    pub aligner: Option<AlignerEntry>,
    #[serde(default)]
    pub samtools: Option<SamtoolsEntry>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub barcode_pattern: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AlignerEntry {
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub preset: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SamtoolsEntry {
    #[serde(default)]
    pub program: Option<PathBuf>,
}

/// Engine locations and flags. `None` programs are looked up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub aligner_program: Option<PathBuf>,
    pub aligner_preset: String,
    pub samtools_program: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            aligner_program: None,
            aligner_preset: DEFAULT_PRESET.to_string(),
            samtools_program: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    OneProject(ProjectName),
    AllProjects,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub base_dir: Option<PathBuf>,
    pub project: Option<String>,
    pub all: bool,
    pub threads: Option<String>,
    pub reference: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_dir: PathBuf,
    pub mode: Option<RunMode>,
    pub threads: usize,
    pub reference_override: Option<PathBuf>,
    pub default_reference: PathBuf,
    pub barcode_pattern: BarcodePattern,
    pub engines: EngineSettings,
    pub timeout: Option<Duration>,
    pub strict: bool,
}

impl RunConfig {
    /// Merges command-line options over the config file and validates the result.
    pub fn resolve(options: RunOptions, file: Config) -> Result<Self, PipelineError> {
        let mode = match (options.project, options.all) {
            (Some(_), true) => return Err(PipelineError::ConflictingMode),
            (Some(name), false) => Some(RunMode::OneProject(name.parse()?)),
            (None, true) => Some(RunMode::AllProjects),
            (None, false) => None,
        };

        let threads = match options.threads {
            Some(raw) => parse_threads(&raw)?,
            None => match file.threads {
                Some(value) => parse_threads(&value.to_string())?,
                None => DEFAULT_THREADS,
            },
        };

        let base_dir = options
            .base_dir
            .or(file.base_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR));
        if !base_dir.is_dir() {
            return Err(PipelineError::MissingBaseDir(base_dir));
        }

        let barcode_pattern = BarcodePattern::new(
            file.barcode_pattern
                .as_deref()
                .unwrap_or(DEFAULT_BARCODE_PATTERN),
        )?;

        let aligner = file.aligner.unwrap_or_default();
        let engines = EngineSettings {
            aligner_program: aligner.program,
            aligner_preset: aligner
                .preset
                .unwrap_or_else(|| DEFAULT_PRESET.to_string()),
            samtools_program: file.samtools.and_then(|entry| entry.program),
        };

        Ok(Self {
            base_dir,
            mode,
            threads,
            reference_override: options.reference,
            default_reference: file
                .default_reference
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REFERENCE)),
            barcode_pattern,
            engines,
            timeout: options
                .timeout_secs
                .or(file.timeout_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            strict: options.strict,
        })
    }
}

pub fn parse_threads(raw: &str) -> Result<usize, PipelineError> {
    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => {
            usize::try_from(value).map_err(|_| PipelineError::InvalidThreads(raw.to_string()))
        }
        _ => Err(PipelineError::InvalidThreads(raw.to_string())),
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path (must exist), then `./kira-align.json`, then the user
    /// config directory. No file at all yields the defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Config, PipelineError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(&local);
        }
        if let Some(user) = user_config_path() {
            if user.exists() {
                return Self::load(&user);
            }
        }
        Ok(Config::default())
    }

    pub fn load(path: &Path) -> Result<Config, PipelineError> {
        let content =
            fs::read_to_string(path).map_err(|_| PipelineError::ConfigRead(path.to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, PipelineError> {
        serde_json::from_str(content).map_err(|err| PipelineError::ConfigParse(err.to_string()))
    }
}

fn user_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join("kira-align").join("config.json"))
}
