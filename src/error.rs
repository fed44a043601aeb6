use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("exactly one of --project or --all must be given")]
    ConflictingMode,

    #[error("no project selected (use --project <NAME> or --all)")]
    MissingMode,

    #[error("thread count must be a positive integer, got {0}")]
    InvalidThreads(String),

    #[error("base directory does not exist: {0}")]
    MissingBaseDir(PathBuf),

    #[error("project directory not found: {0}")]
    ProjectNotFound(PathBuf),

    #[error("invalid project name: {0}")]
    InvalidProjectName(String),

    #[error("invalid barcode directory name: {0}")]
    InvalidBarcode(String),

    #[error("invalid barcode pattern: {0}")]
    InvalidPattern(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("reference genome not usable: {path}: {reason}")]
    Reference { path: PathBuf, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to expand {archive}: {message}")]
    Expansion { archive: PathBuf, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{engine} failed on {artifact}: {message}")]
    Engine {
        engine: String,
        artifact: String,
        message: String,
    },

    #[error("{engine} timed out after {seconds}s on {artifact}")]
    Timeout {
        engine: String,
        artifact: String,
        seconds: u64,
    },

    #[error("read files {first} and {second} map to the same alignment artifact")]
    DuplicateStem { first: String, second: String },

    #[error("no finalized artifacts to merge in {0}")]
    NothingToMerge(PathBuf),

    #[error("{0}")]
    Prompt(String),
}

impl PipelineError {
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::ConflictingMode
                | PipelineError::MissingMode
                | PipelineError::InvalidThreads(_)
                | PipelineError::MissingBaseDir(_)
                | PipelineError::ProjectNotFound(_)
                | PipelineError::InvalidProjectName(_)
                | PipelineError::InvalidPattern(_)
                | PipelineError::ConfigRead(_)
                | PipelineError::ConfigParse(_)
        )
    }
}
