use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Serialize;

use crate::config::EngineSettings;
use crate::error::PipelineError;
use crate::process::{self, RunningProcess};

pub const ALIGNER: &str = "minimap2";
pub const SAMTOOLS: &str = "samtools";

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub aligner: Option<String>,
    pub samtools: Option<String>,
}

/// The external engines the pipeline drives. Every call blocks until the
/// engine exits and only succeeds when it reported a zero status.
pub trait Toolchain: Send + Sync {
    fn align(
        &self,
        reference: &Path,
        reads: &Path,
        threads: usize,
        output: &Path,
    ) -> Result<(), PipelineError>;

    fn consolidate(&self, input: &Path, threads: usize, output: &Path)
    -> Result<(), PipelineError>;

    fn merge(&self, inputs: &[PathBuf], threads: usize, output: &Path)
    -> Result<(), PipelineError>;

    fn index(&self, artifact: &Path) -> Result<(), PipelineError>;

    fn tool_info(&self) -> ToolInfo;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Ready,
    Missing { message: String },
}

#[derive(Clone)]
pub struct SystemToolchain {
    aligner: Option<PathBuf>,
    samtools: Option<PathBuf>,
    preset: String,
    timeout: Option<Duration>,
}

impl SystemToolchain {
    pub fn new(settings: &EngineSettings, timeout: Option<Duration>) -> Self {
        Self {
            aligner: settings
                .aligner_program
                .clone()
                .or_else(|| find_in_path(ALIGNER)),
            samtools: settings
                .samtools_program
                .clone()
                .or_else(|| find_in_path(SAMTOOLS)),
            preset: settings.aligner_preset.clone(),
            timeout,
        }
    }

    pub fn tool_status(&self) -> ToolStatus {
        if self.aligner.is_none() {
            return ToolStatus::Missing {
                message: format!("missing {ALIGNER} (alignment engine)"),
            };
        }
        if self.samtools.is_none() {
            return ToolStatus::Missing {
                message: format!("missing {SAMTOOLS} (sort/dedup/merge/index engine)"),
            };
        }
        ToolStatus::Ready
    }

    fn require_aligner(&self) -> Result<&PathBuf, PipelineError> {
        self.aligner
            .as_ref()
            .ok_or_else(|| PipelineError::MissingTool(ALIGNER.to_string()))
    }

    fn require_samtools(&self) -> Result<&PathBuf, PipelineError> {
        self.samtools
            .as_ref()
            .ok_or_else(|| PipelineError::MissingTool(SAMTOOLS.to_string()))
    }
}

impl Toolchain for SystemToolchain {
    fn align(
        &self,
        reference: &Path,
        reads: &Path,
        threads: usize,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let aligner = self.require_aligner()?;
        let artifact = display_name(reads);
        let sink = create_output(output)?;
        let mut cmd = Command::new(aligner);
        cmd.arg("-a")
            .arg("-x")
            .arg(&self.preset)
            .arg("-t")
            .arg(threads.to_string())
            .arg(reference)
            .arg(reads)
            .stdout(Stdio::from(sink));
        process::run(ALIGNER, &artifact, &mut cmd, self.timeout)
    }

    fn consolidate(
        &self,
        input: &Path,
        threads: usize,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let samtools = self.require_samtools()?;
        let artifact = display_name(input);
        let threads = threads.to_string();

        // Builders hold pipe ends; each one is dropped as soon as it has spawned.
        let mut fixmate = {
            let mut cmd = Command::new(samtools);
            cmd.args(["fixmate", "-m", "-u"])
                .arg(input)
                .arg("-")
                .stdout(Stdio::piped());
            RunningProcess::spawn("samtools fixmate", &artifact, &mut cmd)?
        };
        let Some(fixmate_out) = fixmate.take_stdout() else {
            fixmate.abort();
            return Err(pipe_error("samtools fixmate", &artifact));
        };

        let sort = {
            let mut cmd = Command::new(samtools);
            cmd.args(["sort", "-u", "-@", threads.as_str(), "-"])
                .stdin(Stdio::from(fixmate_out))
                .stdout(Stdio::piped());
            RunningProcess::spawn("samtools sort", &artifact, &mut cmd)
        };
        let mut sort = match sort {
            Ok(sort) => sort,
            Err(err) => {
                fixmate.abort();
                return Err(err);
            }
        };
        let Some(sort_out) = sort.take_stdout() else {
            sort.abort();
            fixmate.abort();
            return Err(pipe_error("samtools sort", &artifact));
        };

        let markdup = {
            let mut cmd = Command::new(samtools);
            cmd.args(["markdup", "-@", threads.as_str(), "-"])
                .arg(output)
                .stdin(Stdio::from(sort_out));
            RunningProcess::spawn("samtools markdup", &artifact, &mut cmd)
        };
        let markdup = match markdup {
            Ok(markdup) => markdup,
            Err(err) => {
                sort.abort();
                fixmate.abort();
                return Err(err);
            }
        };

        process::wait_all(vec![fixmate, sort, markdup], &artifact, self.timeout)
    }

    fn merge(
        &self,
        inputs: &[PathBuf],
        threads: usize,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let samtools = self.require_samtools()?;
        let artifact = display_name(output);
        let threads = threads.to_string();
        let mut cmd = Command::new(samtools);
        cmd.args(["merge", "-f", "-@", threads.as_str()])
            .arg(output)
            .args(inputs);
        process::run("samtools merge", &artifact, &mut cmd, self.timeout)
    }

    fn index(&self, artifact: &Path) -> Result<(), PipelineError> {
        let samtools = self.require_samtools()?;
        let name = display_name(artifact);
        let mut cmd = Command::new(samtools);
        cmd.arg("index").arg(artifact);
        process::run("samtools index", &name, &mut cmd, self.timeout)
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            aligner: self.aligner.as_deref().and_then(engine_version),
            samtools: self.samtools.as_deref().and_then(engine_version),
        }
    }
}

fn create_output(path: &Path) -> Result<fs::File, PipelineError> {
    fs::File::create(path)
        .map_err(|err| PipelineError::Filesystem(format!("create {}: {err}", path.display())))
}

fn pipe_error(engine: &str, artifact: &str) -> PipelineError {
    PipelineError::Engine {
        engine: engine.to_string(),
        artifact: artifact.to_string(),
        message: "stdout pipe unavailable".to_string(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// First executable called `name` on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let file_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };
    env::split_paths(&env::var_os("PATH")?)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

/// First line of `<engine> --version`, or `None` when the engine cannot say.
fn engine_version(program: &Path) -> Option<String> {
    let output = Command::new(program).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
