use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{RunConfig, RunMode};
use crate::domain::ProjectName;
use crate::engine::{ToolInfo, Toolchain};
use crate::error::PipelineError;
use crate::fs_util;
use crate::merge::{Clock, SystemClock};
use crate::project::{ProjectReport, ProjectWalker};
use crate::prompt::ProjectPrompt;
use crate::tracker::{CleanupGuard, CleanupReport, ResourceTracker};
use crate::unit::WorkUnitProcessor;

pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Discover,
    Expand,
    Align,
    Consolidate,
    Merge,
    Cleanup,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Discover => "Discover",
            Phase::Expand => "Expand",
            Phase::Align => "Align",
            Phase::Consolidate => "Consolidate",
            Phase::Merge => "Merge",
            Phase::Cleanup => "Cleanup",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub unit: Option<String>,
    pub message: String,
    pub position: Option<(usize, usize)>,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            unit: None,
            message: message.into(),
            position: None,
            elapsed: None,
        }
    }

    pub fn at(mut self, index: usize, total: usize) -> Self {
        self.position = Some((index, total));
        self
    }

    pub fn took(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn in_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub base_dir: PathBuf,
    pub threads: usize,
    pub tools: ToolInfo,
    pub projects: Vec<ProjectReport>,
    pub cleanup: CleanupReport,
}

impl RunReport {
    pub fn failed_units(&self) -> usize {
        self.projects.iter().map(ProjectReport::failed_units).sum()
    }

    pub fn skipped_projects(&self) -> usize {
        self.projects.iter().filter(|p| p.error.is_some()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.projects.iter().any(|project| !project.is_clean())
    }
}

pub struct App<T: Toolchain, C: Clock = SystemClock> {
    toolchain: T,
    clock: C,
}

impl<T: Toolchain> App<T, SystemClock> {
    pub fn new(toolchain: T) -> Self {
        Self {
            toolchain,
            clock: SystemClock,
        }
    }
}

impl<T: Toolchain, C: Clock> App<T, C> {
    pub fn with_clock(toolchain: T, clock: C) -> Self {
        Self { toolchain, clock }
    }

    pub fn start(&self) -> Run<'_, T, C> {
        let tracker = ResourceTracker::new();
        let guard = tracker.guard();
        Run {
            app: self,
            tracker,
            guard,
        }
    }

    pub fn run(
        &self,
        config: &RunConfig,
        prompt: &dyn ProjectPrompt,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, PipelineError> {
        self.start().execute(config, prompt, sink)
    }
}

/// A single pipeline run. Tracked resources are removed exactly once: when
/// `execute` returns, when the run is dropped, or from the interrupt handler.
pub struct Run<'a, T: Toolchain, C: Clock> {
    app: &'a App<T, C>,
    tracker: ResourceTracker,
    guard: CleanupGuard,
}

impl<T: Toolchain, C: Clock> Run<'_, T, C> {
    /// Runs tracked cleanup and exits with status 130 on Ctrl-C or SIGTERM.
    /// Only one handler can be installed per process.
    pub fn install_interrupt_handler(&self) -> Result<(), PipelineError> {
        let tracker = self.tracker.clone();
        ctrlc::set_handler(move || {
            warn!("interrupted, removing intermediate files");
            if let Some(report) = tracker.cleanup() {
                info!(
                    removed = report.removed,
                    failed = report.failed.len(),
                    "cleanup after interrupt"
                );
            }
            std::process::exit(INTERRUPTED_EXIT_CODE);
        })
        .map_err(|err| PipelineError::Filesystem(format!("install interrupt handler: {err}")))
    }

    pub fn execute(
        self,
        config: &RunConfig,
        prompt: &dyn ProjectPrompt,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, PipelineError> {
        if !config.base_dir.is_dir() {
            return Err(PipelineError::MissingBaseDir(config.base_dir.clone()));
        }

        let mode = match &config.mode {
            Some(mode) => mode.clone(),
            None => {
                let candidates = list_projects(config)?;
                match prompt.choose_project(&candidates)? {
                    Some(name) => RunMode::OneProject(name),
                    None => return Err(PipelineError::MissingMode),
                }
            }
        };

        let projects = match &mode {
            RunMode::OneProject(name) => {
                let root = config.base_dir.join(name.as_str());
                if !root.is_dir() {
                    return Err(PipelineError::ProjectNotFound(root));
                }
                vec![name.clone()]
            }
            RunMode::AllProjects => list_projects(config)?,
        };

        let tools = self.app.toolchain.tool_info();
        info!(
            base_dir = %config.base_dir.display(),
            projects = projects.len(),
            threads = config.threads,
            "starting run"
        );

        let processor = WorkUnitProcessor::new(
            &self.app.toolchain,
            &self.app.clock,
            &self.tracker,
            sink,
            config.threads,
        );
        let walker = ProjectWalker::new(
            processor,
            sink,
            config.reference_override.as_deref(),
            &config.default_reference,
            &config.barcode_pattern,
        );

        let reports = projects
            .iter()
            .map(|name| walker.walk(name.as_str(), &config.base_dir.join(name.as_str())))
            .collect::<Vec<_>>();

        sink.event(ProgressEvent::new(
            Phase::Cleanup,
            "removing intermediate files",
        ));
        let cleanup = self.guard.finish();
        info!(
            removed = cleanup.removed,
            missing = cleanup.missing,
            failed = cleanup.failed.len(),
            "cleanup done"
        );

        Ok(RunReport {
            base_dir: config.base_dir.clone(),
            threads: config.threads,
            tools,
            projects: reports,
            cleanup,
        })
    }
}

fn list_projects(config: &RunConfig) -> Result<Vec<ProjectName>, PipelineError> {
    let mut names = Vec::new();
    for dir in fs_util::list_dirs(&config.base_dir)? {
        let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(ProjectName::from_dir_name(name)?);
    }
    Ok(names)
}
