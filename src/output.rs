use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunReport};
use crate::project::ProjectStatus;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn format_event(event: &ProgressEvent) -> String {
        let mut line = format!("[{}]", event.phase.label());
        if let Some(unit) = &event.unit {
            line.push_str(&format!(" {unit}"));
        }
        if let Some((index, total)) = event.position {
            line.push_str(&format!(" {index}/{total}"));
        }
        line.push(' ');
        line.push_str(&event.message);
        if let Some(elapsed) = event.elapsed {
            line.push_str(&format!(" ({:.1}s)", elapsed.as_secs_f64()));
        }
        line
    }

    pub fn print_run(report: &RunReport) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        println!("{cyan}kira-align summary{reset}");
        for project in &report.projects {
            match project.status {
                ProjectStatus::Skipped => {
                    println!(
                        "{yellow}- {} skipped: {}{reset}",
                        project.name,
                        project.error.as_deref().unwrap_or("unknown reason")
                    );
                }
                ProjectStatus::Completed => {
                    println!("{cyan}- {} ({} units){reset}", project.name, project.units.len());
                }
            }
            for unit in &project.units {
                match (&unit.merged, &unit.error) {
                    (Some(merged), _) => {
                        println!("{green}  ok   {} -> {}{reset}", unit.barcode, merged.display())
                    }
                    (None, error) => println!(
                        "{red}  fail {} at {}: {}{reset}",
                        unit.barcode,
                        unit.failed_at.map(|state| state.label()).unwrap_or("?"),
                        error.as_deref().unwrap_or("unknown error")
                    ),
                }
                for failure in &unit.expansion.failures {
                    println!(
                        "{yellow}       archive {} not expanded: {}{reset}",
                        failure.archive.display(),
                        failure.message
                    );
                }
            }
        }

        let cleanup = &report.cleanup;
        println!(
            "Cleanup: {} removed, {} already gone, {} failed",
            cleanup.removed,
            cleanup.missing,
            cleanup.failed.len()
        );
        for failed in &cleanup.failed {
            println!("{red}  could not remove {failed}{reset}");
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", Self::format_event(&event));
    }
}
