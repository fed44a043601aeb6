use std::io::{self, BufRead, Write};

use crate::domain::ProjectName;
use crate::error::PipelineError;

/// Asks the operator which project to run when neither `--project` nor
/// `--all` was given. `Ok(None)` means no choice was made.
pub trait ProjectPrompt {
    fn choose_project(
        &self,
        candidates: &[ProjectName],
    ) -> Result<Option<ProjectName>, PipelineError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl ProjectPrompt for NoPrompt {
    fn choose_project(
        &self,
        _candidates: &[ProjectName],
    ) -> Result<Option<ProjectName>, PipelineError> {
        Ok(None)
    }
}

/// Lists the projects on stderr and reads a number or a name from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompt;

impl ProjectPrompt for StdinPrompt {
    fn choose_project(
        &self,
        candidates: &[ProjectName],
    ) -> Result<Option<ProjectName>, PipelineError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let mut stderr = io::stderr();
        let prompt_err = |err: io::Error| PipelineError::Prompt(err.to_string());
        writeln!(stderr, "Projects:").map_err(prompt_err)?;
        for (index, name) in candidates.iter().enumerate() {
            writeln!(stderr, "  {}) {name}", index + 1).map_err(prompt_err)?;
        }
        write!(stderr, "Select a project (number or name, empty to cancel): ")
            .map_err(prompt_err)?;
        stderr.flush().map_err(prompt_err)?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map_err(prompt_err)?;
        interpret_answer(&line, candidates)
    }
}

pub fn interpret_answer(
    answer: &str,
    candidates: &[ProjectName],
) -> Result<Option<ProjectName>, PipelineError> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(None);
    }
    if let Ok(number) = answer.parse::<usize>() {
        return number
            .checked_sub(1)
            .and_then(|index| candidates.get(index))
            .cloned()
            .map(Some)
            .ok_or_else(|| PipelineError::Prompt(format!("no project numbered {number}")));
    }
    candidates
        .iter()
        .find(|name| name.as_str() == answer)
        .cloned()
        .map(Some)
        .ok_or_else(|| PipelineError::Prompt(format!("unknown project: {answer}")))
}
