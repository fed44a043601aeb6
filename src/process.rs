use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::PipelineError;

const STDERR_TAIL: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RunningProcess {
    label: String,
    child: Child,
    stderr: Option<JoinHandle<Vec<String>>>,
}

impl RunningProcess {
    pub fn spawn(label: &str, artifact: &str, command: &mut Command) -> Result<Self, PipelineError> {
        command.stderr(Stdio::piped());
        debug!(engine = label, artifact, "spawning {:?}", command);
        let mut child = command.spawn().map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                PipelineError::MissingTool(format!("{label} ({err})"))
            } else {
                PipelineError::Engine {
                    engine: label.to_string(),
                    artifact: artifact.to_string(),
                    message: format!("failed to start: {err}"),
                }
            }
        })?;
        let stderr = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || tail_lines(pipe)));
        Ok(Self {
            label: label.to_string(),
            child,
            stderr,
        })
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Kills and reaps the process; used when a later pipeline member fails to start.
    pub fn abort(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.stderr.take();
    }

    fn stderr_tail(&mut self) -> Vec<String> {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

pub fn run(
    label: &str,
    artifact: &str,
    command: &mut Command,
    timeout: Option<Duration>,
) -> Result<(), PipelineError> {
    let process = RunningProcess::spawn(label, artifact, command)?;
    wait_all(vec![process], artifact, timeout)
}

/// Waits for every process of a pipeline. All members are reaped before an
/// error is returned; every failing member is named in the message.
pub fn wait_all(
    mut processes: Vec<RunningProcess>,
    artifact: &str,
    timeout: Option<Duration>,
) -> Result<(), PipelineError> {
    let statuses = match timeout {
        None => wait_blocking(&mut processes, artifact)?,
        Some(limit) => wait_with_deadline(&mut processes, artifact, limit)?,
    };

    let mut failures = Vec::new();
    for (process, status) in processes.iter_mut().zip(statuses) {
        let tail = process.stderr_tail();
        if status.success() {
            continue;
        }
        let detail = tail.last().cloned().unwrap_or_default();
        warn!(engine = %process.label, artifact, %status, "engine failed");
        for line in &tail {
            debug!(engine = %process.label, "{line}");
        }
        failures.push((
            process.label.clone(),
            format!("{status} {detail}").trim().to_string(),
            broken_pipe(status),
        ));
    }

    if failures.is_empty() {
        return Ok(());
    }
    // Upstream members killed by SIGPIPE only echo a downstream failure.
    if failures.iter().any(|(_, _, pipe)| !pipe) {
        failures.retain(|(_, _, pipe)| !pipe);
    }
    Err(PipelineError::Engine {
        engine: failures
            .iter()
            .map(|(label, _, _)| label.as_str())
            .collect::<Vec<_>>()
            .join(" | "),
        artifact: artifact.to_string(),
        message: failures
            .into_iter()
            .map(|(label, message, _)| format!("{label}: {message}"))
            .collect::<Vec<_>>()
            .join("; "),
    })
}

fn wait_blocking(
    processes: &mut [RunningProcess],
    artifact: &str,
) -> Result<Vec<ExitStatus>, PipelineError> {
    let mut statuses = Vec::with_capacity(processes.len());
    for process in processes.iter_mut() {
        let status = process.child.wait().map_err(|err| PipelineError::Engine {
            engine: process.label.clone(),
            artifact: artifact.to_string(),
            message: err.to_string(),
        })?;
        statuses.push(status);
    }
    Ok(statuses)
}

fn wait_with_deadline(
    processes: &mut [RunningProcess],
    artifact: &str,
    limit: Duration,
) -> Result<Vec<ExitStatus>, PipelineError> {
    let started = Instant::now();
    let mut statuses: Vec<Option<ExitStatus>> = vec![None; processes.len()];
    loop {
        let mut pending = None;
        let mut wait_error = None;
        for (index, process) in processes.iter_mut().enumerate() {
            if statuses[index].is_some() {
                continue;
            }
            match process.child.try_wait() {
                Ok(Some(status)) => statuses[index] = Some(status),
                Ok(None) => {
                    pending.get_or_insert(index);
                }
                Err(err) => {
                    wait_error = Some((index, err));
                    break;
                }
            }
        }

        if let Some((index, err)) = wait_error {
            kill_all(processes);
            return Err(PipelineError::Engine {
                engine: process_label(processes, index),
                artifact: artifact.to_string(),
                message: err.to_string(),
            });
        }

        let Some(first_pending) = pending else {
            return Ok(statuses.into_iter().flatten().collect());
        };

        if started.elapsed() >= limit {
            let engine = process_label(processes, first_pending);
            warn!(engine = %engine, artifact, "timeout after {}s, killing", limit.as_secs());
            kill_all(processes);
            return Err(PipelineError::Timeout {
                engine,
                artifact: artifact.to_string(),
                seconds: limit.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn process_label(processes: &[RunningProcess], index: usize) -> String {
    processes
        .get(index)
        .map(|process| process.label.clone())
        .unwrap_or_default()
}

/// Kills and reaps every member. Drain threads are detached, a grandchild
/// may still hold the pipe open.
fn kill_all(processes: &mut [RunningProcess]) {
    for process in processes.iter_mut() {
        let _ = process.child.kill();
        let _ = process.child.wait();
        process.stderr.take();
    }
}

#[cfg(unix)]
fn broken_pipe(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;

    const SIGPIPE: i32 = 13;
    status.signal() == Some(SIGPIPE)
}

#[cfg(not(unix))]
fn broken_pipe(_status: ExitStatus) -> bool {
    false
}

fn tail_lines<R: io::Read>(pipe: R) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    for line in BufReader::new(pipe).lines() {
        let Ok(line) = line else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect()
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn success_and_failure() {
        run("sh", "a.sam", &mut sh("exit 0"), None).unwrap();
        let err = run("sh", "a.sam", &mut sh("echo boom >&2; exit 3"), None).unwrap_err();
        assert_matches!(err, PipelineError::Engine { ref artifact, ref message, .. } if artifact == "a.sam" && message.contains("boom"));
    }

    #[test]
    fn missing_program_is_missing_tool() {
        let mut command = Command::new("definitely-not-a-real-engine-binary");
        let err = run("ghost", "a.sam", &mut command, None).unwrap_err();
        assert_matches!(err, PipelineError::MissingTool(_));
    }

    #[test]
    fn timeout_kills_the_process() {
        let started = Instant::now();
        let err = run(
            "sleeper",
            "a.sam",
            &mut sh("exec sleep 10"),
            Some(Duration::from_millis(300)),
        )
        .unwrap_err();
        assert_matches!(err, PipelineError::Timeout { .. });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn downstream_failure_is_named_over_broken_pipes() {
        let mut producer = RunningProcess::spawn(
            "producer",
            "x",
            sh("exec yes").stdout(Stdio::piped()),
        )
        .unwrap();
        let stdout = producer.take_stdout().unwrap();
        let consumer = {
            let mut cmd = sh("exit 1");
            cmd.stdin(Stdio::from(stdout));
            RunningProcess::spawn("consumer", "x", &mut cmd).unwrap()
        };
        let err = wait_all(vec![producer, consumer], "x", Some(Duration::from_secs(20))).unwrap_err();
        assert_matches!(err, PipelineError::Engine { ref engine, .. } if engine == "consumer");
    }

    #[test]
    fn pipeline_members_are_connected() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("out.txt");
        let mut first = RunningProcess::spawn(
            "producer",
            "x",
            sh("printf 'b\\na\\n'").stdout(Stdio::piped()),
        )
        .unwrap();
        let stdout = first.take_stdout().unwrap();
        let mut sort = Command::new("sort");
        sort.stdin(Stdio::from(stdout))
            .stdout(std::fs::File::create(&out).unwrap());
        let second = RunningProcess::spawn("sort", "x", &mut sort).unwrap();
        wait_all(vec![first, second], "x", None).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "a\nb\n");
    }
}
