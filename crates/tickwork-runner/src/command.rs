use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use tickwork_scheduler::{CancellationScope, Job, JobError, Schedule, SchedulerError};

use crate::config::JobConfig;

/// Longest stderr excerpt carried into a failure message.
const MAX_ERROR_CHARS: usize = 400;

/// How the most recent execution of a [`CommandJob`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// A job that runs one shell command through `sh -c`.
///
/// Cancellation kills the child process.
pub struct CommandJob {
    name: String,
    command: String,
    schedule: Arc<dyn Schedule>,
    timeout: Option<Duration>,
    serial: bool,
    show_messages: bool,
    runs: AtomicU64,
    last_exit: Mutex<Option<String>>,
    outcome: Mutex<Option<Outcome>>,
}

impl CommandJob {
    pub fn new(name: impl Into<String>, command: impl Into<String>, schedule: Arc<dyn Schedule>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            schedule,
            timeout: None,
            serial: true,
            show_messages: true,
            runs: AtomicU64::new(0),
            last_exit: Mutex::new(None),
            outcome: Mutex::new(None),
        }
    }

    pub fn from_config(config: &JobConfig) -> Result<Self, SchedulerError> {
        let mut job = Self::new(&config.name, &config.command, config.schedule.build()?);
        job.timeout = config.timeout;
        job.serial = config.serial;
        job.show_messages = config.show_messages;
        Ok(job)
    }

    /// Take the outcome recorded by the last completed execution.
    pub fn take_outcome(&self) -> Option<Outcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn record_exit(&self, exit: String) {
        *self.last_exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit);
    }
}

#[async_trait]
impl Job for CommandJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> Arc<dyn Schedule> {
        Arc::clone(&self.schedule)
    }

    async fn execute(&self, scope: CancellationScope) -> Result<(), JobError> {
        scope.check_cancellation()?;
        self.runs.fetch_add(1, Ordering::Relaxed);
        debug!(job = %self.name, command = %self.command, "spawning command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(JobError::other)?;

        // Losing the race drops the wait future and with it the child, which
        // kill_on_drop turns into a SIGKILL.
        let output = match scope.run_until_cancelled(child.wait_with_output()).await {
            Ok(output) => output.map_err(JobError::other)?,
            Err(cancelled) => {
                self.record_exit("killed".to_string());
                return Err(cancelled.into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if self.show_messages {
            for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
                info!(job = %self.name, "{line}");
            }
        }

        let exit = match output.status.code() {
            Some(code) => format!("exit {code}"),
            None => "terminated by signal".to_string(),
        };
        self.record_exit(exit.clone());

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = tail(stderr.trim(), MAX_ERROR_CHARS);
        if detail.is_empty() {
            Err(JobError::failed(exit))
        } else {
            Err(JobError::failed(format!("{exit}: {detail}")))
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn status(&self) -> Option<String> {
        let runs = self.runs.load(Ordering::Relaxed);
        let last = self.last_exit.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match last {
            Some(last) => Some(format!("{runs} runs, last {last}")),
            None if runs > 0 => Some(format!("{runs} runs")),
            None => None,
        }
    }

    fn show_messages(&self) -> bool {
        self.show_messages
    }

    fn on_complete(&self, error: Option<&JobError>) {
        let outcome = match error {
            None => Outcome::Succeeded,
            Some(e) if e.is_cancelled() => Outcome::Cancelled,
            Some(e) => Outcome::Failed(e.to_string()),
        };
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    fn serial(&self) -> bool {
        self.serial
    }
}

impl std::fmt::Debug for CommandJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandJob")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("schedule", &self.schedule.to_string())
            .finish()
    }
}

/// Last `max` characters of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tickwork_scheduler::schedule;

    fn job(command: &str) -> CommandJob {
        CommandJob::new("cmd", command, Arc::new(schedule::on_demand()))
    }

    #[tokio::test]
    async fn successful_command_records_exit() {
        let job = job("echo hello");
        job.execute(CancellationScope::new()).await.unwrap();
        assert_eq!(job.status().as_deref(), Some("1 runs, last exit 0"));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_stderr() {
        let job = job("echo broken >&2; exit 3");
        let err = job.execute(CancellationScope::new()).await.unwrap_err();
        match err {
            JobError::Failed(msg) => assert_eq!(msg, "exit 3: broken"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let job = Arc::new(job("sleep 30"));
        let scope = CancellationScope::new();
        let handle = {
            let job = Arc::clone(&job);
            let scope = scope.clone();
            tokio::spawn(async move { job.execute(scope).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let t = Instant::now();
        scope.cancel();
        let err = handle.await.unwrap().unwrap_err();

        assert!(err.is_cancelled());
        assert!(t.elapsed() < Duration::from_secs(5));
        assert_eq!(job.status().as_deref(), Some("1 runs, last killed"));
    }

    #[tokio::test]
    async fn already_cancelled_scope_skips_spawn() {
        let job = job("echo never");
        let scope = CancellationScope::new();
        scope.cancel();
        assert!(job.execute(scope).await.unwrap_err().is_cancelled());
        assert_eq!(job.status(), None);
    }

    #[test]
    fn completion_records_an_outcome() {
        let job = job("true");
        assert_eq!(job.take_outcome(), None);

        job.on_complete(None);
        assert_eq!(job.take_outcome(), Some(Outcome::Succeeded));
        assert_eq!(job.take_outcome(), None);

        job.on_complete(Some(&JobError::Cancelled));
        assert_eq!(job.take_outcome(), Some(Outcome::Cancelled));

        job.on_complete(Some(&JobError::failed("exit 2")));
        assert_eq!(job.take_outcome(), Some(Outcome::Failed("exit 2".into())));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ééé", 2), "éé");
    }
}
