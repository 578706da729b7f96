use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tickwork_core::duration::{format_duration, serde_opt_duration};

/// Where a loaded job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Waiting for its next fire.
    IdleEnabled,
    /// Loaded but not scheduled.
    IdleDisabled,
    Running,
    /// Running with cancellation requested.
    RunningCancelling,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::IdleEnabled => "idle-enabled",
            JobState::IdleDisabled => "idle-disabled",
            JobState::Running => "running",
            JobState::RunningCancelling => "running-cancelling",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running | JobState::RunningCancelling)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one job's registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub state: JobState,
    pub disabled: bool,
    /// Human description of the schedule.
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    /// Run time of the oldest in-flight execution.
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub running_for: Option<Duration>,
    /// In-flight execution count. At most one for serial jobs.
    pub executions: usize,
    /// Free-form text supplied by the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.name, self.state, self.schedule)?;
        if let Some(running_for) = self.running_for {
            write!(f, " running for {}", format_duration(running_for))?;
        }
        if let Some(next) = self.next_run {
            write!(f, " next {}", next.to_rfc3339())?;
        }
        if let Some(status) = &self.status {
            write!(f, " ({status})")?;
        }
        Ok(())
    }
}
