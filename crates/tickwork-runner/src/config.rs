use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tickwork_core::duration::serde_opt_duration;
use tickwork_core::SchedulerConfig;
use tickwork_scheduler::ScheduleSpec;

/// Runner config: the shared `[scheduler]` section plus `[[jobs]]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// One shell command on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Run through `sh -c`.
    pub command: String,
    pub schedule: ScheduleSpec,
    #[serde(default, with = "serde_opt_duration")]
    pub timeout: Option<Duration>,
    #[serde(default = "default_true")]
    pub serial: bool,
    #[serde(default = "default_true")]
    pub show_messages: bool,
    /// Loaded but not scheduled until enabled.
    #[serde(default)]
    pub disabled: bool,
}

impl RunnerConfig {
    /// Load from TOML + TICKWORK_* env vars, apply `HEARTBEAT_INTERVAL`, validate.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut config: RunnerConfig =
            tickwork_core::config::load(config_path).context("failed to read runner config")?;
        config
            .scheduler
            .apply_env_override()
            .context("invalid HEARTBEAT_INTERVAL")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.scheduler.validate()?;

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                bail!("every job needs a name");
            }
            if !seen.insert(job.name.as_str()) {
                bail!("duplicate job name `{}`", job.name);
            }
            if job.command.trim().is_empty() {
                bail!("job `{}` has an empty command", job.name);
            }
            job.schedule
                .build()
                .with_context(|| format!("job `{}` has an invalid schedule", job.name))?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
