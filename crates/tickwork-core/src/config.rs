use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::duration::{parse_duration, serde_duration, serde_opt_duration};
use crate::error::{CoreError, Result};

/// Default pause between dispatch passes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);
/// Dispatch pause used when `high_precision` is on.
pub const HIGH_PRECISION_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5);
/// Default pause between hang-kill passes.
pub const DEFAULT_HANG_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(333);

/// Unprefixed override for the dispatch heartbeat, e.g. `HEARTBEAT_INTERVAL=10ms`.
pub const ENV_HEARTBEAT_INTERVAL: &str = "HEARTBEAT_INTERVAL";
/// Prefix for structured overrides, e.g. `TICKWORK_SCHEDULER__HIGH_PRECISION=true`.
pub const ENV_PREFIX: &str = "TICKWORK_";

/// Top-level config (tickwork.toml + TICKWORK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickworkConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Timing knobs for the job manager's background loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between dispatch passes.
    #[serde(default = "default_heartbeat", with = "serde_duration")]
    pub heartbeat_interval: Duration,
    /// When true the dispatch loop polls every 5 ms regardless of `heartbeat_interval`.
    #[serde(default)]
    pub high_precision: bool,
    /// Pause between passes that cancel executions exceeding their timeout.
    #[serde(default = "default_hang_heartbeat", with = "serde_duration")]
    pub hang_heartbeat_interval: Duration,
    /// Upper bound on how long a waiting stop blocks. `None` waits indefinitely.
    #[serde(default, with = "serde_opt_duration")]
    pub stop_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            high_precision: false,
            hang_heartbeat_interval: DEFAULT_HANG_HEARTBEAT_INTERVAL,
            stop_timeout: None,
        }
    }
}

impl SchedulerConfig {
    /// Defaults plus the `HEARTBEAT_INTERVAL` override.
    ///
    /// An unparsable override is logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Err(e) = config.apply_env_override() {
            warn!(var = ENV_HEARTBEAT_INTERVAL, error = %e, "ignoring heartbeat override");
        }
        config
    }

    /// Apply `HEARTBEAT_INTERVAL` if it is set. Turns high-precision mode off,
    /// since an explicit interval is more specific.
    pub fn apply_env_override(&mut self) -> Result<()> {
        match std::env::var(ENV_HEARTBEAT_INTERVAL) {
            Ok(raw) => self.apply_heartbeat_override(&raw),
            Err(_) => Ok(()),
        }
    }

    fn apply_heartbeat_override(&mut self, raw: &str) -> Result<()> {
        let interval = parse_duration(raw)?;
        if interval.is_zero() {
            return Err(CoreError::Config(format!(
                "{ENV_HEARTBEAT_INTERVAL} must be greater than zero"
            )));
        }
        self.heartbeat_interval = interval;
        self.high_precision = false;
        Ok(())
    }

    /// The dispatch pause actually used by the manager.
    pub fn effective_heartbeat(&self) -> Duration {
        if self.high_precision {
            HIGH_PRECISION_HEARTBEAT_INTERVAL
        } else {
            self.heartbeat_interval
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.high_precision = false;
        self
    }

    pub fn with_hang_heartbeat(mut self, interval: Duration) -> Self {
        self.hang_heartbeat_interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(CoreError::Config(
                "scheduler.heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.hang_heartbeat_interval.is_zero() {
            return Err(CoreError::Config(
                "scheduler.hang_heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl TickworkConfig {
    /// Load config from a TOML file with TICKWORK_* env var overrides, then
    /// apply `HEARTBEAT_INTERVAL`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config: TickworkConfig = load(config_path)?;
        config.scheduler.apply_env_override()?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

/// Extract any config shape from the standard provider chain.
///
/// Checks in order:
///   1. Explicit path argument
///   2. ~/.tickwork/tickwork.toml
///
/// A missing file is not an error; env vars and serde defaults fill the gaps.
pub fn load<T: DeserializeOwned>(config_path: Option<&str>) -> Result<T> {
    figment(config_path).extract().map_err(CoreError::from)
}

/// The provider chain behind [`load`], for callers that want to layer more providers.
pub fn figment(config_path: Option<&str>) -> Figment {
    let path = config_path
        .map(String::from)
        .unwrap_or_else(default_config_path);

    Figment::new()
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickwork/tickwork.toml", home)
}

fn default_heartbeat() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

fn default_hang_heartbeat() -> Duration {
    DEFAULT_HANG_HEARTBEAT_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.effective_heartbeat(), Duration::from_millis(50));
        assert_eq!(config.hang_heartbeat_interval, Duration::from_millis(333));
        assert!(config.stop_timeout.is_none());
    }

    #[test]
    fn high_precision_overrides_interval() {
        let config = SchedulerConfig {
            high_precision: true,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.effective_heartbeat(), Duration::from_millis(5));
    }

    #[test]
    fn heartbeat_override_parses_duration_string() {
        let mut config = SchedulerConfig {
            high_precision: true,
            ..SchedulerConfig::default()
        };
        config.apply_heartbeat_override("10ms").unwrap();
        assert_eq!(config.effective_heartbeat(), Duration::from_millis(10));
        assert!(!config.high_precision);
    }

    #[test]
    fn heartbeat_override_rejects_zero_and_garbage() {
        let mut config = SchedulerConfig::default();
        assert!(config.apply_heartbeat_override("0").is_err());
        assert!(config.apply_heartbeat_override("soon").is_err());
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn loads_scheduler_section_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[scheduler]\nheartbeat_interval = \"20ms\"\nhang_heartbeat_interval = 100\nstop_timeout = \"2s\""
        )
        .unwrap();

        let config: TickworkConfig = load(file.path().to_str()).unwrap();
        assert_eq!(config.scheduler.heartbeat_interval, Duration::from_millis(20));
        assert_eq!(
            config.scheduler.hang_heartbeat_interval,
            Duration::from_millis(100)
        );
        assert_eq!(config.scheduler.stop_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config: TickworkConfig = load(Some("/nonexistent/tickwork.toml")).unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let config = SchedulerConfig::default().with_hang_heartbeat(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
