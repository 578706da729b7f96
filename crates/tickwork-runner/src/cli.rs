use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tickwork_scheduler::StopMode;

/// Run shell commands on schedules.
#[derive(Parser, Debug)]
#[command(name = "tickwork-runner", version, about = "Run shell commands on schedules")]
pub struct Cli {
    /// TOML config file. Falls back to TICKWORK_CONFIG.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the configured jobs and run them until interrupted.
    Run {
        /// Stop on our own after this long (e.g. "30s", "5m").
        #[arg(long = "duration", value_parser = parse_duration_arg)]
        duration: Option<Duration>,

        /// How running executions are treated on shutdown.
        #[arg(long = "stop", value_enum, default_value_t = StopArg::CancelAndWait)]
        stop: StopArg,

        /// Also write every job event to stdout as JSON lines.
        #[arg(long = "events")]
        events: bool,

        /// Print the final status report as JSON.
        #[arg(long = "json")]
        json: bool,
    },

    /// Validate the config and show when each job would fire next.
    Check {
        #[arg(long = "json")]
        json: bool,
    },

    /// Run a single job once, wait for it, and exit with its outcome.
    Once {
        /// Name of a configured job.
        name: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StopArg {
    Detach,
    Drain,
    Cancel,
    CancelAndWait,
}

impl From<StopArg> for StopMode {
    fn from(arg: StopArg) -> Self {
        match arg {
            StopArg::Detach => StopMode::Detach,
            StopArg::Drain => StopMode::Drain,
            StopArg::Cancel => StopMode::Cancel,
            StopArg::CancelAndWait => StopMode::CancelAndWait,
        }
    }
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    tickwork_core::duration::parse_duration(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "tickwork-runner",
            "run",
            "--config",
            "jobs.toml",
            "--duration",
            "90s",
            "--stop",
            "drain",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("jobs.toml")));
        match cli.command {
            Command::Run { duration, stop, events, json } => {
                assert_eq!(duration, Some(Duration::from_secs(90)));
                assert_eq!(stop, StopArg::Drain);
                assert!(!events && !json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_duration() {
        let err = Cli::try_parse_from(["tickwork-runner", "run", "--duration", "soon"]);
        assert!(err.is_err());
    }

    #[test]
    fn stop_defaults_to_cancel_and_wait() {
        let cli = Cli::try_parse_from(["tickwork-runner", "run"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Run { stop: StopArg::CancelAndWait, .. }
        ));
    }
}
