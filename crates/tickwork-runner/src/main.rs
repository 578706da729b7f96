use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use tickwork_events::{EventBus, EventSink, JobEvent, JsonSink, ListenerDefinition, LogSink};
use tickwork_scheduler::{JobManager, StopMode};

mod cli;
mod command;
mod config;
mod once;
mod report;

use cli::{Cli, Command};
use command::CommandJob;
use config::RunnerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickwork_runner=info,tickwork_scheduler=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // explicit --config > TICKWORK_CONFIG > ~/.tickwork/tickwork.toml
    if let Some(path) = cli.config.as_ref().filter(|p| !p.exists()) {
        bail!("config file {} does not exist", path.display());
    }
    let config_path = cli
        .config
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("TICKWORK_CONFIG").ok());
    let config = RunnerConfig::load(config_path.as_deref())?;

    match cli.command {
        Command::Run {
            duration,
            stop,
            events,
            json,
        } => {
            let (manager, _, _) = build_manager(&config, events)?;
            manager.start();
            info!(
                jobs = config.jobs.len(),
                heartbeat_ms = config.scheduler.effective_heartbeat().as_millis() as u64,
                "runner started"
            );

            match duration {
                Some(limit) => tokio::select! {
                    _ = tokio::time::sleep(limit) => info!("run duration elapsed"),
                    r = tokio::signal::ctrl_c() => { r?; info!("interrupted"); }
                },
                None => {
                    tokio::signal::ctrl_c().await?;
                    info!("interrupted");
                }
            }

            if let Err(e) = manager.stop(StopMode::from(stop)).await {
                warn!(error = %e, "shutdown did not finish cleanly");
            }
            print_report(&manager, json)?;
        }
        Command::Check { json } => {
            let (manager, _, _) = build_manager(&config, false)?;
            print_report(&manager, json)?;
        }
        Command::Once { name } => {
            let (manager, _, jobs) = build_manager(&config, false)?;
            let job = jobs
                .get(&name)
                .with_context(|| format!("no job named `{name}` in the config"))?;
            let status =
                once::run_once(&manager, job, config.scheduler.hang_heartbeat_interval).await?;
            if let Some(status) = status {
                println!("{name}: {status}");
            }
        }
    }
    Ok(())
}

/// Load every configured job into a fresh manager whose events go through a
/// shared bus: always to the log, optionally to stdout as JSON lines. The
/// loaded command jobs come back keyed by name.
fn build_manager(
    config: &RunnerConfig,
    json_events: bool,
) -> anyhow::Result<(JobManager, Arc<EventBus>, HashMap<String, Arc<CommandJob>>)> {
    let bus = Arc::new(EventBus::new());
    let log: Arc<dyn EventSink> = Arc::new(LogSink);
    bus.register(ListenerDefinition::new(
        "log",
        Arc::new(move |event: &JobEvent| -> tickwork_events::Result<()> {
            log.emit(event);
            Ok(())
        }),
    ));
    if json_events {
        let json = Arc::new(JsonSink::new(io::stdout()));
        bus.register(
            ListenerDefinition::new(
                "json",
                Arc::new(move |event: &JobEvent| -> tickwork_events::Result<()> {
                    json.write_event(event)
                }),
            )
            .with_priority(1),
        );
    }

    let manager = JobManager::builder()
        .config(config.scheduler.clone())
        .sink(Arc::clone(&bus) as Arc<dyn EventSink>)
        .build();

    let mut jobs = HashMap::with_capacity(config.jobs.len());
    for job in &config.jobs {
        let command = CommandJob::from_config(job)
            .with_context(|| format!("cannot build job `{}`", job.name))?;
        let command = Arc::new(command);
        manager.load_shared(Arc::clone(&command) as _)?;
        if job.disabled {
            manager.disable(&job.name)?;
        }
        jobs.insert(job.name.clone(), command);
    }
    Ok((manager, bus, jobs))
}

fn print_report(manager: &JobManager, json: bool) -> anyhow::Result<()> {
    let statuses = manager.status();
    if json {
        println!("{}", report::render_json(&statuses)?);
    } else {
        print!("{}", report::render_table(&statuses));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::JobConfig;
    use std::time::Duration;
    use tickwork_scheduler::{JobState, ScheduleSpec};

    fn job(name: &str, command: &str, disabled: bool) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            command: command.to_string(),
            schedule: ScheduleSpec::OnDemand,
            timeout: None,
            serial: true,
            show_messages: false,
            disabled,
        }
    }

    #[tokio::test]
    async fn builds_manager_from_config() {
        let config = RunnerConfig {
            jobs: vec![job("greet", "echo hi", false), job("paused", "true", true)],
            ..Default::default()
        };
        let (manager, bus, jobs) = build_manager(&config, false).unwrap();
        assert_eq!(bus.len(), 1);
        assert_eq!(jobs.len(), 2);
        assert_eq!(manager.job_names(), vec!["greet", "paused"]);
        assert_eq!(
            manager.job_status("paused").map(|s| s.state),
            Some(JobState::IdleDisabled)
        );

        manager.run_job("greet").unwrap();
        manager.stop(StopMode::Drain).await.unwrap();

        let status = manager.job_status("greet").unwrap();
        assert_eq!(status.state, JobState::IdleEnabled);
        assert_eq!(status.status.as_deref(), Some("1 runs, last exit 0"));
        assert!(status.last_run.is_some());
        assert_eq!(jobs["greet"].take_outcome(), Some(command::Outcome::Succeeded));
    }

    #[tokio::test]
    async fn once_enables_and_runs_a_disabled_quiet_job() {
        let config = RunnerConfig {
            jobs: vec![job("paused", "echo resumed", true)],
            ..Default::default()
        };
        let (manager, _, jobs) = build_manager(&config, false).unwrap();

        let status = once::run_once(&manager, &jobs["paused"], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(status.as_deref(), Some("1 runs, last exit 0"));
        assert!(!manager.is_disabled("paused"));
    }

    #[tokio::test]
    async fn json_events_add_a_listener() {
        let config = RunnerConfig::default();
        let (_, bus, _) = build_manager(&config, true).unwrap();
        assert_eq!(bus.len(), 2);
    }
}
