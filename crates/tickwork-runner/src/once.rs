use std::time::Duration;

use anyhow::bail;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use tickwork_scheduler::{Job, JobManager, StopMode};

use crate::command::{CommandJob, Outcome};

/// Shortest pause between hang-kill passes while waiting on a single run.
const MIN_HANG_INTERVAL: Duration = Duration::from_millis(10);

/// Run one loaded job to completion without starting the dispatch loops.
///
/// Hang-kill passes keep running on `hang_interval`, so the job's timeout
/// still applies. Returns the job's status line on success.
pub async fn run_once(
    manager: &JobManager,
    job: &CommandJob,
    hang_interval: Duration,
) -> anyhow::Result<Option<String>> {
    let name = job.name();
    if manager.is_disabled(name) {
        manager.enable(name)?;
    }
    job.take_outcome();
    manager.run_job(name)?;

    let mut hang_check = tokio::time::interval(hang_interval.max(MIN_HANG_INTERVAL));
    hang_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let drain = manager.stop(StopMode::Drain);
    tokio::pin!(drain);
    loop {
        tokio::select! {
            result = &mut drain => {
                result?;
                break;
            }
            _ = hang_check.tick() => {
                if manager.kill_hanging_jobs() > 0 {
                    warn!(job = %name, "run exceeded its timeout");
                }
            }
        }
    }

    match job.take_outcome() {
        Some(Outcome::Succeeded) => Ok(manager.job_status(name).and_then(|s| s.status)),
        Some(Outcome::Cancelled) => bail!("job `{name}` was cancelled"),
        Some(Outcome::Failed(error)) => bail!("job `{name}` failed: {error}"),
        None => bail!("job `{name}` finished without reporting an outcome"),
    }
}
