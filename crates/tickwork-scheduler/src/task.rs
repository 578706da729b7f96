use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tickwork_core::ExecutionId;

use crate::cancel::CancellationScope;
use crate::job::Job;

/// Bookkeeping for one in-flight run of a job.
///
/// Created when a run is dispatched and dropped from the manager's registry
/// when the job body returns (or earlier, if the job is unloaded).
pub struct TaskExecution {
    id: ExecutionId,
    job_name: String,
    job: Arc<dyn Job>,
    started_at: DateTime<Utc>,
    scope: CancellationScope,
    finished: AtomicBool,
}

impl TaskExecution {
    pub(crate) fn new(job_name: &str, job: Arc<dyn Job>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            job_name: job_name.to_string(),
            job,
            started_at,
            scope: CancellationScope::new(),
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn scope(&self) -> &CancellationScope {
        &self.scope
    }

    /// Run time as of `now`; zero if `now` precedes the start.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }

    pub fn is_cancelling(&self) -> bool {
        self.scope.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for TaskExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecution")
            .field("id", &self.id)
            .field("job_name", &self.job_name)
            .field("started_at", &self.started_at)
            .field("cancelling", &self.is_cancelling())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::job_fn;
    use crate::schedule::on_demand;

    #[test]
    fn elapsed_saturates_at_zero() {
        let start: DateTime<Utc> = "2020-01-01T00:00:10Z".parse().unwrap();
        let job: Arc<dyn Job> = Arc::new(job_fn("x", on_demand(), |_| async { Ok(()) }));
        let exec = TaskExecution::new("x", job, start);

        assert_eq!(exec.elapsed("2020-01-01T00:00:12Z".parse().unwrap()), Duration::from_secs(2));
        assert_eq!(exec.elapsed("2020-01-01T00:00:00Z".parse().unwrap()), Duration::ZERO);
        assert!(!exec.is_cancelling());
        exec.scope().cancel();
        assert!(exec.is_cancelling());
    }
}
