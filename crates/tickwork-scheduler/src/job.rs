use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tickwork_core::ExecutionId;

use crate::cancel::CancellationScope;
use crate::error::JobError;
use crate::schedule::{OnDemandSchedule, Schedule};

/// A unit of work the manager can schedule.
///
/// Only [`name`](Job::name), [`schedule`](Job::schedule) and
/// [`execute`](Job::execute) are required. Every other method is an optional
/// capability with a neutral default, read by the manager at dispatch time.
/// None of them is ever called while the manager holds a lock.
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique, non-empty key within one manager.
    fn name(&self) -> &str;

    /// Called once when the job is loaded. The returned schedule is kept for
    /// the lifetime of the registration, so stateful schedules keep their state.
    fn schedule(&self) -> Arc<dyn Schedule>;

    /// The job body. Observe `scope` at safe points and return
    /// [`JobError::Cancelled`] (usually via `scope.check_cancellation()?`)
    /// once it is cancelled.
    async fn execute(&self, scope: CancellationScope) -> Result<(), JobError>;

    /// Executions running longer than this are cancelled by the hang-kill loop.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Free-form text shown in status snapshots.
    fn status(&self) -> Option<String> {
        None
    }

    /// Whether started/completed events reach the event sink.
    fn show_messages(&self) -> bool {
        true
    }

    /// Serial jobs never have two executions in flight.
    fn serial(&self) -> bool {
        true
    }

    fn on_start(&self) {}

    fn on_complete(&self, _error: Option<&JobError>) {}

    fn on_cancellation(&self) {}
}

type Action = dyn Fn(CancellationScope) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync;

/// A [`Job`] assembled from a closure. Build one with [`job_fn`].
pub struct FnJob {
    name: String,
    schedule: Arc<dyn Schedule>,
    action: Box<Action>,
    timeout: Option<Duration>,
    serial: bool,
    show_messages: bool,
}

/// Wrap an async closure as a job.
///
/// ```ignore
/// let job = job_fn("heartbeat", every_second(), |scope| async move {
///     scope.check_cancellation()?;
///     Ok(())
/// })
/// .with_timeout(Duration::from_secs(5));
/// ```
pub fn job_fn<F, Fut>(name: impl Into<String>, schedule: impl Schedule + 'static, action: F) -> FnJob
where
    F: Fn(CancellationScope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    FnJob {
        name: name.into(),
        schedule: Arc::new(schedule),
        action: Box::new(move |scope| action(scope).boxed()),
        timeout: None,
        serial: true,
        show_messages: true,
    }
}

/// Wrap an async closure as a one-off task for
/// [`JobManager::run_task`](crate::JobManager::run_task), named
/// `task_<uuid>`.
pub fn task_fn<F, Fut>(action: F) -> FnJob
where
    F: Fn(CancellationScope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    let name = format!("task_{}", ExecutionId::new().as_uuid().simple());
    job_fn(name, OnDemandSchedule, action)
}

impl FnJob {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_show_messages(mut self, show: bool) -> Self {
        self.show_messages = show;
        self
    }

    /// Replace the schedule with an already shared one.
    pub fn with_schedule(mut self, schedule: Arc<dyn Schedule>) -> Self {
        self.schedule = schedule;
        self
    }
}

#[async_trait]
impl Job for FnJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> Arc<dyn Schedule> {
        Arc::clone(&self.schedule)
    }

    async fn execute(&self, scope: CancellationScope) -> Result<(), JobError> {
        (self.action)(scope).await
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn show_messages(&self) -> bool {
        self.show_messages
    }

    fn serial(&self) -> bool {
        self.serial
    }
}

impl std::fmt::Debug for FnJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnJob")
            .field("name", &self.name)
            .field("schedule", &self.schedule.to_string())
            .field("timeout", &self.timeout)
            .field("serial", &self.serial)
            .field("show_messages", &self.show_messages)
            .finish()
    }
}
