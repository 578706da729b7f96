use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tickwork_core::{ExecutionId, SchedulerConfig};
use tickwork_events::{EventSink, JobEvent, LogSink};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationScope;
use crate::clock::{Clock, SystemClock};
use crate::error::{Cancelled, JobError, Result, SchedulerError};
use crate::job::Job;
use crate::schedule::Schedule;
use crate::status::{JobState, JobStatus};
use crate::task::TaskExecution;

/// Floor for loop periods; `tokio::time::interval` rejects zero.
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(1);

/// What [`JobManager::stop`] does with executions still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Stop scheduling only. Running executions finish on their own.
    #[default]
    Detach,
    /// Stop scheduling and wait for running executions to finish.
    Drain,
    /// Stop scheduling and cancel running executions without waiting.
    Cancel,
    /// Stop scheduling, cancel running executions and wait for them.
    CancelAndWait,
}

impl StopMode {
    fn cancels(self) -> bool {
        matches!(self, StopMode::Cancel | StopMode::CancelAndWait)
    }

    fn waits(self) -> bool {
        matches!(self, StopMode::Drain | StopMode::CancelAndWait)
    }
}

/// Registry and driver for scheduled jobs.
///
/// Cheap to clone; clones share one registry. Two background loops run once
/// [`start`](Self::start) is called: a dispatch loop firing due jobs every
/// heartbeat and a hang-kill loop cancelling executions that outlive their
/// timeout. Both passes are also exposed directly
/// ([`run_due_jobs`](Self::run_due_jobs), [`kill_hanging_jobs`](Self::kill_hanging_jobs))
/// so a [`FakeClock`](crate::FakeClock) can drive the manager step by step.
///
/// Dispatching spawns onto the current Tokio runtime, so `start`, `run_job`
/// and the two passes must be called from within one.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    // Lock order: loaded, disabled, running, next_runs, last_runs.
    // Job and schedule callbacks never run under these, except `Schedule::next`.
    loaded: RwLock<HashMap<String, LoadedJob>>,
    disabled: RwLock<HashSet<String>>,
    running: RwLock<HashMap<String, Vec<Arc<TaskExecution>>>>,
    next_runs: RwLock<HashMap<String, DateTime<Utc>>>,
    last_runs: RwLock<HashMap<String, DateTime<Utc>>>,
    loops: Mutex<Option<Loops>>,
    executions: TaskTracker,
}

struct LoadedJob {
    job: Arc<dyn Job>,
    schedule: Arc<dyn Schedule>,
}

struct Loops {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Registry entry copied out under the read locks.
struct Snapshot {
    name: String,
    job: Arc<dyn Job>,
    schedule: Arc<dyn Schedule>,
    disabled: bool,
    runs: Vec<Arc<TaskExecution>>,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
}

/// Configures a [`JobManager`].
pub struct JobManagerBuilder {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl Default for JobManagerBuilder {
    fn default() -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
            sink: Arc::new(LogSink),
        }
    }
}

impl JobManagerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> JobManager {
        JobManager {
            inner: Arc::new(Inner {
                config: self.config,
                clock: self.clock,
                sink: self.sink,
                loaded: RwLock::new(HashMap::new()),
                disabled: RwLock::new(HashSet::new()),
                running: RwLock::new(HashMap::new()),
                next_runs: RwLock::new(HashMap::new()),
                last_runs: RwLock::new(HashMap::new()),
                loops: Mutex::new(None),
                executions: TaskTracker::new(),
            }),
        }
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    /// System clock, [`LogSink`] and the environment-adjusted default config.
    pub fn new() -> Self {
        Self::builder().config(SchedulerConfig::from_env()).build()
    }

    pub fn builder() -> JobManagerBuilder {
        JobManagerBuilder::default()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    // --- registration ------------------------------------------------------

    pub fn load(&self, job: impl Job + 'static) -> Result<()> {
        self.load_shared(Arc::new(job))
    }

    /// Register a job and compute its first fire time.
    pub fn load_shared(&self, job: Arc<dyn Job>) -> Result<()> {
        let name = job.name().to_string();
        if name.is_empty() {
            return Err(SchedulerError::EmptyName);
        }
        let schedule = job.schedule();

        let next = {
            let mut loaded = write(&self.inner.loaded);
            if loaded.contains_key(&name) {
                return Err(SchedulerError::AlreadyLoaded { name });
            }
            let mut next_runs = write(&self.inner.next_runs);
            let next = self.next_fire(&name, &schedule, None);
            loaded.insert(
                name.clone(),
                LoadedJob {
                    job,
                    schedule: Arc::clone(&schedule),
                },
            );
            set_or_clear(&mut next_runs, &name, next);
            next
        };

        info!(job = %name, schedule = %schedule, next_run = ?next, "job loaded");
        Ok(())
    }

    /// Load several jobs, stopping at the first failure.
    pub fn load_jobs<I>(&self, jobs: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Job>>,
    {
        jobs.into_iter().try_for_each(|job| self.load_shared(job))
    }

    /// Forget a job. A running execution is not cancelled; it finishes
    /// without reporting to the event sink.
    pub fn unload(&self, name: &str) -> Result<()> {
        let orphaned = {
            let mut loaded = write(&self.inner.loaded);
            if !loaded.contains_key(name) {
                return Err(SchedulerError::not_loaded(name));
            }
            let mut disabled = write(&self.inner.disabled);
            let mut running = write(&self.inner.running);
            let mut next_runs = write(&self.inner.next_runs);
            let mut last_runs = write(&self.inner.last_runs);

            loaded.remove(name);
            disabled.remove(name);
            next_runs.remove(name);
            last_runs.remove(name);
            running.remove(name).map_or(0, |runs| runs.len())
        };

        info!(job = %name, in_flight = orphaned, "job unloaded");
        Ok(())
    }

    /// Re-enable a disabled job, recomputing its next fire as if just loaded.
    /// Enabling an enabled job changes nothing.
    pub fn enable(&self, name: &str) -> Result<()> {
        let next = {
            let loaded = read(&self.inner.loaded);
            let entry = loaded
                .get(name)
                .ok_or_else(|| SchedulerError::not_loaded(name))?;
            let mut disabled = write(&self.inner.disabled);
            if !disabled.remove(name) {
                return Ok(());
            }
            let mut next_runs = write(&self.inner.next_runs);
            let next = self.next_fire(name, &entry.schedule, None);
            set_or_clear(&mut next_runs, name, next);
            next
        };

        info!(job = %name, next_run = ?next, "job enabled");
        Ok(())
    }

    /// Stop scheduling a job. Running executions are left alone.
    pub fn disable(&self, name: &str) -> Result<()> {
        let newly_disabled = {
            let loaded = read(&self.inner.loaded);
            if !loaded.contains_key(name) {
                return Err(SchedulerError::not_loaded(name));
            }
            let mut disabled = write(&self.inner.disabled);
            let mut next_runs = write(&self.inner.next_runs);
            next_runs.remove(name);
            disabled.insert(name.to_string())
        };

        if newly_disabled {
            info!(job = %name, "job disabled");
        }
        Ok(())
    }

    // --- execution ---------------------------------------------------------

    /// Start an execution now, regardless of schedule. Returns once the run
    /// is dispatched, not when it finishes.
    pub fn run_job(&self, name: &str) -> Result<ExecutionId> {
        let job = read(&self.inner.loaded)
            .get(name)
            .map(|entry| Arc::clone(&entry.job))
            .ok_or_else(|| SchedulerError::not_loaded(name))?;
        let (serial, show_messages) = capabilities(name, &job);

        let execution = self.begin(name, None, serial)?;
        let id = execution.id();
        info!(job = %name, execution = %id, "job run requested");
        self.launch(execution, show_messages);
        Ok(id)
    }

    /// Run a job that is not loaded, once, through the same execution path
    /// as scheduled runs: hooks, events, cancellation and the hang-kill loop
    /// all apply. Its schedule is ignored.
    ///
    /// While it runs, [`cancel`](Self::cancel) and
    /// [`is_running`](Self::is_running) accept its name. It never appears in
    /// [`status`](Self::status) and leaves no last-run time behind.
    pub fn run_task(&self, task: impl Job + 'static) -> Result<ExecutionId> {
        self.run_shared_task(Arc::new(task))
    }

    pub fn run_shared_task(&self, task: Arc<dyn Job>) -> Result<ExecutionId> {
        let name = task.name().to_string();
        if name.is_empty() {
            return Err(SchedulerError::EmptyName);
        }
        let (serial, show_messages) = capabilities(&name, &task);

        let execution = self.begin(&name, Some(&task), serial)?;
        let id = execution.id();
        info!(task = %name, execution = %id, "task run requested");
        self.launch(execution, show_messages);
        Ok(id)
    }

    /// Force a run of every enabled job, in name order. Serial jobs that are
    /// already running are skipped. Returns the number started.
    pub fn run_all_jobs(&self) -> usize {
        let mut names: Vec<String> = {
            let loaded = read(&self.inner.loaded);
            let disabled = read(&self.inner.disabled);
            loaded
                .keys()
                .filter(|name| !disabled.contains(*name))
                .cloned()
                .collect()
        };
        names.sort();

        names
            .iter()
            .filter(|name| match self.run_job(name) {
                Ok(_) => true,
                Err(e) => {
                    debug!(job = %name, error = %e, "skipping forced run");
                    false
                }
            })
            .count()
    }

    /// Signal cancellation to every in-flight execution of `name`.
    pub fn cancel(&self, name: &str) -> Result<()> {
        let scopes: Vec<CancellationScope> = read(&self.inner.running)
            .get(name)
            .map(|runs| runs.iter().map(|run| run.scope().clone()).collect())
            .unwrap_or_default();
        if scopes.is_empty() {
            return Err(SchedulerError::NotRunning {
                name: name.to_string(),
            });
        }

        for scope in &scopes {
            scope.cancel();
        }
        info!(job = %name, executions = scopes.len(), "cancellation requested");
        Ok(())
    }

    /// Signal cancellation to every in-flight execution. Returns how many
    /// were signalled.
    pub fn cancel_all(&self) -> usize {
        let scopes: Vec<CancellationScope> = read(&self.inner.running)
            .values()
            .flatten()
            .map(|run| run.scope().clone())
            .collect();
        for scope in &scopes {
            scope.cancel();
        }
        scopes.len()
    }

    /// One dispatch pass: start every enabled job whose next fire is due.
    ///
    /// The next fire is advanced before dispatch, so a serial job that is
    /// still running drops the fire instead of queueing it. Returns the
    /// number of executions started.
    pub fn run_due_jobs(&self) -> usize {
        let now = self.inner.clock.now();

        let due: Vec<(String, Arc<dyn Job>)> = {
            let loaded = read(&self.inner.loaded);
            let disabled = read(&self.inner.disabled);
            let mut next_runs = write(&self.inner.next_runs);

            let mut due = Vec::new();
            for (name, entry) in loaded.iter() {
                if disabled.contains(name) {
                    continue;
                }
                match next_runs.get(name) {
                    Some(at) if *at <= now => {}
                    _ => continue,
                }
                let next = self.next_fire(name, &entry.schedule, Some(now));
                set_or_clear(&mut next_runs, name, next);
                due.push((name.clone(), Arc::clone(&entry.job)));
            }
            due
        };

        let mut started = 0;
        for (name, job) in due {
            let (serial, show_messages) = capabilities(&name, &job);
            match self.begin(&name, None, serial) {
                Ok(execution) => {
                    debug!(job = %name, execution = %execution.id(), "dispatching due job");
                    self.launch(execution, show_messages);
                    started += 1;
                }
                Err(SchedulerError::AlreadyRunning { .. }) => {
                    debug!(job = %name, "still running; dropping scheduled fire");
                }
                Err(e) => debug!(job = %name, error = %e, "skipping due job"),
            }
        }
        started
    }

    /// One hang-kill pass: cancel every execution that has run at least as
    /// long as its job's timeout. Returns how many were cancelled.
    pub fn kill_hanging_jobs(&self) -> usize {
        let now = self.inner.clock.now();
        let runs: Vec<Arc<TaskExecution>> = read(&self.inner.running)
            .values()
            .flatten()
            .cloned()
            .collect();

        let mut killed = 0;
        for run in runs {
            if run.is_cancelling() || run.is_finished() {
                continue;
            }
            let timeout = guard_capability(run.job_name(), "timeout", None, || run.job().timeout());
            let Some(timeout) = timeout else {
                continue;
            };
            let elapsed = run.elapsed(now);
            if elapsed >= timeout {
                warn!(
                    job = %run.job_name(),
                    execution = %run.id(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "execution exceeded timeout; cancelling"
                );
                run.scope().cancel();
                killed += 1;
            }
        }
        killed
    }

    // --- introspection -----------------------------------------------------

    /// Snapshot of every loaded job, sorted by name.
    pub fn status(&self) -> Vec<JobStatus> {
        let now = self.inner.clock.now();
        let mut statuses: Vec<JobStatus> = self
            .snapshot(None)
            .into_iter()
            .map(|entry| entry.into_status(now))
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn job_status(&self, name: &str) -> Option<JobStatus> {
        let now = self.inner.clock.now();
        self.snapshot(Some(name))
            .into_iter()
            .next()
            .map(|entry| entry.into_status(now))
    }

    pub fn has_job(&self, name: &str) -> bool {
        read(&self.inner.loaded).contains_key(name)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        read(&self.inner.disabled).contains(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        read(&self.inner.running)
            .get(name)
            .is_some_and(|runs| !runs.is_empty())
    }

    /// Names of all loaded jobs, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.inner.loaded).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        read(&self.inner.next_runs).get(name).copied()
    }

    pub fn last_run(&self, name: &str) -> Option<DateTime<Utc>> {
        read(&self.inner.last_runs).get(name).copied()
    }

    // --- lifecycle ---------------------------------------------------------

    /// Spawn the dispatch and hang-kill loops. Calling it again while they
    /// run does nothing.
    pub fn start(&self) {
        let mut loops = self.inner.loops.lock().unwrap_or_else(PoisonError::into_inner);
        if loops.is_some() {
            debug!("job manager already started");
            return;
        }

        let heartbeat = self.inner.config.effective_heartbeat();
        let hang_heartbeat = self.inner.config.hang_heartbeat_interval;
        let (shutdown, rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);

        let handles = vec![
            tokio::spawn(run_loop("dispatch", Weak::clone(&weak), heartbeat, rx.clone(), dispatch_pass)),
            tokio::spawn(run_loop("hang-kill", weak, hang_heartbeat, rx, hang_kill_pass)),
        ];
        *loops = Some(Loops { shutdown, handles });

        info!(
            heartbeat_ms = heartbeat.as_millis() as u64,
            hang_heartbeat_ms = hang_heartbeat.as_millis() as u64,
            "job manager started"
        );
    }

    pub fn is_started(&self) -> bool {
        self.inner
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the background loops, then deal with in-flight executions as
    /// `mode` says. Safe to call repeatedly.
    ///
    /// Waiting honours `stop_timeout` from the config and fails with
    /// [`SchedulerError::StopTimeout`] when it runs out.
    pub async fn stop(&self, mode: StopMode) -> Result<()> {
        let loops = self
            .inner
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(loops) = loops {
            let _ = loops.shutdown.send(true);
            for handle in loops.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "scheduler loop ended abnormally");
                }
            }
            info!(?mode, "job manager stopped");
        }

        if mode.cancels() {
            let cancelled = self.cancel_all();
            if cancelled > 0 {
                info!(executions = cancelled, "cancelled in-flight executions");
            }
        }
        if mode.waits() {
            self.wait_for_executions().await?;
        }
        Ok(())
    }

    async fn wait_for_executions(&self) -> Result<()> {
        let tracker = &self.inner.executions;
        tracker.close();
        let outcome = match self.inner.config.stop_timeout {
            Some(limit) => tokio::time::timeout(limit, tracker.wait())
                .await
                .map_err(|_| SchedulerError::StopTimeout {
                    ms: limit.as_millis() as u64,
                }),
            None => {
                tracker.wait().await;
                Ok(())
            }
        };
        tracker.reopen();
        outcome
    }

    // --- private helpers ---------------------------------------------------

    /// Evaluate a schedule. A panicking schedule is treated as exhausted.
    fn next_fire(
        &self,
        name: &str,
        schedule: &Arc<dyn Schedule>,
        after: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let clock = self.inner.clock.as_ref();
        catch_unwind(AssertUnwindSafe(|| schedule.next(clock, after))).unwrap_or_else(|payload| {
            error!(job = %name, panic = %panic_message(payload.as_ref()), "schedule panicked; job will not fire");
            None
        })
    }

    /// Register a new execution record, enforcing the serial rule.
    ///
    /// `task` is `None` for loaded jobs. An unloaded task must not share its
    /// name with a loaded job.
    fn begin(
        &self,
        name: &str,
        task: Option<&Arc<dyn Job>>,
        serial: bool,
    ) -> Result<Arc<TaskExecution>> {
        let now = self.inner.clock.now();

        let loaded = read(&self.inner.loaded);
        let job = match (loaded.get(name), task) {
            (Some(entry), None) => {
                if read(&self.inner.disabled).contains(name) {
                    return Err(SchedulerError::Disabled {
                        name: name.to_string(),
                    });
                }
                Arc::clone(&entry.job)
            }
            (None, Some(task)) => Arc::clone(task),
            (Some(_), Some(_)) => {
                return Err(SchedulerError::AlreadyLoaded {
                    name: name.to_string(),
                })
            }
            (None, None) => return Err(SchedulerError::not_loaded(name)),
        };
        let mut running = write(&self.inner.running);
        if serial && running.get(name).is_some_and(|runs| !runs.is_empty()) {
            return Err(SchedulerError::AlreadyRunning {
                name: name.to_string(),
            });
        }

        let execution = Arc::new(TaskExecution::new(name, job, now));
        running
            .entry(name.to_string())
            .or_default()
            .push(Arc::clone(&execution));
        if task.is_none() {
            write(&self.inner.last_runs).insert(name.to_string(), now);
        }
        Ok(execution)
    }

    /// Run the start hook, announce the execution and spawn the job body.
    ///
    /// If anything here unwinds before the body is spawned, the record
    /// registered by `begin` is dropped again.
    fn launch(&self, execution: Arc<TaskExecution>, show_messages: bool) {
        let pending = PendingLaunch {
            manager: self,
            execution: Some(Arc::clone(&execution)),
        };
        let job = Arc::clone(execution.job());
        let name = execution.job_name();

        guard_hook(name, "on_start", || job.on_start());
        if show_messages {
            self.emit(&JobEvent::started(name, execution.id(), execution.started_at()));
        }

        let manager = self.clone();
        self.inner
            .executions
            .spawn(manager.run_execution(execution, show_messages));
        pending.disarm();
    }

    async fn run_execution(self, execution: Arc<TaskExecution>, show_messages: bool) {
        let job = Arc::clone(execution.job());
        let name = execution.job_name();

        let body = Arc::clone(&job);
        let scope = execution.scope().clone();
        let outcome = AssertUnwindSafe(async move { body.execute(scope).await })
            .catch_unwind()
            .await;

        let (error, fatal) = match outcome {
            Ok(Ok(())) => (None, false),
            Ok(Err(e)) => (Some(e), false),
            Err(payload) if payload.is::<Cancelled>() => (Some(JobError::Cancelled), false),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(job = %name, execution = %execution.id(), panic = %message, "job panicked");
                (Some(JobError::Panicked(message)), true)
            }
        };

        let cancelled = error.as_ref().is_some_and(JobError::is_cancelled);
        if cancelled {
            guard_hook(name, "on_cancellation", || job.on_cancellation());
        }
        guard_hook(name, "on_complete", || job.on_complete(error.as_ref()));

        let finished_at = self.inner.clock.now();
        let elapsed = execution.elapsed(finished_at);
        let tracked = self.clear(&execution);
        execution.mark_finished();

        if tracked && show_messages {
            let mut event = JobEvent::completed(name, execution.id(), finished_at, elapsed);
            match &error {
                Some(JobError::Cancelled) => event = event.with_cancelled(),
                Some(e) => event = event.with_error(e.to_string()),
                None => {}
            }
            if fatal {
                event = event.with_fatal();
            }
            self.emit(&event);
        }

        debug!(
            job = %name,
            execution = %execution.id(),
            elapsed_ms = elapsed.as_millis() as u64,
            cancelled,
            failed = error.is_some(),
            tracked,
            "execution finished"
        );
    }

    /// Drop an execution record. False when it was already gone (unloaded).
    fn clear(&self, execution: &Arc<TaskExecution>) -> bool {
        let mut running = write(&self.inner.running);
        let Some(runs) = running.get_mut(execution.job_name()) else {
            return false;
        };
        let before = runs.len();
        runs.retain(|run| !Arc::ptr_eq(run, execution));
        let removed = runs.len() < before;
        if runs.is_empty() {
            running.remove(execution.job_name());
        }
        removed
    }

    fn emit(&self, event: &JobEvent) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.inner.sink.emit(event))) {
            warn!(
                job = %event.job_name,
                flag = %event.flag,
                panic = %panic_message(payload.as_ref()),
                "event sink panicked"
            );
        }
    }

    fn snapshot(&self, only: Option<&str>) -> Vec<Snapshot> {
        let loaded = read(&self.inner.loaded);
        let disabled = read(&self.inner.disabled);
        let running = read(&self.inner.running);
        let next_runs = read(&self.inner.next_runs);
        let last_runs = read(&self.inner.last_runs);

        let entries: Vec<(&String, &LoadedJob)> = match only {
            Some(name) => loaded.get_key_value(name).into_iter().collect(),
            None => loaded.iter().collect(),
        };
        entries
            .into_iter()
            .map(|(name, entry)| Snapshot {
                name: name.clone(),
                job: Arc::clone(&entry.job),
                schedule: Arc::clone(&entry.schedule),
                disabled: disabled.contains(name),
                runs: running.get(name).cloned().unwrap_or_default(),
                next_run: next_runs.get(name).copied(),
                last_run: last_runs.get(name).copied(),
            })
            .collect()
    }
}

/// Clears an execution record on drop unless disarmed.
struct PendingLaunch<'a> {
    manager: &'a JobManager,
    execution: Option<Arc<TaskExecution>>,
}

impl PendingLaunch<'_> {
    fn disarm(mut self) {
        self.execution = None;
    }
}

impl Drop for PendingLaunch<'_> {
    fn drop(&mut self) {
        if let Some(execution) = self.execution.take() {
            self.manager.clear(&execution);
            execution.mark_finished();
            error!(job = %execution.job_name(), execution = %execution.id(), "execution failed to launch");
        }
    }
}

impl Snapshot {
    /// Finish the status record outside the locks; this calls into the job.
    fn into_status(self, now: DateTime<Utc>) -> JobStatus {
        let state = if self.runs.is_empty() {
            if self.disabled {
                JobState::IdleDisabled
            } else {
                JobState::IdleEnabled
            }
        } else if self.runs.iter().all(|run| run.is_cancelling()) {
            JobState::RunningCancelling
        } else {
            JobState::Running
        };
        let running_for = self
            .runs
            .iter()
            .map(|run| run.started_at())
            .min()
            .map(|started| (now - started).to_std().unwrap_or_default());
        let status = catch_unwind(AssertUnwindSafe(|| self.job.status())).unwrap_or_else(|_| {
            warn!(job = %self.name, "job status callback panicked");
            None
        });

        JobStatus {
            schedule: self.schedule.to_string(),
            state,
            disabled: self.disabled,
            last_run: self.last_run,
            next_run: self.next_run,
            running_for,
            executions: self.runs.len(),
            status,
            name: self.name,
        }
    }
}

async fn run_loop(
    label: &'static str,
    inner: Weak<Inner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    pass: fn(&JobManager),
) {
    let mut interval = tokio::time::interval(period.max(MIN_LOOP_PERIOD));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(loop_name = label, "scheduler loop running");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let manager = JobManager { inner };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| pass(&manager))) {
                    error!(
                        loop_name = label,
                        panic = %panic_message(payload.as_ref()),
                        "scheduler pass panicked"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(loop_name = label, "scheduler loop exited");
}

fn dispatch_pass(manager: &JobManager) {
    manager.run_due_jobs();
}

fn hang_kill_pass(manager: &JobManager) {
    manager.kill_hanging_jobs();
}

/// Read `serial` and `show_messages` before a run is registered.
fn capabilities(name: &str, job: &Arc<dyn Job>) -> (bool, bool) {
    let serial = guard_capability(name, "serial", true, || job.serial());
    let show_messages = guard_capability(name, "show_messages", true, || job.show_messages());
    (serial, show_messages)
}

/// Evaluate a job capability, falling back to `default` if it panics.
fn guard_capability<T>(name: &str, capability: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        warn!(
            job = %name,
            capability,
            panic = %panic_message(payload.as_ref()),
            "job capability panicked; using default"
        );
        default
    })
}

fn guard_hook(name: &str, hook: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        warn!(job = %name, hook, panic = %panic_message(payload.as_ref()), "job hook panicked");
    }
}

fn set_or_clear(
    next_runs: &mut HashMap<String, DateTime<Utc>>,
    name: &str,
    next: Option<DateTime<Utc>>,
) {
    match next {
        Some(at) => {
            next_runs.insert(name.to_string(), at);
        }
        None => {
            next_runs.remove(name);
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
