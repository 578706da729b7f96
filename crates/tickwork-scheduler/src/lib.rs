//! `tickwork-scheduler`: in-process job scheduling with cooperative
//! cancellation.
//!
//! # Overview
//!
//! A [`JobManager`] holds named [`Job`]s, each paired with a [`Schedule`].
//! Once started, a dispatch loop fires due jobs every heartbeat (50 ms by
//! default) and a hang-kill loop cancels executions that outlive their
//! timeout. Each execution runs on its own Tokio task with a fresh
//! [`CancellationScope`]; the job body observes it cooperatively.
//!
//! # Execution lifecycle
//!
//! | Step | What happens                                                  |
//! |------|---------------------------------------------------------------|
//! | 1    | Execution record registered; last-run time updated           |
//! | 2    | `on_start` hook, then a `started` event                       |
//! | 3    | Job body runs on a spawned task; panics are caught            |
//! | 4    | `on_cancellation` (if cancelled), then `on_complete`          |
//! | 5    | Record cleared, then a `completed` event                      |
//!
//! Serial jobs (the default) never overlap: a fire that comes due while the
//! previous run is still going is dropped, not queued.
//!
//! [`JobManager::run_task`] pushes an unloaded job (see [`task_fn`]) through
//! the same lifecycle once.

pub mod cancel;
pub mod clock;
pub mod error;
pub mod job;
pub mod manager;
pub mod schedule;
pub mod status;
pub mod task;

pub use cancel::CancellationScope;
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{Cancelled, JobError, Result, SchedulerError};
pub use job::{job_fn, task_fn, FnJob, Job};
pub use manager::{JobManager, JobManagerBuilder, StopMode};
pub use schedule::{Schedule, ScheduleSpec};
pub use status::{JobState, JobStatus};
pub use task::TaskExecution;
