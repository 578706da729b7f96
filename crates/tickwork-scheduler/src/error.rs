use thiserror::Error;

/// Failures returned by registration and lifecycle calls on the job manager.
///
/// None of these mutate manager state: the call either fully applies or
/// returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Jobs must have a non-empty name.
    #[error("Job name must not be empty")]
    EmptyName,

    /// No job with the given name is loaded.
    #[error("Job not loaded: {name}")]
    NotLoaded { name: String },

    /// A job with the given name is already loaded.
    #[error("Job already loaded: {name}")]
    AlreadyLoaded { name: String },

    /// An explicit run was requested for a disabled job.
    #[error("Job disabled: {name}")]
    Disabled { name: String },

    /// A serial job was asked to run while an execution is in flight.
    #[error("Job already running: {name}")]
    AlreadyRunning { name: String },

    /// Cancellation was requested for a job with no execution in flight.
    #[error("Job not running: {name}")]
    NotRunning { name: String },

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A waiting stop gave up before every execution finished.
    #[error("Stop timed out after {ms}ms")]
    StopTimeout { ms: u64 },
}

impl SchedulerError {
    /// Short, stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::EmptyName => "EMPTY_NAME",
            SchedulerError::NotLoaded { .. } => "NOT_LOADED",
            SchedulerError::AlreadyLoaded { .. } => "ALREADY_LOADED",
            SchedulerError::Disabled { .. } => "DISABLED",
            SchedulerError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            SchedulerError::NotRunning { .. } => "NOT_RUNNING",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::StopTimeout { .. } => "STOP_TIMEOUT",
        }
    }

    pub(crate) fn not_loaded(name: &str) -> Self {
        SchedulerError::NotLoaded {
            name: name.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// The distinguished cancellation failure.
///
/// Returned by [`CancellationScope::check_cancellation`](crate::CancellationScope::check_cancellation)
/// and propagated with `?`. A job may also unwind with
/// `std::panic::panic_any(Cancelled)`; the manager treats both the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job cancelled")]
pub struct Cancelled;

/// What a job body returns when it does not succeed.
#[derive(Debug, Error)]
pub enum JobError {
    /// The execution observed its cancellation scope and stopped.
    #[error("job cancelled")]
    Cancelled,

    /// The job reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The job body panicked; the payload message is preserved.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// Any other error source.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    pub fn other(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        JobError::Other(source.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, JobError::Panicked(_))
    }
}

impl From<Cancelled> for JobError {
    fn from(_: Cancelled) -> Self {
        JobError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(cancelled: bool) -> std::result::Result<(), JobError> {
        if cancelled {
            Err(Cancelled)?;
        }
        Ok(())
    }

    #[test]
    fn cancelled_converts_with_question_mark() {
        assert!(checked(false).is_ok());
        assert!(checked(true).unwrap_err().is_cancelled());
    }

    #[test]
    fn other_wraps_foreign_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = JobError::other(io);
        assert_eq!(err.to_string(), "disk on fire");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(SchedulerError::not_loaded("x").code(), "NOT_LOADED");
        assert_eq!(
            SchedulerError::AlreadyRunning { name: "x".into() }.to_string(),
            "Job already running: x"
        );
    }
}
