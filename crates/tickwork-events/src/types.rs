use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tickwork_core::{duration::serde_opt_duration, ExecutionId};

/// Lifecycle points reported for an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFlag {
    /// The execution was dispatched; the job body is about to run.
    Started,
    /// The job body returned (successfully, with an error, or cancelled).
    Completed,
    /// The job body panicked. Always accompanies a `Completed` event.
    Fatal,
}

impl EventFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFlag::Started => "tickwork.started",
            EventFlag::Completed => "tickwork.completed",
            EventFlag::Fatal => "tickwork.fatal",
        }
    }
}

impl fmt::Display for EventFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification about one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub flag: EventFlag,
    pub job_name: String,
    pub execution_id: ExecutionId,
    /// Manager clock reading when the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Run time of the execution. Only set on completion.
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<Duration>,
    /// Failure message. Cancellation is reported through `cancelled`, never here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    /// Set when the job body panicked.
    #[serde(default)]
    pub fatal: bool,
}

impl JobEvent {
    pub fn started(
        job_name: impl Into<String>,
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            flag: EventFlag::Started,
            job_name: job_name.into(),
            execution_id,
            timestamp,
            elapsed: None,
            error: None,
            cancelled: false,
            fatal: false,
        }
    }

    pub fn completed(
        job_name: impl Into<String>,
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            flag: EventFlag::Completed,
            job_name: job_name.into(),
            execution_id,
            timestamp,
            elapsed: Some(elapsed),
            error: None,
            cancelled: false,
            fatal: false,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }

    pub fn with_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Whether a listener subscribed to `flag` should see this event.
    ///
    /// A fatal completion matches both `Completed` and `Fatal`.
    pub fn matches(&self, flag: EventFlag) -> bool {
        match flag {
            EventFlag::Fatal => self.fatal,
            other => self.flag == other,
        }
    }
}

/// Receives lifecycle events from the job manager.
///
/// Called from many tasks at once, so implementations must be `Send + Sync`.
/// `emit` runs on the task that owns the execution: keep it cheap.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &JobEvent);
}

/// A listener registered on an [`EventBus`](crate::EventBus).
pub trait EventListener: Send + Sync {
    fn handle(&self, event: &JobEvent) -> crate::error::Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&JobEvent) -> crate::error::Result<()> + Send + Sync,
{
    fn handle(&self, event: &JobEvent) -> crate::error::Result<()> {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        "2020-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn fatal_completion_matches_both_flags() {
        let ev = JobEvent::completed("job", ExecutionId::new(), at(), Duration::from_millis(5))
            .with_error("boom")
            .with_fatal();
        assert!(ev.matches(EventFlag::Completed));
        assert!(ev.matches(EventFlag::Fatal));
        assert!(!ev.matches(EventFlag::Started));
    }

    #[test]
    fn started_event_serializes_without_completion_fields() {
        let ev = JobEvent::started("job", ExecutionId::new(), at());
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""flag":"started""#));
        assert!(!json.contains("elapsed"));
        assert!(!json.contains(r#""error""#));
    }

    #[test]
    fn completed_event_carries_elapsed_as_duration_string() {
        let ev = JobEvent::completed("job", ExecutionId::new(), at(), Duration::from_millis(250));
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""elapsed":"250ms""#));
    }
}
