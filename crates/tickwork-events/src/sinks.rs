use std::io::Write;
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::error::Result;
use crate::types::{EventFlag, EventSink, JobEvent};

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &JobEvent) {}
}

/// Writes events through `tracing`: fatal completions at error level, failed
/// or cancelled completions at warn, everything else at info.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &JobEvent) {
        let elapsed_ms = event.elapsed.map(|d| d.as_millis() as u64);
        match event.flag {
            EventFlag::Started => {
                info!(job = %event.job_name, execution = %event.execution_id, "job started")
            }
            _ if event.fatal => error!(
                job = %event.job_name,
                execution = %event.execution_id,
                elapsed_ms,
                error = event.error.as_deref().unwrap_or("panic"),
                "job panicked"
            ),
            _ if event.cancelled => warn!(
                job = %event.job_name,
                execution = %event.execution_id,
                elapsed_ms,
                "job cancelled"
            ),
            _ => match &event.error {
                Some(e) => warn!(
                    job = %event.job_name,
                    execution = %event.execution_id,
                    elapsed_ms,
                    error = %e,
                    "job failed"
                ),
                None => info!(
                    job = %event.job_name,
                    execution = %event.execution_id,
                    elapsed_ms,
                    "job completed"
                ),
            },
        }
    }
}

/// Writes each event as a single JSON line to the wrapped writer.
pub struct JsonSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn write_event(&self, event: &JobEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut out = self.out.lock().expect("json sink writer poisoned");
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().expect("json sink writer poisoned")
    }
}

impl<W: Write + Send> EventSink for JsonSink<W> {
    fn emit(&self, event: &JobEvent) {
        if let Err(e) = self.write_event(event) {
            warn!(job = %event.job_name, error = %e, "failed to write event");
        }
    }
}
