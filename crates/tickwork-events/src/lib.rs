//! `tickwork-events`: the observer side of the job manager.
//!
//! The manager reports every execution to one [`EventSink`]. Sinks receive a
//! `started` event before the job body runs and a `completed` event after it
//! returns, in that order, from whichever task ran the job.
//!
//! | Sink         | Behaviour                                             |
//! |--------------|-------------------------------------------------------|
//! | [`EventBus`] | Fans out to named listeners filtered by event flag    |
//! | [`LogSink`]  | Writes each event through `tracing`                   |
//! | [`JsonSink`] | Writes each event as one JSON line                    |
//! | [`NoopSink`] | Discards everything                                   |

pub mod engine;
pub mod error;
pub mod sinks;
pub mod types;

pub use engine::{EventBus, ListenerDefinition};
pub use error::{EventError, Result};
pub use sinks::{JsonSink, LogSink, NoopSink};
pub use types::{EventFlag, EventListener, EventSink, JobEvent};
