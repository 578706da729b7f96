use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    /// The listener failed while handling an event.
    #[error("Listener failed: {0}")]
    ListenerFailed(String),

    /// The listener panicked; the panic was contained by the bus.
    #[error("Listener panicked: {0}")]
    ListenerPanicked(String),

    /// Writing an event to an output stream failed.
    #[error("Write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
