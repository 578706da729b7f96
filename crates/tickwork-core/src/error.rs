use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid duration `{input}`: {reason}")]
    InvalidDuration { input: String, reason: String },
}

impl CoreError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::InvalidDuration { .. } => "INVALID_DURATION",
        }
    }
}

impl From<figment::Error> for CoreError {
    fn from(e: figment::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
