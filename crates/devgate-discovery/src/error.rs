use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid network range {range:?}: {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("Range covers {count} hosts, limit is {max}")]
    TooManyHosts { count: u64, max: usize },

    #[error("Preflight failed: {0}")]
    Preflight(String),

    #[error("Discovery task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    pub fn invalid_range(range: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            range: range.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
