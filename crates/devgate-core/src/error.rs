use thiserror::Error;

/// Configuration and lifecycle errors shared across the workspace.
///
/// Per-frame failures (parse, process) and transport failures live in their
/// own crates; this type covers what is fatal at startup or onboarding time.
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors
    #[error("Duplicate protocol type registration: {0}")]
    DuplicateProtocolType(String),

    #[error("Duplicate route for device type {device_type} / manufacturer {manufacturer}")]
    DuplicateRoute {
        device_type: String,
        manufacturer: String,
    },

    #[error("No handler registered for protocol type {0}")]
    UnknownProtocolType(String),

    // Identity errors
    #[error("Invalid protocol type: {0}")]
    InvalidProtocolType(String),

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),

    // Lifecycle errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true for errors that must abort startup.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::DuplicateProtocolType(_)
                | Self::DuplicateRoute { .. }
                | Self::UnknownProtocolType(_)
                | Self::Config(_)
                | Self::MissingConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_errors_are_fatal() {
        assert!(Error::DuplicateProtocolType("X".into()).is_fatal_config());
        assert!(Error::UnknownProtocolType("X".into()).is_fatal_config());
        assert!(!Error::transition("COMPLETED", "RUNNING").is_fatal_config());
    }

    #[test]
    fn transition_error_message() {
        let err = Error::transition("COMPLETED", "RUNNING");
        assert_eq!(
            err.to_string(),
            "Invalid state transition from COMPLETED to RUNNING"
        );
    }
}
