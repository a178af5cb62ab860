//! Error taxonomy shared by the device link, sessions, and adapters.

use thiserror::Error;

/// Result type alias for cast control operations.
pub type Result<T> = std::result::Result<T, CastError>;

/// Errors surfaced by connection management and command dispatch.
///
/// Transport faults (`Connect`) are handled centrally by the reconnect
/// supervisor. Everything else is scoped to the single command that
/// produced it and never affects other senders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastError {
    /// Transport could not be established (timeout, refusal, resolution).
    #[error("failed to connect to cast device: {0}")]
    Connect(String),

    /// Command issued while the device link is not connected.
    #[error("cast device is not connected")]
    NotConnected,

    /// Device rejected an operation.
    #[error("cast device rejected request: {0}")]
    Device(String),

    /// Media command issued with no bound receiver application.
    #[error("no receiver application is active for this sender")]
    NoActiveReceiver,

    /// Media command issued while nothing is loaded on the receiver.
    #[error("nothing is currently loaded on the receiver")]
    NotPlaying,

    /// Bound receiver cannot execute media commands.
    #[error("receiver application does not support this command")]
    UnsupportedReceiver,

    /// Adapter does not recognize the command shape.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Payload failed validation before any transport call.
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

impl CastError {
    /// Whether the error came from the transport rather than command state.
    pub fn is_transport(&self) -> bool {
        matches!(self, CastError::Connect(_) | CastError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::CastError;

    #[test]
    fn test_transport_classification() {
        assert!(CastError::Connect("refused".to_string()).is_transport());
        assert!(CastError::NotConnected.is_transport());
        assert!(!CastError::NotPlaying.is_transport());
        assert!(!CastError::MalformedCommand("volume".to_string()).is_transport());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = CastError::UnknownCommand("FOO".to_string());
        assert_eq!(err.to_string(), "unknown command: FOO");
    }
}
