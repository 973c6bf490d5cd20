//! Error types for resolution and probing.

use thiserror::Error;

/// Errors that end a trace before it reaches the tracing phase.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to resolve hostname {hostname}: {source}")]
    Resolve {
        hostname: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("No IP addresses found for hostname {0}")]
    NoAddresses(String),
}

/// Per-probe failures. These are absorbed into hop loss, never escalated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Transport(String),

    #[error("socket error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ProbeError::Timeout,
            _ => ProbeError::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_bare() {
        assert_eq!(ProbeError::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "late");
        assert_eq!(ProbeError::from(err), ProbeError::Timeout);

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(ProbeError::from(err), ProbeError::Io(_)));
    }

    #[test]
    fn test_no_addresses_names_host() {
        let err = TraceError::NoAddresses("example.test".into());
        assert!(err.to_string().contains("example.test"));
    }
}
