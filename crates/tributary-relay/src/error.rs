//! Error types for the relay domain.

use crate::run_key::RunKey;

/// The result type used throughout tributary-relay.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relay operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Conditional-write retries were exhausted while merging an output.
    ///
    /// Indicates pathological contention on the run's document; losing the
    /// output silently would corrupt completion detection, so this surfaces
    /// to the invocation boundary for redelivery.
    #[error("conflict retries exhausted after {attempts} attempts updating {path}")]
    ConflictExhausted {
        /// The document path under contention.
        path: String,
        /// How many merge attempts were made.
        attempts: usize,
    },

    /// The downstream notifier rejected or failed the completion call.
    #[error("downstream notification failed for {run}: {message}")]
    Notifier {
        /// The run whose completion could not be delivered.
        run: RunKey,
        /// Description of the failure.
        message: String,
    },

    /// An inbound event was missing required attributes or malformed.
    #[error("invalid event: {message}")]
    InvalidEvent {
        /// Description of what made the event invalid.
        message: String,
    },

    /// Configuration was rejected at startup.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Description of the rejected configuration.
        message: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from tributary-core.
    #[error("core error: {0}")]
    Core(#[from] tributary_core::Error),
}

impl Error {
    /// Creates a new invalid-event error.
    #[must_use]
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_exhausted_display() {
        let err = Error::ConflictExhausted {
            path: "Pipeline/run-1/output.json".into(),
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("Pipeline/run-1/output.json"));
    }
}
