//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when decoding or normalising events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The envelope or subject is not one this system understands.
    #[error("unrecognized input: {0}")]
    UnrecognizedInput(String),

    /// The event type tag is unknown.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The snapshot type tag is unknown.
    #[error("unknown snapshot type: {0}")]
    UnknownSnapshotType(String),

    /// An arn could not be parsed.
    #[error("invalid arn '{arn}': {message}")]
    InvalidArn { arn: String, message: String },

    /// The event payload is invalid.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EventError {
    /// Returns true if the input was rejected before any payload was decoded.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, EventError::UnrecognizedInput(_))
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
