//! Saga error taxonomy and the handler response envelope.

use draco_events::{EventError, EventType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::bus::BusError;
use crate::keys::KeyError;
use crate::orchestrator::OrchestratorError;
use crate::provider::ProviderError;
use crate::saga::{Role, StepOutcome};

/// Errors raised while handling one saga message.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Malformed or unrecognised input; fatal to the invocation.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("key provisioning failed: {0}")]
    Key(#[from] KeyError),

    #[error("publish failed: {0}")]
    Bus(#[from] BusError),

    #[error("could not start completion wait: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// The role has no transition for this event type.
    #[error("{role} does not handle {event_type}")]
    Unhandled { role: Role, event_type: EventType },
}

impl From<EventError> for SagaError {
    fn from(err: EventError) -> Self {
        SagaError::Validation(err.to_string())
    }
}

impl SagaError {
    pub fn missing(field: &str) -> Self {
        SagaError::Validation(format!("missing {field}"))
    }

    /// Status reported back to the transport.
    ///
    /// Unhandled events are acknowledged so the platform does not redeliver them.
    pub fn status_code(&self) -> u16 {
        match self {
            SagaError::Unhandled { .. } => 200,
            _ => 500,
        }
    }
}

/// What a handler returns to its invoker, whatever happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

impl HandlerResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn failed(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            body: serde_json::Value::String(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn from_result(result: Result<StepOutcome, SagaError>) -> Self {
        match result {
            Ok(outcome) => Self::ok(serde_json::to_value(&outcome).unwrap_or_default()),
            Err(err @ SagaError::Unhandled { .. }) => {
                Self::failed(err.status_code(), format!("Event not handled: {err}"))
            }
            Err(err) => {
                error!(error = %err, "Saga step failed");
                Self::failed(err.status_code(), err.to_string())
            }
        }
    }
}
