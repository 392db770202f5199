// ⚠️ Error Taxonomy - what can go wrong between the transport and the engine
//
// NotFound and InvalidArgument are caller problems. Everything else is an
// internal failure and carries whatever diagnostic the engine gave us.

use crate::engine::{
    EngineFailure, DATA_SOURCE_NOT_FOUND_CODE, ENTITY_NOT_FOUND_CODE, RECORD_NOT_FOUND_CODE,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Unknown data source, record id or entity id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed identifiers, out-of-range parameters, self-comparisons
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine answered with a non-zero return code
    #[error("Engine failure ({code}): {message}")]
    Engine { code: i64, message: String },

    /// The engine answered, but not in the documented payload shape
    #[error("Malformed engine payload: {0}")]
    MalformedPayload(String),

    /// Engine worker pool is unavailable (shut down or worker lost)
    #[error("Engine pool unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn not_found(message: impl Into<String>) -> Self {
        GatewayError::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        GatewayError::InvalidArgument(message.into())
    }

    /// HTTP status code used when this error reaches the transport
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::NotFound(_) => 404,
            GatewayError::InvalidArgument(_) => 400,
            GatewayError::Engine { .. }
            | GatewayError::MalformedPayload(_)
            | GatewayError::Unavailable(_) => 500,
        }
    }

    /// Engine return code, when the failure came from the engine
    pub fn engine_code(&self) -> Option<i64> {
        match self {
            GatewayError::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<EngineFailure> for GatewayError {
    fn from(failure: EngineFailure) -> Self {
        match failure.code {
            ENTITY_NOT_FOUND_CODE | RECORD_NOT_FOUND_CODE | DATA_SOURCE_NOT_FOUND_CODE => {
                GatewayError::NotFound(failure.message)
            }
            code => GatewayError::Engine {
                code,
                message: failure.message,
            },
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::MalformedPayload(err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

// ============================================================================
// TESTS
// ============================================================================
