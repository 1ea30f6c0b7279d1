use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced by the scheduling engine.
///
/// Reservation and booking errors describe a real outcome (someone else got
/// the slot, the hold lapsed, the payment was declined) and are never retried
/// automatically. Callers re-query availability instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed rule/slot input, rejected before touching storage
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A state-machine guard failed
    #[error("{0}")]
    Conflict(String),

    /// A reservation or reschedule request passed its deadline
    #[error("{0}")]
    Expired(String),

    #[error("payment did not complete, slot released: {0}")]
    PaymentFailed(String),

    /// Outside the allowed window, or an unauthorized actor
    #[error("{0}")]
    Policy(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// The conflict every caller sees when a slot moved out from under them.
    pub fn slot_unavailable() -> Self {
        EngineError::Conflict("this slot was just taken, please choose another".to_string())
    }

    /// The slot is held for a booking that is waiting on a reschedule decision.
    pub fn held_for_reschedule() -> Self {
        EngineError::Conflict("slot is held by a pending reschedule request".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Expired(_) => StatusCode::GONE,
            EngineError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            EngineError::Policy(_) => StatusCode::FORBIDDEN,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::Expired(_) => "expired",
            EngineError::PaymentFailed(_) => "payment_failed",
            EngineError::Policy(_) => "policy_error",
            EngineError::Storage(_) => "storage_error",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", self.kind(), self);
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
