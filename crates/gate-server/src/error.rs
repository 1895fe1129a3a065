use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// No identity, or a token the identity collaborator does not know.
    #[error("Authentication required")]
    Unauthenticated,

    /// A known identity asking for something it does not own.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Ticket already used")]
    AlreadyUsed,

    #[error("Ticket is void")]
    Void,

    #[error("Verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GateError::VerificationUnavailable(_))
    }
}

impl From<gatepass_sdk::SdkError> for GateError {
    fn from(e: gatepass_sdk::SdkError) -> Self {
        match e {
            gatepass_sdk::SdkError::InvalidInput(msg) => GateError::InvalidRequest(msg),
            gatepass_sdk::SdkError::Crypto(msg) => GateError::Crypto(msg),
            other => GateError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = match &self {
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GateError::Unauthorized(_) => StatusCode::FORBIDDEN,
            GateError::AlreadyUsed => StatusCode::CONFLICT,
            GateError::Void => StatusCode::CONFLICT,
            GateError::Conflict(_) => StatusCode::CONFLICT,
            GateError::VerificationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GateError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}
