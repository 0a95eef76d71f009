use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in the environment or .env file")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("vehicle {0} not found")]
    VehicleNotFound(String),
    #[error("vehicle {0} is currently unavailable")]
    VehicleUnavailable(String),
    #[error("booking {0} not found")]
    BookingNotFound(String),
    #[error("booking must cover at least one day")]
    InvalidDays,
    #[error("booking {0} is already paid")]
    AlreadyPaid(String),
    #[error("booking {0} is cancelled")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("payment provider response invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Errors that cross the HTTP boundary. Signature failure details are never returned.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden")]
    Forbidden,
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                AppError::Unauthorized(err.to_string())
            }
            WebhookError::Malformed(msg) => AppError::BadRequest(msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Unauthorized(_) => "Invalid signature".to_string(),
            AppError::Forbidden => "Forbidden".to_string(),
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": message }))
    }
}
