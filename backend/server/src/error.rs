use axum::http::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("can't receive non-JSON content")]
    NonJsonContent,

    #[error("content-length header required")]
    LengthRequired,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("JSON request missing key: {0}")]
    MissingField(&'static str),

    #[error("request from the future: conn_init {conn_init} is after {now}")]
    FutureTimestamp { conn_init: i64, now: i64 },

    #[error("missing token")]
    MissingToken,

    #[error("token expired at {expired_at}")]
    ExpiredToken { expired_at: i64 },

    #[error("token never registered")]
    NeverRegistered,

    #[error("bad verb: {0}")]
    BadVerb(String),

    #[error("internal error, diagnostic id {id}")]
    HandlerFault { id: String },

    #[error("{message}")]
    Handler { status: StatusCode, message: String },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NonJsonContent
            | AppError::MalformedPayload(_)
            | AppError::MissingField(_) => StatusCode::BAD_REQUEST,
            AppError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            AppError::FutureTimestamp { .. } => StatusCode::NOT_ACCEPTABLE,
            AppError::MissingToken
            | AppError::ExpiredToken { .. }
            | AppError::NeverRegistered => StatusCode::UNAUTHORIZED,
            AppError::BadVerb(_) | AppError::HandlerFault { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Handler { status, .. } => *status,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NonJsonContent => "non_json_content",
            AppError::LengthRequired => "length_required",
            AppError::MalformedPayload(_) => "malformed_payload",
            AppError::MissingField(_) => "missing_field",
            AppError::FutureTimestamp { .. } => "future_timestamp",
            AppError::MissingToken => "missing_token",
            AppError::ExpiredToken { .. } => "expired_token",
            AppError::NeverRegistered => "never_registered",
            AppError::BadVerb(_) => "bad_verb",
            AppError::HandlerFault { .. } => "internal_error",
            AppError::Handler { .. } => "handler_error",
        }
    }

    /// Error object placed in the response envelope's `data`.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "error": self.kind(),
            "explanation": self.to_string(),
        });

        if let AppError::ExpiredToken { expired_at } = self {
            body["expired_at"] = json!(expired_at);
        }

        body
    }
}
