use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Fallback text when an error body carries no readable message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Failed to move issue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    RateLimited,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::Validation,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

/// Error reported by the remote store, decoded from a non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?} ({status}): {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_status(status),
            status,
            message: message.into(),
        }
    }

    /// Builds an error from a raw response body. The message is looked up as
    /// `message`, then `error.message`, then `detail`, then the first field
    /// validation error; anything else falls back to a generic text.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|value| extract_message(&value))
            .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
        Self::new(status, message)
    }
}

fn extract_message(value: &Value) -> Option<String> {
    if let Some(message) = value.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(nested) = value.get("error") {
        if let Some(message) = extract_message(nested) {
            return Some(message);
        }
    }
    if let Some(detail) = value.get("detail").and_then(Value::as_str) {
        return Some(detail.to_string());
    }
    // DRF field errors: {"to_state_id": ["Cannot transition from A to B."]}
    value.as_object()?.values().find_map(|field| {
        field
            .as_array()
            .and_then(|items| items.first())
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}
