//! Shared error types.

use serde::Deserialize;

/// Error body the backend returns for failed `/api/*` calls.
///
/// `detail` is a plain string for handled errors and a list of field
/// problems for request validation failures.
#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Attempt to pull a user-facing message out of an error body.
pub fn try_error_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    match parsed.detail {
        serde_json::Value::String(detail) if !detail.trim().is_empty() => Some(detail),
        serde_json::Value::Array(problems) => {
            let messages: Vec<&str> = problems
                .iter()
                .filter_map(|p| p.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}

/// API error type for client-side use.
///
/// `Clone` so a single failed fetch can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server could not be reached or the body could not be read.
    #[error("Network error: {0}")]
    Network(String),
    /// 401: missing or expired session, or a wrong password.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// 404 on a specific resource.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Rejected input, either locally before any request or by the server.
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Classify a non-success response.
    pub fn from_status(status: u16, body: String) -> Self {
        let detail = try_error_detail(&body).unwrap_or_else(|| body.clone());
        match status {
            401 => ApiError::Unauthorized(detail),
            404 => ApiError::NotFound(detail),
            400 | 422 => ApiError::Validation(detail),
            _ => ApiError::Http { status, body },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    /// Short text suitable for showing next to a form field.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized(detail)
            | ApiError::NotFound(detail)
            | ApiError::Validation(detail)
                if !detail.trim().is_empty() =>
            {
                detail.clone()
            }
            ApiError::Unauthorized(_) => "Not authorized".to_string(),
            ApiError::NotFound(_) => "Not found".to_string(),
            ApiError::Validation(_) => "Invalid input".to_string(),
            ApiError::Network(_) => "Could not reach the server".to_string(),
            ApiError::Http { status, .. } => format!("Server error ({status})"),
            ApiError::Deserialize(_) => "Unexpected response from the server".to_string(),
        }
    }
}
