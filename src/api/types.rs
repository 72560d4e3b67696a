//! Wire envelope and normalized error types for the API pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message shown when no response was received at all.
pub const NETWORK_ERROR_MESSAGE: &str =
    "Network connection error, please check your network settings";
/// Fallback message when the backend does not supply one.
pub const DEFAULT_ERROR_MESSAGE: &str = "Request failed";
/// Fallback message for a 401 without a body.
pub const UNAUTHORIZED_MESSAGE: &str = "Authentication required";

pub const CODE_VALIDATION: &str = "VALIDATION_ERROR";
pub const CODE_NETWORK: &str = "NETWORK_ERROR";
pub const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const CODE_UNKNOWN: &str = "UNKNOWN_ERROR";
pub const CODE_INVALID_RESPONSE: &str = "INVALID_RESPONSE";
pub const CODE_SESSION_CHANGED: &str = "SESSION_CHANGED";

/// Uniform JSON wrapper carried by every backend response.
///
/// `message` and `timestamp` are optional on the wire in practice: some
/// success responses omit the message entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: Option<String>,
    pub error: Option<String>,
}

/// Error fields of a non-2xx body, whatever else the body holds.
///
/// Rate limiters and proxies answer without the `success` flag, so nothing
/// here is required.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Pagination block returned by list endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
}

/// Payload of a paginated list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    /// Whether more pages follow this one.
    pub fn has_next(&self) -> bool {
        self.pagination.page < self.pagination.pages
    }
}

/// Which branch of the error taxonomy an [`ApiError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NetworkUnreachable,
    AuthenticationRejected,
    Application,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NetworkUnreachable => "network_unreachable",
            ErrorKind::AuthenticationRejected => "authentication_rejected",
            ErrorKind::Application => "application",
        };
        f.write_str(name)
    }
}

/// Normalized failure surfaced by every pipeline and manager operation.
///
/// Display prints only the human-readable message, so callers can show
/// `err.to_string()` directly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// A required field was empty; raised before any network call
    #[error("{message}")]
    Validation { message: String },

    /// No response was received (connect failure, timeout, dropped body)
    #[error("{message}")]
    NetworkUnreachable { message: String },

    /// The backend answered 401
    #[error("{message}")]
    AuthenticationRejected { message: String, code: String },

    /// Non-2xx response, `success: false`, or an unreadable payload
    #[error("{message}")]
    Application {
        message: String,
        code: String,
        status: Option<u16>,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
        }
    }

    pub fn network() -> Self {
        ApiError::NetworkUnreachable {
            message: NETWORK_ERROR_MESSAGE.to_string(),
        }
    }

    /// Build a 401 error, falling back to fixed strings for absent fields.
    pub fn rejected(message: Option<String>, code: Option<String>) -> Self {
        ApiError::AuthenticationRejected {
            message: non_empty(message).unwrap_or_else(|| UNAUTHORIZED_MESSAGE.to_string()),
            code: non_empty(code).unwrap_or_else(|| CODE_UNAUTHORIZED.to_string()),
        }
    }

    /// Build an application error, falling back to fixed strings for absent fields.
    pub fn application(message: Option<String>, code: Option<String>, status: Option<u16>) -> Self {
        ApiError::Application {
            message: non_empty(message).unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            code: non_empty(code).unwrap_or_else(|| CODE_UNKNOWN.to_string()),
            status,
        }
    }

    pub(crate) fn invalid_response(detail: impl fmt::Display, status: Option<u16>) -> Self {
        ApiError::Application {
            message: format!("Unexpected response from server: {}", detail),
            code: CODE_INVALID_RESPONSE.to_string(),
            status,
        }
    }

    pub(crate) fn session_changed() -> Self {
        ApiError::Application {
            message: "The session changed while the request was in flight".to_string(),
            code: CODE_SESSION_CHANGED.to_string(),
            status: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::NetworkUnreachable { .. } => ErrorKind::NetworkUnreachable,
            ApiError::AuthenticationRejected { .. } => ErrorKind::AuthenticationRejected,
            ApiError::Application { .. } => ErrorKind::Application,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Validation { message }
            | ApiError::NetworkUnreachable { message }
            | ApiError::AuthenticationRejected { message, .. }
            | ApiError::Application { message, .. } => message,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ApiError::Validation { .. } => CODE_VALIDATION,
            ApiError::NetworkUnreachable { .. } => CODE_NETWORK,
            ApiError::AuthenticationRejected { code, .. } | ApiError::Application { code, .. } => {
                code
            }
        }
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthenticationRejected { .. } => Some(401),
            ApiError::Application { status, .. } => *status,
            _ => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Errors raised while building an [`crate::api::ApiClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("Invalid API base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::auth::storage::StorageError),
}
