use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },
    #[error("not found: {message}")]
    NotFound {
        code: &'static str,
        message: String,
    },
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, message.to_string())
            }
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}

/// Terminal failure states of a dispatched request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown capability: {address}")]
    NotFound { address: String },
    #[error("malformed request for {address}: {message}")]
    MalformedRequest { address: String, message: String },
    #[error("provider {provider} failed on {address}: {message}")]
    Provider {
        provider: String,
        address: String,
        message: String,
    },
    #[error("context is not available outside of a request: {operation}")]
    ContextUnavailable { operation: &'static str },
}

impl DispatchError {
    pub fn not_found(address: impl Into<String>) -> Self {
        Self::NotFound {
            address: address.into(),
        }
    }

    pub fn malformed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "capability_not_found",
            Self::MalformedRequest { .. } => "malformed_request",
            Self::Provider { .. } => "provider_error",
            Self::ContextUnavailable { .. } => "context_unavailable",
        }
    }
}

/// Raised while loading or introspecting a single provider. The registry logs
/// it and carries on without that provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("provider {provider} could not be instantiated: {message}")]
    Instantiation { provider: String, message: String },
    #[error("provider {provider} panicked while declaring capabilities: {message}")]
    Introspection { provider: String, message: String },
    #[error("provider {provider} declared capability {address} under foreign service {service}")]
    ServiceMismatch {
        provider: String,
        service: String,
        address: String,
    },
    #[error("provider listed as {entry} names itself {provider}")]
    EntryMismatch { entry: String, provider: String },
    #[error("provider {provider} uses an invalid name: {name}")]
    InvalidName { provider: String, name: String },
    #[error("service {provider} is already registered")]
    DuplicateService { provider: String },
    #[error("provider {provider} declares {address} more than once")]
    DuplicateCapability { provider: String, address: String },
}

/// Error returned from a capability method. Only the message crosses the
/// protocol boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<DispatchError> for ProviderError {
    fn from(err: DispatchError) -> Self {
        Self::new(err.to_string())
    }
}
