//! Error types shared by the outbound clients and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

/// Failure of a call to Notion or ConvertKit.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not configured: {0}")]
    NotConfigured(&'static str),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Upstream(format!("request timed out: {}", err))
        } else {
            ClientError::Upstream(err.to_string())
        }
    }
}

/// Errors surfaced by the HTTP handlers. Every variant renders as a JSON body
/// with an `error` field.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    MalformedRequest(String),
    #[error("No page ID found in request body")]
    MissingId { received: Value },
    #[error("Invalid signature")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: ClientError,
    },
    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ApiError {
    pub fn upstream(context: &'static str, source: ClientError) -> Self {
        ApiError::Upstream { context, source }
    }

    pub fn storage(context: &'static str, source: anyhow::Error) -> Self {
        ApiError::Storage { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedRequest(_) | ApiError::MissingId { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream { .. } | ApiError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> Value {
        match self {
            ApiError::MissingId { received } => json!({
                "error": self.to_string(),
                "receivedBody": received,
            }),
            ApiError::Upstream { context, source } => json!({
                "error": context,
                "details": source.to_string(),
            }),
            ApiError::Storage { context, source } => json!({
                "error": context,
                "details": source.to_string(),
            }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(err = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), err = %self, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
