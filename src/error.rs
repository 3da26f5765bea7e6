use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Result alias for the ingestion pipeline
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Everything that can stop a visit from being recorded
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("Geolocation lookup failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("Failed to insert visitor record: {0}")]
    Persistence(String),
}

/// Failures while resolving a domain name to its id
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Domain {0} is not registered")]
    NotFound(String),

    #[error("Domain {0} is registered {1} times")]
    Ambiguous(String, usize),

    #[error("Failed to get domain id: {0}")]
    Store(String),
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Validation(_) => "validation_error",
            Self::Upstream(_) => "upstream_error",
            Self::Lookup(_) => "lookup_error",
            Self::Persistence(_) => "persistence_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Lookup(LookupError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Config(_)
            | Self::Lookup(LookupError::Ambiguous(..))
            | Self::Lookup(LookupError::Store(_))
            | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), "{self}");
        } else {
            warn!(kind = self.kind(), "{self}");
        }
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
