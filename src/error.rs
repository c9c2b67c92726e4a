//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::backend::BackendError;
use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Bad caller input, raised before any I/O
    #[error("{0}")]
    InvalidArgument(String),

    /// The backend fetch behind a cache miss failed
    #[error("backend call {operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    /// Invalid construction options
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Subscription or acknowledgement failure; logged, never returned from reads
    #[error("Transport degraded: {0}")]
    TransportDegraded(String),

    /// Capability that is intentionally stubbed
    #[error("{0} is not implemented")]
    NotImplemented(String),
}

impl CacheError {
    /// Wraps a backend failure with the name of the call that produced it.
    pub fn backend(operation: &'static str, source: BackendError) -> Self {
        CacheError::Backend { operation, source }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CacheError::Backend {
                source: BackendError::NotFound(_),
                ..
            } => StatusCode::NOT_FOUND,
            CacheError::Backend { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CacheError::TransportDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
