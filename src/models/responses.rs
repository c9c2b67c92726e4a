//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies. Entry and list
//! reads return the backend payload as is, and `/stats` returns the cache's
//! own stats report.

use serde::Serialize;

/// Response body for `DELETE /models/:model`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub model: String,
    /// Number of cached values dropped
    pub removed: usize,
}

impl ClearResponse {
    pub fn new(model: impl Into<String>, removed: usize) -> Self {
        let model = model.into();
        Self {
            message: format!("Model '{}' cleared", model),
            model,
            removed,
        }
    }
}

/// Response body for `POST /events`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub routing_key: String,
    /// Number of queues the event reached
    pub delivered: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    /// Whether change events keep the cache fresh
    pub live_invalidation: bool,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(live_invalidation: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            live_invalidation,
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
