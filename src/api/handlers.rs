//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tracing::info;

use crate::bus::{event_routing_key, MemoryChannel, EXCHANGE};
use crate::cache::StatsReport;
use crate::client::DmCache;
use crate::error::{CacheError, Result};
use crate::keys::ListOptions;
use crate::models::{ClearResponse, EntryQuery, HealthResponse, PublishEventRequest, PublishResponse};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: DmCache,
    /// In-process bus that `POST /events` publishes on, when live events are on
    pub bus: Option<Arc<MemoryChannel>>,
    /// Routing-key prefix for published events
    pub short_id: String,
}

impl AppState {
    pub fn new(cache: DmCache, short_id: impl Into<String>) -> Self {
        Self {
            cache,
            bus: None,
            short_id: short_id.into(),
        }
    }

    pub fn with_bus(mut self, bus: Arc<MemoryChannel>) -> Self {
        self.bus = Some(bus);
        self
    }
}

/// Handler for GET /entries/:model/:entry_id
///
/// Query: `fields=a,b` and `levels=N`.
pub async fn get_entry_handler(
    State(state): State<AppState>,
    Path((model, entry_id)): Path<(String, String)>,
    Query(query): Query<EntryQuery>,
) -> Result<Json<Value>> {
    let value = state
        .cache
        .get_entry(&model, entry_id, query.into_request())
        .await?;
    Ok(Json(value))
}

/// Handler for GET /entries/:model
///
/// Every query parameter becomes a filter option.
pub async fn get_entries_handler(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let filter: ListOptions = params
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();
    let filter = (!filter.is_empty()).then_some(filter);

    let value = state.cache.get_entries(&model, filter, None).await?;
    Ok(Json(value))
}

/// Handler for DELETE /models/:model
pub async fn clear_model_handler(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> Result<Json<ClearResponse>> {
    let removed = state.cache.clear_model(&model).await?;
    Ok(Json(ClearResponse::new(model, removed)))
}

/// Handler for POST /events
///
/// Publishes the event the way the data manager would, so it reaches the
/// cache through its own queue bindings.
pub async fn publish_event_handler(
    State(state): State<AppState>,
    Json(req): Json<PublishEventRequest>,
) -> Result<(StatusCode, Json<PublishResponse>)> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidArgument(error_msg));
    }
    let Some(bus) = &state.bus else {
        return Err(CacheError::TransportDegraded(
            "live events are disabled".to_string(),
        ));
    };

    let kind = req.change_kind();
    let routing_key = event_routing_key(&state.short_id, &req.model_title, &req.entry_id, kind);
    let payload = serde_json::json!({
        "modelTitle": req.model_title,
        "entryID": req.entry_id,
    });
    let delivered = bus.publish(
        EXCHANGE,
        &routing_key,
        Some(kind.message_type()),
        payload.to_string().into_bytes(),
    );
    info!(routing_key = %routing_key, delivered, "change event published");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            routing_key,
            delivered,
        }),
    ))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsReport> {
    Json(state.cache.get_stats().await)
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.cache.has_live_invalidation()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::CacheOptions;
    use serde_json::json;

    async fn state() -> (Arc<MemoryBackend>, AppState) {
        let backend = Arc::new(MemoryBackend::new("abcdef01"));
        backend.insert_entry("blog", "p1", json!({"id": "p1", "title": "Hello"}));
        backend.insert_list("blog", json!({"count": 1}));
        let cache = DmCache::new(CacheOptions::default(), backend.clone(), None)
            .await
            .unwrap();
        (backend, AppState::new(cache, "abcdef01"))
    }

    #[tokio::test]
    async fn test_get_entry_handler_caches() {
        let (backend, state) = state().await;

        for _ in 0..2 {
            let Json(value) = get_entry_handler(
                State(state.clone()),
                Path(("blog".to_string(), "p1".to_string())),
                Query(EntryQuery::default()),
            )
            .await
            .unwrap();
            assert_eq!(value["title"], "Hello");
        }
        assert_eq!(backend.entry_calls(), 1);
    }

    #[tokio::test]
    async fn test_get_entries_and_clear() {
        let (_, state) = state().await;

        let Json(list) = get_entries_handler(
            State(state.clone()),
            Path("blog".to_string()),
            Query(HashMap::new()),
        )
        .await
        .unwrap();
        assert_eq!(list["count"], 1);

        let Json(cleared) = clear_model_handler(State(state.clone()), Path("blog".to_string()))
            .await
            .unwrap();
        assert_eq!(cleared.removed, 1);
    }

    #[tokio::test]
    async fn test_publish_without_bus_is_unavailable() {
        let (_, state) = state().await;
        let req = PublishEventRequest {
            model_title: "blog".to_string(),
            entry_id: "p1".to_string(),
            kind: None,
        };

        let result = publish_event_handler(State(state), Json(req)).await;
        assert!(matches!(result, Err(CacheError::TransportDegraded(_))));
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let (_, state) = state().await;
        let Json(stats) = stats_handler(State(state)).await;
        assert_eq!(stats.max_cache_size, 1000);
        assert_eq!(stats.time_to_live, 300);
        assert!(!stats.live_invalidation);
    }
}
