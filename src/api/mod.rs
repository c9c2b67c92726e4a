//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `GET /entries/:model/:entry_id` - Read one entry through the cache
//! - `GET /entries/:model` - Read a filtered list through the cache
//! - `DELETE /models/:model` - Drop every cached value of a model
//! - `POST /events` - Publish a change event on the in-process bus
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
