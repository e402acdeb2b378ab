//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID span)
//! - Optional OpenAPI document (disable with `BATCH_ENABLE_DOCS=false`)
//! - Health / heartbeat route
//! - Batch task routes under `/v1`

pub mod doc;
mod health;
mod v1;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router, middleware};
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .nest("/v1", v1::router());

    if state.config.enable_docs {
        let api_doc = doc::get_docs();
        app = app.route(
            "/api-docs/openapi.json",
            get(move || {
                let api_doc = api_doc.clone();
                async move { Json(api_doc) }
            }),
        );
    }

    // The layer added last is outermost: the trace span wraps CORS handling.
    app.layer(ServiceBuilder::new().layer(cors::cors_layer(
        state.config.cors_allowed_origins.as_deref(),
    )))
    .layer(middleware::from_fn(trace::trace_middleware))
    .with_state(state)
}
