//! HTTP router and handlers

use std::sync::Arc;

use axum::{Json, Router, response::IntoResponse, routing::get};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::forward::{ProxyState, forward};
use crate::broker::handler::{IssuanceState, issuance_routes};

/// Create the router.
///
/// `/health` never touches the token store. Issuance routes are merged only
/// when `issuance` is given; everything else falls through to [`forward`].
/// No compression layer: it would coalesce event-stream frames.
pub fn create_router(state: Arc<ProxyState>, issuance: Option<Arc<IssuanceState>>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .fallback(forward)
        .with_state(state);

    if let Some(issuance) = issuance {
        router = router.merge(issuance_routes(issuance));
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
