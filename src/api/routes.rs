use axum::{
    http::{header::CONTENT_TYPE, Method},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::access::access_middleware;

use super::access::{
    add_blacklist, add_whitelist, clear_stats, clear_visitors, client_ip, list_blacklist,
    list_whitelist, remove_blacklist, remove_whitelist,
};
use super::reports::{daily, list_visits, trend};
use super::tracking::{online, track};
use super::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

/// Public tracking endpoints plus the gated admin surface.
///
/// The router needs `ConnectInfo<SocketAddr>`; serve it with
/// `into_make_service_with_connect_info`.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let tracking_routes = Router::new()
        .route("/api/track", post(track))
        .route("/api/track/online", get(online))
        .layer(cors)
        .with_state(Arc::clone(&state));

    let admin_routes = Router::new()
        .route("/api/visitors/list", get(list_visits))
        .route("/api/visitors/trend", get(trend))
        .route("/api/visitors/daily/{date}", get(daily))
        .route("/api/blacklist", get(list_blacklist).post(add_blacklist))
        .route("/api/blacklist/{id}", delete(remove_blacklist))
        .route("/api/whitelist", get(list_whitelist).post(add_whitelist))
        .route("/api/whitelist/{id}", delete(remove_whitelist))
        .route("/api/system/client-ip", get(client_ip))
        .route("/api/system/clear-visitors", post(clear_visitors))
        .route("/api/system/clear-stats", post(clear_stats))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.gate),
            access_middleware,
        ))
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/health", get(health_check))
        .merge(tracking_routes)
        .merge(admin_routes)
}
