use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header::USER_AGENT, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::tracking::bot::is_bot;
use crate::tracking::{
    resolve_client_address, Beacon, IgnoreReason, TrackOutcome, TrackingRequest,
};

use super::{ApiError, ApiResult, AppState};

#[derive(Serialize)]
pub struct TrackResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<&'static str>,
}

#[derive(Deserialize)]
pub struct OnlineQuery {
    #[serde(default)]
    pub room: Option<String>,
}

#[derive(Serialize)]
pub struct OnlineResponse {
    pub success: bool,
    pub total: i64,
}

/// Ingest a tracking beacon.
///
/// The body is read as raw bytes so beacons sent as `text/plain` are
/// accepted too. Bots are answered before the body is looked at.
pub async fn track(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<TrackResponse>> {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    if user_agent.as_deref().is_some_and(is_bot) {
        return Ok(Json(TrackResponse {
            success: true,
            ignored: Some(IgnoreReason::Bot.as_str()),
        }));
    }

    let request: TrackingRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid tracking payload: {}", e)))?;

    let beacon = Beacon {
        request,
        user_agent,
        client_address: resolve_client_address(&headers, remote_addr),
        received_at: chrono::Utc::now(),
    };

    let ignored = match state.engine.record_event(beacon).await? {
        TrackOutcome::Recorded(_) => None,
        TrackOutcome::Ignored(reason) => Some(reason.as_str()),
    };

    Ok(Json(TrackResponse {
        success: true,
        ignored,
    }))
}

/// Current online total, for one room or across all rooms
pub async fn online(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OnlineQuery>,
) -> ApiResult<Json<OnlineResponse>> {
    let room = query.room.as_deref().map(str::trim).filter(|r| !r.is_empty());
    let total = state.engine.online_total(room, chrono::Utc::now()).await?;

    Ok(Json(OnlineResponse {
        success: true,
        total,
    }))
}
