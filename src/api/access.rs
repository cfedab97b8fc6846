use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::info;

use crate::models::{
    parse_expiry, BlacklistEntry, BlacklistRequest, WhitelistEntry, WhitelistRequest,
};
use crate::storage::StorageError;
use crate::tracking::resolve_client_address;

use super::{ApiError, ApiResult, AppState};

#[derive(Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct ClientIpResponse {
    pub success: bool,
    pub ip: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        success: true,
        message: text.to_string(),
    })
}

fn validate_address(address: &str) -> ApiResult<String> {
    let address = address.trim();
    address
        .parse::<IpAddr>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid IP address '{}'", address)))?;
    Ok(address.to_string())
}

fn conflict_or_internal(err: StorageError, address: &str) -> ApiError {
    match err {
        StorageError::Conflict => {
            ApiError::Conflict(format!("IP address {} is already listed", address))
        }
        StorageError::Other(e) => ApiError::Internal(e),
    }
}

pub async fn list_blacklist(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DataResponse<Vec<BlacklistEntry>>>> {
    let data = state.storage.list_blacklist().await?;
    Ok(Json(DataResponse {
        success: true,
        data,
    }))
}

pub async fn add_blacklist(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BlacklistRequest>,
) -> ApiResult<(StatusCode, Json<DataResponse<BlacklistEntry>>)> {
    let address = validate_address(&payload.ip_address)?;

    let expires_at = match payload.expires_at.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_expiry(raw).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Invalid expires_at '{}', expected RFC 3339 or YYYY-MM-DD HH:MM:SS",
                raw
            ))
        })?),
    };

    let entry = state
        .storage
        .add_to_blacklist(&address, payload.reason.as_deref().unwrap_or(""), expires_at)
        .await
        .map_err(|e| conflict_or_internal(e, &address))?;

    info!(ip = %entry.ip_address, expires_at = ?entry.expires_at, "Blacklisted address");
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            success: true,
            data: entry,
        }),
    ))
}

pub async fn remove_blacklist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.storage.remove_from_blacklist(id).await? {
        return Err(ApiError::NotFound(format!("Blacklist entry {} not found", id)));
    }
    Ok(message("Removed from blacklist"))
}

pub async fn list_whitelist(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DataResponse<Vec<WhitelistEntry>>>> {
    let data = state.storage.list_whitelist().await?;
    Ok(Json(DataResponse {
        success: true,
        data,
    }))
}

pub async fn add_whitelist(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WhitelistRequest>,
) -> ApiResult<(StatusCode, Json<DataResponse<WhitelistEntry>>)> {
    let address = validate_address(&payload.ip_address)?;

    let entry = state
        .storage
        .add_to_whitelist(&address, payload.description.as_deref().unwrap_or(""))
        .await
        .map_err(|e| conflict_or_internal(e, &address))?;

    info!(ip = %entry.ip_address, "Whitelisted address");
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            success: true,
            data: entry,
        }),
    ))
}

pub async fn remove_whitelist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.storage.remove_from_whitelist(id).await? {
        return Err(ApiError::NotFound(format!("Whitelist entry {} not found", id)));
    }
    Ok(message("Removed from whitelist"))
}

/// The address the gate sees for this caller
pub async fn client_ip(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<ClientIpResponse> {
    Json(ClientIpResponse {
        success: true,
        ip: resolve_client_address(&headers, remote_addr),
    })
}

pub async fn clear_visitors(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<MessageResponse>> {
    state.storage.clear_visits().await?;
    info!("Cleared visitor data");
    Ok(message("Visitor data cleared"))
}

pub async fn clear_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<MessageResponse>> {
    state.storage.clear_daily_stats().await?;
    info!("Cleared daily statistics");
    Ok(message("Daily statistics cleared"))
}
