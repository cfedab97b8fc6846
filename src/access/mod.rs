//! IP access control for the admin surface

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::storage::Storage;
use crate::tracking::resolve_client_address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Blacklisted,
    NotWhitelisted,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::Blacklisted => "Access denied: IP address is blacklisted",
            DenyReason::NotWhitelisted => "Access denied: IP address is not whitelisted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }
}

/// Blacklist-then-whitelist gate over the stored access lists.
///
/// An empty whitelist admits everyone who is not blacklisted; a non-empty
/// one admits only its members.
pub struct AccessGate {
    storage: Arc<dyn Storage>,
}

impl AccessGate {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn check(&self, address: &str) -> anyhow::Result<AccessDecision> {
        let now = chrono::Utc::now().timestamp();

        if self.storage.is_blacklisted(address, now).await? {
            return Ok(AccessDecision::Denied(DenyReason::Blacklisted));
        }

        if self.storage.has_whitelist().await? && !self.storage.is_whitelisted(address).await? {
            return Ok(AccessDecision::Denied(DenyReason::NotWhitelisted));
        }

        Ok(AccessDecision::Allowed)
    }

    pub async fn is_allowed(&self, address: &str) -> anyhow::Result<bool> {
        Ok(self.check(address).await?.is_allowed())
    }
}

/// Runs the gate on the resolved client address before any admin handler
pub async fn access_middleware(
    State(gate): State<Arc<AccessGate>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let address = resolve_client_address(&headers, remote_addr);

    match gate.check(&address).await {
        Ok(AccessDecision::Allowed) => next.run(request).await,
        Ok(AccessDecision::Denied(reason)) => {
            warn!(address = %address, ?reason, "Admin request denied");
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "success": false, "error": reason.message() })),
            )
                .into_response()
        }
        Err(e) => {
            error!(address = %address, "Access check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Access check failed" })),
            )
                .into_response()
        }
    }
}
