use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BlacklistEntry {
    pub id: i64,
    pub ip_address: String,
    pub reason: String,
    pub created_at: i64,
    /// Unix timestamp after which the ban no longer applies
    pub expires_at: Option<i64>,
}

impl BlacklistEntry {
    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WhitelistEntry {
    pub id: i64,
    pub ip_address: String,
    pub description: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct BlacklistRequest {
    pub ip_address: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC)
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WhitelistRequest {
    pub ip_address: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Parse a blacklist expiry given as RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn parse_expiry(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
