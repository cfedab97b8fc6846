use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::tracking::models::{DeviceInfo, GeoLocation};

/// One row per (address, calendar day)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VisitorDayRecord {
    pub id: i64,
    pub ip_address: String,
    pub visit_date: String,
    pub visitor_id: String,
    pub session_id: String,
    /// First page seen for this visitor-day
    pub page_path: String,
    pub page_type: String,
    pub reference_id: String,
    pub referrer: String,
    pub device_type: String,
    pub os: String,
    pub browser: String,
    pub screen_resolution: String,
    pub language: String,
    pub country_code: String,
    pub country_name: String,
    pub city: String,
    pub created_at: i64,
    pub last_visit_at: i64,
    pub page_view_count: i64,
    pub duration: i64,
    pub is_new_visitor: bool,
    /// Distinct pages in first-visit order, loaded from `visitor_pages`
    #[sqlx(skip)]
    #[serde(default)]
    pub visited_pages: Vec<String>,
}

/// Everything needed to open a new visitor-day record
#[derive(Debug, Clone)]
pub struct NewVisitorDay {
    pub ip_address: String,
    pub visit_date: String,
    pub visitor_id: String,
    pub session_id: String,
    pub page_path: String,
    pub page_type: String,
    pub reference_id: String,
    pub referrer: String,
    pub device: DeviceInfo,
    pub geo: GeoLocation,
    pub at: i64,
}

/// Identity of a freshly created visitor-day and its new/returning verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedVisit {
    pub id: i64,
    pub is_new_visitor: bool,
}

/// One row per calendar day, mutated only by additive upserts
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct DailyAggregate {
    pub stats_date: String,
    pub page_views: i64,
    pub unique_visitors: i64,
    pub unique_ips: i64,
    pub new_visitors: i64,
    pub returning_visitors: i64,
    pub updated_at: i64,
}

impl DailyAggregate {
    /// Zero-valued aggregate for a day that has seen no traffic
    pub fn empty(stats_date: &str) -> Self {
        Self {
            stats_date: stats_date.to_string(),
            ..Default::default()
        }
    }
}

/// Real-time presence counter for a room
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct PresenceEntry {
    pub room_key: String,
    pub online_count: i64,
    pub last_updated: i64,
}
