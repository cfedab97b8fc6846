use crate::models::{
    BlacklistEntry, CreatedVisit, DailyAggregate, NewVisitorDay, PresenceEntry,
    VisitorDayRecord, WhitelistEntry,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A unique key (visitor-day, access-list address) already exists
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Keyset position inside the newest-first visit listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitPosition {
    pub created_at: i64,
    pub id: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    // Visitor-day records

    /// Atomically open the visitor-day for `visit.ip_address` on
    /// `visit.visit_date`, record its first page and bump the day's
    /// aggregate. The new/returning verdict is taken inside the same
    /// transaction. Returns `StorageError::Conflict` if the visitor-day
    /// already exists, in which case nothing was written.
    async fn create_visitor_day(&self, visit: &NewVisitorDay) -> StorageResult<CreatedVisit>;

    /// Atomically apply a repeat page view to an existing visitor-day:
    /// page count +1, page added to the visited set, last-activity refreshed
    /// and the day's page-view counter bumped. Returns false (and writes
    /// nothing) if no visitor-day exists.
    async fn record_repeat_view(
        &self,
        ip_address: &str,
        visit_date: &str,
        page_path: &str,
        at: i64,
    ) -> Result<bool>;

    /// Get a visitor-day with its visited pages
    async fn get_visitor_day(
        &self,
        ip_address: &str,
        visit_date: &str,
    ) -> Result<Option<VisitorDayRecord>>;

    /// Refresh last-activity on the visitor's records for a day
    async fn touch_visitor(&self, visitor_id: &str, visit_date: &str, at: i64) -> Result<u64>;

    /// Set the duration on the most recent visitor-day of `visitor_id` that
    /// includes `page_path`
    async fn set_visit_duration(
        &self,
        visitor_id: &str,
        page_path: &str,
        duration: i64,
    ) -> Result<bool>;

    /// Newest-first listing, optionally restricted to one day
    async fn list_visits(
        &self,
        visit_date: Option<&str>,
        after: Option<VisitPosition>,
        limit: i64,
    ) -> Result<Vec<VisitorDayRecord>>;

    async fn count_visits(&self, visit_date: Option<&str>) -> Result<i64>;

    // Daily aggregates

    async fn get_daily_stats(&self, stats_date: &str) -> Result<Option<DailyAggregate>>;

    /// Aggregates from `since_date` (inclusive), oldest first
    async fn list_daily_stats(&self, since_date: &str) -> Result<Vec<DailyAggregate>>;

    // Presence

    /// Single-statement presence upsert. A departure decrements the room
    /// floored at zero; any other heartbeat creates the room at one or only
    /// refreshes its timestamp.
    async fn touch_presence(&self, room_key: &str, departing: bool, at: i64) -> Result<()>;

    async fn get_presence(&self, room_key: &str) -> Result<Option<PresenceEntry>>;

    /// Online count of rooms updated at or after `since`; all rooms summed,
    /// or only `room_key` when given
    async fn online_total(&self, room_key: Option<&str>, since: i64) -> Result<i64>;

    // Access lists

    /// Whether an unexpired blacklist entry exists for the address
    async fn is_blacklisted(&self, ip_address: &str, now: i64) -> Result<bool>;

    async fn has_whitelist(&self) -> Result<bool>;

    async fn is_whitelisted(&self, ip_address: &str) -> Result<bool>;

    async fn add_to_blacklist(
        &self,
        ip_address: &str,
        reason: &str,
        expires_at: Option<i64>,
    ) -> StorageResult<BlacklistEntry>;

    async fn remove_from_blacklist(&self, id: i64) -> Result<bool>;

    async fn list_blacklist(&self) -> Result<Vec<BlacklistEntry>>;

    async fn add_to_whitelist(
        &self,
        ip_address: &str,
        description: &str,
    ) -> StorageResult<WhitelistEntry>;

    async fn remove_from_whitelist(&self, id: i64) -> Result<bool>;

    async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>>;

    // Maintenance

    /// Delete every visitor-day, visited page, daily aggregate and presence row
    async fn clear_visits(&self) -> Result<()>;

    /// Delete daily aggregates only
    async fn clear_daily_stats(&self) -> Result<()>;
}
