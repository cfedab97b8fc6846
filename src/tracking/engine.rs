//! Event ingestion and the read side over visitor-days, daily aggregates and
//! presence rooms.
//!
//! All counters live in storage and are only ever changed by single-statement
//! upserts, so the engine itself holds no mutable state. The only ordering
//! the engine enforces is on the first view of an (address, day): the insert
//! either wins or reports a conflict, and a conflicting writer falls back to
//! the repeat-view path against the row that won.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use tracing::{debug, warn};

use crate::config::TrackingConfig;
use crate::models::{DailyAggregate, NewVisitorDay, VisitorDayRecord};
use crate::storage::{Storage, StorageError, VisitPosition};

use super::bot::is_bot;
use super::error::TrackResult;
use super::geoip::GeoResolver;
use super::models::{
    Beacon, Heartbeat, IgnoreReason, Leave, PageView, RoomKey, TrackOutcome, TrackingEvent,
};

/// Default and bounds for the trend window, in days
pub const DEFAULT_TREND_DAYS: i64 = 7;
pub const MAX_TREND_DAYS: i64 = 90;

/// Default and upper bound for a visit listing page
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// One page of the newest-first visit listing
#[derive(Debug, Clone)]
pub struct VisitPage {
    pub records: Vec<VisitorDayRecord>,
    /// Matching records across all pages
    pub total: i64,
    /// Position to resume after, if more records remain
    pub next: Option<VisitPosition>,
}

/// Out-of-range or missing trend windows fall back to the default
pub fn clamp_trend_days(days: Option<i64>) -> i64 {
    match days {
        Some(days) if (1..=MAX_TREND_DAYS).contains(&days) => days,
        _ => DEFAULT_TREND_DAYS,
    }
}

pub fn clamp_page_size(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

pub struct TrackingEngine {
    storage: Arc<dyn Storage>,
    geo: GeoResolver,
    presence_window_secs: i64,
    utc_offset: FixedOffset,
}

impl TrackingEngine {
    pub fn new(storage: Arc<dyn Storage>, geo: GeoResolver, config: &TrackingConfig) -> Self {
        let utc_offset = config
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(
                    "Invalid UTC offset of {} minutes, using UTC",
                    config.utc_offset_minutes
                );
                Utc.fix()
            });

        Self {
            storage,
            geo,
            presence_window_secs: config.presence_window_secs,
            utc_offset,
        }
    }

    /// Calendar day (`YYYY-MM-DD`) an instant belongs to
    pub fn day_for(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.utc_offset)
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Ingest one beacon.
    ///
    /// Bot traffic is dropped before the payload is even interpreted. Decode
    /// errors leave storage untouched.
    pub async fn record_event(&self, beacon: Beacon) -> TrackResult<TrackOutcome> {
        if let Some(user_agent) = beacon.user_agent.as_deref() {
            if is_bot(user_agent) {
                debug!(user_agent, "ignoring bot beacon");
                return Ok(TrackOutcome::Ignored(IgnoreReason::Bot));
            }
        }

        let event = TrackingEvent::try_from(beacon.request)?;
        let kind = event.kind();
        let at = beacon.received_at;

        match event {
            TrackingEvent::PageView(view) => {
                self.record_page_view(view, &beacon.client_address, at).await?
            }
            TrackingEvent::Heartbeat(heartbeat) => self.record_heartbeat(&heartbeat, at).await?,
            TrackingEvent::Leave(leave) => self.record_leave(leave, at).await?,
        }

        debug!(
            action = kind.as_str(),
            address = %beacon.client_address,
            "recorded tracking event"
        );
        Ok(TrackOutcome::Recorded(kind))
    }

    async fn record_page_view(
        &self,
        view: PageView,
        address: &str,
        at: DateTime<Utc>,
    ) -> TrackResult<()> {
        let day = self.day_for(at);
        let now = at.timestamp();

        if self
            .storage
            .record_repeat_view(address, &day, &view.page_path, now)
            .await?
        {
            return Ok(());
        }

        // No storage work is in flight while the lookup runs
        let geo = self.geo.resolve(address).await;

        let visit = NewVisitorDay {
            ip_address: address.to_string(),
            visit_date: day.clone(),
            visitor_id: view.visitor_id,
            session_id: view.session_id,
            page_path: view.page_path,
            page_type: view.page_type,
            reference_id: view.reference_id,
            referrer: view.referrer,
            device: view.device,
            geo,
            at: now,
        };

        match self.storage.create_visitor_day(&visit).await {
            Ok(created) => {
                debug!(
                    address,
                    day = %day,
                    is_new_visitor = created.is_new_visitor,
                    "opened visitor-day"
                );
                Ok(())
            }
            Err(StorageError::Conflict) => {
                // Lost the race for the first view; the winner's row exists now
                debug!(address, day = %day, "visitor-day created concurrently, applying as repeat view");
                if self
                    .storage
                    .record_repeat_view(address, &day, &visit.page_path, now)
                    .await?
                {
                    Ok(())
                } else {
                    Err(StorageError::Conflict.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn record_heartbeat(&self, heartbeat: &Heartbeat, at: DateTime<Utc>) -> TrackResult<()> {
        self.touch(&heartbeat.visitor_id, &heartbeat.room, heartbeat.departing, at)
            .await
    }

    async fn record_leave(&self, leave: Leave, at: DateTime<Utc>) -> TrackResult<()> {
        if leave.duration > 0 && !leave.visitor_id.is_empty() {
            let updated = self
                .storage
                .set_visit_duration(&leave.visitor_id, &leave.page_path, leave.duration)
                .await?;
            if !updated {
                debug!(
                    visitor_id = %leave.visitor_id,
                    page_path = %leave.page_path,
                    "no visit found for leave duration"
                );
            }
        }

        self.touch(&leave.visitor_id, &leave.room, true, at).await
    }

    async fn touch(
        &self,
        visitor_id: &str,
        room: &RoomKey,
        departing: bool,
        at: DateTime<Utc>,
    ) -> TrackResult<()> {
        let now = at.timestamp();
        self.storage
            .touch_presence(room.as_str(), departing, now)
            .await?;
        // Anonymous beacons only count towards presence
        if !visitor_id.is_empty() {
            self.storage
                .touch_visitor(visitor_id, &self.day_for(at), now)
                .await?;
        }
        Ok(())
    }

    /// Aggregate for one day, zero-valued when the day saw no traffic
    pub async fn daily(&self, day: &str) -> Result<DailyAggregate> {
        Ok(self
            .storage
            .get_daily_stats(day)
            .await?
            .unwrap_or_else(|| DailyAggregate::empty(day)))
    }

    /// Stored aggregates from `days` days before `now` up to today, oldest first.
    /// Out-of-range windows fall back to the default.
    pub async fn trend(&self, days: i64, now: DateTime<Utc>) -> Result<Vec<DailyAggregate>> {
        let days = clamp_trend_days(Some(days));
        let since = self.day_for(now - Duration::days(days));
        self.storage.list_daily_stats(&since).await
    }

    /// Visitors online as of `now`: one room, or every room summed.
    /// Rooms idle for longer than the presence window are not counted.
    pub async fn online_total(&self, room: Option<&str>, now: DateTime<Utc>) -> Result<i64> {
        let since = now.timestamp() - self.presence_window_secs;
        self.storage.online_total(room, since).await
    }

    pub async fn visitor_day(&self, address: &str, day: &str) -> Result<Option<VisitorDayRecord>> {
        self.storage.get_visitor_day(address, day).await
    }

    pub async fn visits(
        &self,
        day: Option<&str>,
        after: Option<VisitPosition>,
        limit: i64,
    ) -> Result<VisitPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        // One extra row tells whether another page exists
        let mut records = self.storage.list_visits(day, after, limit + 1).await?;
        let has_more = records.len() as i64 > limit;
        records.truncate(limit as usize);

        let next = if has_more {
            records.last().map(|r| VisitPosition {
                created_at: r.created_at,
                id: r.id,
            })
        } else {
            None
        };

        let total = self.storage.count_visits(day).await?;

        Ok(VisitPage {
            records,
            total,
            next,
        })
    }
}
