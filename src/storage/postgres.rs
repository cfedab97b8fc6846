use crate::models::{
    BlacklistEntry, CreatedVisit, DailyAggregate, NewVisitorDay, PresenceEntry,
    VisitorDayRecord, WhitelistEntry,
};
use crate::storage::{Storage, StorageError, StorageResult, VisitPosition};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

const VISIT_COLUMNS: &str = r#"
    id, ip_address, visit_date, visitor_id, session_id, page_path, page_type,
    reference_id, referrer, device_type, os, browser, screen_resolution, language,
    country_code, country_name, city, created_at, last_visit_at, page_view_count,
    duration, is_new_visitor
"#;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn load_pages(&self, record: &mut VisitorDayRecord) -> Result<()> {
        record.visited_pages = sqlx::query_scalar::<_, String>(
            r#"
            SELECT page_path FROM visitor_pages
            WHERE visit_id = $1
            ORDER BY id
            "#,
        )
        .bind(record.id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(())
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitor_days (
                id BIGSERIAL PRIMARY KEY,
                ip_address TEXT NOT NULL,
                visit_date TEXT NOT NULL,
                visitor_id TEXT NOT NULL DEFAULT '',
                session_id TEXT NOT NULL DEFAULT '',
                page_path TEXT NOT NULL,
                page_type TEXT NOT NULL DEFAULT '',
                reference_id TEXT NOT NULL DEFAULT '',
                referrer TEXT NOT NULL DEFAULT '',
                device_type TEXT NOT NULL DEFAULT '',
                os TEXT NOT NULL DEFAULT '',
                browser TEXT NOT NULL DEFAULT '',
                screen_resolution TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT '',
                country_code TEXT NOT NULL DEFAULT '',
                country_name TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL,
                last_visit_at BIGINT NOT NULL,
                page_view_count BIGINT NOT NULL DEFAULT 1,
                duration BIGINT NOT NULL DEFAULT 0,
                is_new_visitor BOOLEAN NOT NULL DEFAULT TRUE,
                UNIQUE (ip_address, visit_date)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_visitor_days_visitor ON visitor_days(visitor_id, visit_date)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_visitor_days_created ON visitor_days(created_at, id)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitor_pages (
                id BIGSERIAL PRIMARY KEY,
                visit_id BIGINT NOT NULL REFERENCES visitor_days(id) ON DELETE CASCADE,
                page_path TEXT NOT NULL,
                first_seen_at BIGINT NOT NULL,
                UNIQUE (visit_id, page_path)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats (
                stats_date TEXT PRIMARY KEY,
                page_views BIGINT NOT NULL DEFAULT 0,
                unique_visitors BIGINT NOT NULL DEFAULT 0,
                unique_ips BIGINT NOT NULL DEFAULT 0,
                new_visitors BIGINT NOT NULL DEFAULT 0,
                returning_visitors BIGINT NOT NULL DEFAULT 0,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS presence (
                room_key TEXT PRIMARY KEY,
                online_count BIGINT NOT NULL DEFAULT 0,
                last_updated BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_presence_updated ON presence(last_updated)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ip_blacklist (
                id BIGSERIAL PRIMARY KEY,
                ip_address TEXT NOT NULL UNIQUE,
                reason TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL,
                expires_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ip_whitelist (
                id BIGSERIAL PRIMARY KEY,
                ip_address TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_visitor_day(&self, visit: &NewVisitorDay) -> StorageResult<CreatedVisit> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;

        // A concurrent insert for the same key blocks here until it commits,
        // then this one does nothing
        let created = sqlx::query_as::<_, (i64, bool)>(
            r#"
            INSERT INTO visitor_days (
                ip_address, visit_date, visitor_id, session_id, page_path, page_type,
                reference_id, referrer, device_type, os, browser, screen_resolution,
                language, country_code, country_name, city, created_at, last_visit_at,
                page_view_count, duration, is_new_visitor
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $17, 1, 0,
                NOT EXISTS (
                    SELECT 1 FROM visitor_days
                    WHERE ip_address = $1 AND visit_date < $2
                )
            )
            ON CONFLICT (ip_address, visit_date) DO NOTHING
            RETURNING id, is_new_visitor
            "#,
        )
        .bind(&visit.ip_address)
        .bind(&visit.visit_date)
        .bind(&visit.visitor_id)
        .bind(&visit.session_id)
        .bind(&visit.page_path)
        .bind(&visit.page_type)
        .bind(&visit.reference_id)
        .bind(&visit.referrer)
        .bind(&visit.device.device_type)
        .bind(&visit.device.os)
        .bind(&visit.device.browser)
        .bind(&visit.device.screen_resolution)
        .bind(&visit.device.language)
        .bind(&visit.geo.country_code)
        .bind(&visit.geo.country_name)
        .bind(&visit.geo.city)
        .bind(visit.at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        let Some((id, is_new_visitor)) = created else {
            return Err(StorageError::Conflict);
        };

        sqlx::query(
            r#"
            INSERT INTO visitor_pages (visit_id, page_path, first_seen_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (visit_id, page_path) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&visit.page_path)
        .bind(visit.at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        let (new_visitors, returning_visitors): (i64, i64) =
            if is_new_visitor { (1, 0) } else { (0, 1) };

        sqlx::query(
            r#"
            INSERT INTO daily_stats (
                stats_date, page_views, unique_visitors, unique_ips,
                new_visitors, returning_visitors, updated_at
            )
            VALUES ($1, 1, 1, 1, $2, $3, $4)
            ON CONFLICT (stats_date) DO UPDATE SET
                page_views = daily_stats.page_views + 1,
                unique_visitors = daily_stats.unique_visitors + 1,
                unique_ips = daily_stats.unique_ips + 1,
                new_visitors = daily_stats.new_visitors + EXCLUDED.new_visitors,
                returning_visitors = daily_stats.returning_visitors + EXCLUDED.returning_visitors,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&visit.visit_date)
        .bind(new_visitors)
        .bind(returning_visitors)
        .bind(visit.at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;

        Ok(CreatedVisit { id, is_new_visitor })
    }

    async fn record_repeat_view(
        &self,
        ip_address: &str,
        visit_date: &str,
        page_path: &str,
        at: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let visit_id = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE visitor_days
            SET page_view_count = page_view_count + 1,
                last_visit_at = $1
            WHERE ip_address = $2 AND visit_date = $3
            RETURNING id
            "#,
        )
        .bind(at)
        .bind(ip_address)
        .bind(visit_date)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(visit_id) = visit_id else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            INSERT INTO visitor_pages (visit_id, page_path, first_seen_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (visit_id, page_path) DO NOTHING
            "#,
        )
        .bind(visit_id)
        .bind(page_path)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO daily_stats (
                stats_date, page_views, unique_visitors, unique_ips,
                new_visitors, returning_visitors, updated_at
            )
            VALUES ($1, 1, 0, 0, 0, 0, $2)
            ON CONFLICT (stats_date) DO UPDATE SET
                page_views = daily_stats.page_views + 1,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(visit_date)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn get_visitor_day(
        &self,
        ip_address: &str,
        visit_date: &str,
    ) -> Result<Option<VisitorDayRecord>> {
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visitor_days WHERE ip_address = $1 AND visit_date = $2"
        );
        let record = sqlx::query_as::<_, VisitorDayRecord>(&sql)
            .bind(ip_address)
            .bind(visit_date)
            .fetch_optional(self.pool.as_ref())
            .await?;

        match record {
            Some(mut record) => {
                self.load_pages(&mut record).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn touch_visitor(&self, visitor_id: &str, visit_date: &str, at: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE visitor_days
            SET last_visit_at = $1
            WHERE visitor_id = $2 AND visit_date = $3
            "#,
        )
        .bind(at)
        .bind(visitor_id)
        .bind(visit_date)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_visit_duration(
        &self,
        visitor_id: &str,
        page_path: &str,
        duration: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE visitor_days
            SET duration = $1
            WHERE id = (
                SELECT v.id FROM visitor_days v
                JOIN visitor_pages p ON p.visit_id = v.id
                WHERE v.visitor_id = $2 AND p.page_path = $3
                ORDER BY v.created_at DESC, v.id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(duration)
        .bind(visitor_id)
        .bind(page_path)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_visits(
        &self,
        visit_date: Option<&str>,
        after: Option<VisitPosition>,
        limit: i64,
    ) -> Result<Vec<VisitorDayRecord>> {
        let sql = format!(
            r#"
            SELECT {VISIT_COLUMNS} FROM visitor_days
            WHERE ($1::TEXT IS NULL OR visit_date = $1)
              AND ($2::BIGINT IS NULL OR created_at < $2 OR (created_at = $2 AND id < $3))
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#
        );

        let mut records = sqlx::query_as::<_, VisitorDayRecord>(&sql)
            .bind(visit_date)
            .bind(after.map(|p| p.created_at))
            .bind(after.map(|p| p.id))
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        for record in records.iter_mut() {
            self.load_pages(record).await?;
        }

        Ok(records)
    }

    async fn count_visits(&self, visit_date: Option<&str>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM visitor_days WHERE ($1::TEXT IS NULL OR visit_date = $1)",
        )
        .bind(visit_date)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn get_daily_stats(&self, stats_date: &str) -> Result<Option<DailyAggregate>> {
        let stats = sqlx::query_as::<_, DailyAggregate>(
            r#"
            SELECT stats_date, page_views, unique_visitors, unique_ips,
                   new_visitors, returning_visitors, updated_at
            FROM daily_stats
            WHERE stats_date = $1
            "#,
        )
        .bind(stats_date)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(stats)
    }

    async fn list_daily_stats(&self, since_date: &str) -> Result<Vec<DailyAggregate>> {
        let stats = sqlx::query_as::<_, DailyAggregate>(
            r#"
            SELECT stats_date, page_views, unique_visitors, unique_ips,
                   new_visitors, returning_visitors, updated_at
            FROM daily_stats
            WHERE stats_date >= $1
            ORDER BY stats_date
            "#,
        )
        .bind(since_date)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(stats)
    }

    async fn touch_presence(&self, room_key: &str, departing: bool, at: i64) -> Result<()> {
        let sql = if departing {
            r#"
            INSERT INTO presence (room_key, online_count, last_updated)
            VALUES ($1, 0, $2)
            ON CONFLICT (room_key) DO UPDATE SET
                online_count = GREATEST(0, presence.online_count - 1),
                last_updated = EXCLUDED.last_updated
            "#
        } else {
            r#"
            INSERT INTO presence (room_key, online_count, last_updated)
            VALUES ($1, 1, $2)
            ON CONFLICT (room_key) DO UPDATE SET
                last_updated = EXCLUDED.last_updated
            "#
        };

        sqlx::query(sql)
            .bind(room_key)
            .bind(at)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn get_presence(&self, room_key: &str) -> Result<Option<PresenceEntry>> {
        let entry = sqlx::query_as::<_, PresenceEntry>(
            "SELECT room_key, online_count, last_updated FROM presence WHERE room_key = $1",
        )
        .bind(room_key)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(entry)
    }

    async fn online_total(&self, room_key: Option<&str>, since: i64) -> Result<i64> {
        let total = match room_key {
            Some(room_key) => sqlx::query_scalar::<_, i64>(
                r#"
                SELECT online_count FROM presence
                WHERE room_key = $1 AND last_updated >= $2
                "#,
            )
            .bind(room_key)
            .bind(since)
            .fetch_optional(self.pool.as_ref())
            .await?
            .unwrap_or(0),
            None => sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(SUM(online_count), 0)::BIGINT FROM presence WHERE last_updated >= $1",
            )
            .bind(since)
            .fetch_one(self.pool.as_ref())
            .await?,
        };

        Ok(total)
    }

    async fn is_blacklisted(&self, ip_address: &str, now: i64) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM ip_blacklist
            WHERE ip_address = $1 AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(ip_address)
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    async fn has_whitelist(&self) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM (SELECT 1 FROM ip_whitelist LIMIT 1) AS any_entry",
        )
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    async fn is_whitelisted(&self, ip_address: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ip_whitelist WHERE ip_address = $1",
        )
        .bind(ip_address)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    async fn add_to_blacklist(
        &self,
        ip_address: &str,
        reason: &str,
        expires_at: Option<i64>,
    ) -> StorageResult<BlacklistEntry> {
        let entry = sqlx::query_as::<_, BlacklistEntry>(
            r#"
            INSERT INTO ip_blacklist (ip_address, reason, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ip_address) DO NOTHING
            RETURNING id, ip_address, reason, created_at, expires_at
            "#,
        )
        .bind(ip_address)
        .bind(reason)
        .bind(now_secs())
        .bind(expires_at)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        entry.ok_or(StorageError::Conflict)
    }

    async fn remove_from_blacklist(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ip_blacklist WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_blacklist(&self) -> Result<Vec<BlacklistEntry>> {
        let entries = sqlx::query_as::<_, BlacklistEntry>(
            r#"
            SELECT id, ip_address, reason, created_at, expires_at
            FROM ip_blacklist
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(entries)
    }

    async fn add_to_whitelist(
        &self,
        ip_address: &str,
        description: &str,
    ) -> StorageResult<WhitelistEntry> {
        let entry = sqlx::query_as::<_, WhitelistEntry>(
            r#"
            INSERT INTO ip_whitelist (ip_address, description, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (ip_address) DO NOTHING
            RETURNING id, ip_address, description, created_at
            "#,
        )
        .bind(ip_address)
        .bind(description)
        .bind(now_secs())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        entry.ok_or(StorageError::Conflict)
    }

    async fn remove_from_whitelist(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ip_whitelist WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>> {
        let entries = sqlx::query_as::<_, WhitelistEntry>(
            r#"
            SELECT id, ip_address, description, created_at
            FROM ip_whitelist
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(entries)
    }

    async fn clear_visits(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in ["visitor_pages", "visitor_days", "daily_stats", "presence"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear_daily_stats(&self) -> Result<()> {
        sqlx::query("DELETE FROM daily_stats")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}
