use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Upper bound for a single geolocation lookup
pub const MAX_GEO_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub geo: GeoConfig,
    pub tracking: TrackingConfig,
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GeoProvider {
    /// ip-api.com compatible JSON endpoint
    IpApi,
    /// Local MaxMind City database
    Maxmind,
    /// No lookups; public addresses resolve to "Unknown"
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    pub provider: GeoProvider,
    pub api_url: String,
    #[serde(default)]
    pub mmdb_path: Option<String>,
    pub timeout_ms: u64,
    pub cache_max_entries: u64,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Presence rows older than this are excluded from online totals
    pub presence_window_secs: i64,
    /// Offset from UTC used to decide which calendar day an event belongs to
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Secret for signing visit-list cursors. Random per process when unset.
    #[serde(default)]
    pub cursor_hmac_secret: Option<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            provider: GeoProvider::IpApi,
            api_url: "http://ip-api.com".to_string(),
            mmdb_path: None,
            timeout_ms: MAX_GEO_TIMEOUT_MS,
            cache_max_entries: 10_000,
            cache_ttl_secs: 86_400,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            presence_window_secs: 300,
            utc_offset_minutes: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./tally.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);

        let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .context("SERVER_PORT must be a valid port number")?;

        let provider = match std::env::var("GEO_PROVIDER")
            .unwrap_or_else(|_| "ip-api".to_string())
            .to_lowercase()
            .as_str()
        {
            "ip-api" | "ipapi" => GeoProvider::IpApi,
            "maxmind" | "mmdb" => GeoProvider::Maxmind,
            "none" | "off" => GeoProvider::None,
            other => {
                tracing::warn!(
                    "Unknown GEO_PROVIDER '{other}', falling back to 'ip-api'. Supported values: ip-api, maxmind, none"
                );
                GeoProvider::IpApi
            }
        };

        let geo_defaults = GeoConfig::default();

        let mmdb_path = std::env::var("GEO_MMDB_PATH").ok();
        if provider == GeoProvider::Maxmind && mmdb_path.is_none() {
            anyhow::bail!("GEO_MMDB_PATH must be set when GEO_PROVIDER=maxmind");
        }

        let timeout_ms = std::env::var("GEO_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(geo_defaults.timeout_ms);
        if timeout_ms > MAX_GEO_TIMEOUT_MS {
            tracing::warn!(
                "GEO_TIMEOUT_MS={timeout_ms} exceeds the {MAX_GEO_TIMEOUT_MS}ms ceiling, clamping"
            );
        }

        let geo = GeoConfig {
            provider,
            api_url: std::env::var("GEO_API_URL").unwrap_or(geo_defaults.api_url),
            mmdb_path,
            timeout_ms: timeout_ms.clamp(1, MAX_GEO_TIMEOUT_MS),
            cache_max_entries: std::env::var("GEO_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(geo_defaults.cache_max_entries),
            cache_ttl_secs: std::env::var("GEO_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(geo_defaults.cache_ttl_secs),
        };

        let tracking_defaults = TrackingConfig::default();
        let tracking = TrackingConfig {
            presence_window_secs: std::env::var("PRESENCE_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(tracking_defaults.presence_window_secs),
            utc_offset_minutes: std::env::var("TRACKING_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .filter(|v| v.abs() < 24 * 60)
                .unwrap_or(tracking_defaults.utc_offset_minutes),
        };

        let cursor_hmac_secret = std::env::var("CURSOR_HMAC_SECRET").ok();

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            geo,
            tracking,
            pagination: PaginationConfig { cursor_hmac_secret },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_defaults_respect_timeout_ceiling() {
        let geo = GeoConfig::default();
        assert!(geo.timeout_ms <= MAX_GEO_TIMEOUT_MS);
        assert_eq!(geo.provider, GeoProvider::IpApi);
    }

    #[test]
    fn test_tracking_defaults() {
        let tracking = TrackingConfig::default();
        assert_eq!(tracking.presence_window_secs, 300);
        assert_eq!(tracking.utc_offset_minutes, 0);
    }

    #[test]
    fn test_provider_serde_names() {
        let provider: GeoProvider = serde_json::from_str("\"ip-api\"").unwrap();
        assert_eq!(provider, GeoProvider::IpApi);
        let provider: GeoProvider = serde_json::from_str("\"maxmind\"").unwrap();
        assert_eq!(provider, GeoProvider::Maxmind);
    }
}
