//! Best-effort geolocation of client addresses
//!
//! Private and loopback addresses short-circuit to a fixed "local network"
//! tuple. Public addresses go through a bounded cache and then the configured
//! backend under a hard timeout; any failure degrades to "Unknown" so that
//! tracking is never blocked by enrichment.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ipnet::IpNet;
use maxminddb::{geoip2, Mmap, Reader};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{GeoConfig, GeoProvider, MAX_GEO_TIMEOUT_MS};
use crate::tracking::models::GeoLocation;

/// Ranges that never leave the local network
static LOCAL_NETWORKS: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "100.64.0.0/10",
        "169.254.0.0/16",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
});

/// Whether an address is loopback, private or otherwise not worth a lookup.
/// Unparseable input counts as local.
pub fn is_local_address(address: &str) -> bool {
    if address.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let Ok(ip) = address.parse::<IpAddr>() else {
        return true;
    };
    let ip = ip.to_canonical();

    ip.is_loopback() || ip.is_unspecified() || LOCAL_NETWORKS.iter().any(|net| net.contains(&ip))
}

/// A geolocation backend
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation>;
}

/// ip-api.com compatible JSON endpoint
pub struct IpApiLookup {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default, rename = "countryCode")]
    country_code: String,
    #[serde(default)]
    city: String,
}

impl IpApiLookup {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("tally-geo/0.1.0")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for geolocation lookups")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeoLookup for IpApiLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        let url = format!(
            "{}/json/{}?fields=status,country,countryCode,city",
            self.base_url, ip
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("geolocation request failed")?;

        if !response.status().is_success() {
            bail!("geolocation service returned {}", response.status());
        }

        let body: IpApiResponse = response
            .json()
            .await
            .context("malformed geolocation response")?;

        if body.status != "success" {
            bail!("geolocation service reported status '{}'", body.status);
        }

        Ok(GeoLocation {
            country_code: body.country_code,
            country_name: body.country,
            city: body.city,
        })
    }
}

/// Memory-mapped MaxMind GeoLite2/GeoIP2 City database
pub struct MaxMindLookup {
    reader: Arc<Reader<Mmap>>,
}

impl MaxMindLookup {
    pub fn new(path: &str) -> Result<Self> {
        // SAFETY: the database file must not be modified while it is mapped
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

#[async_trait]
impl GeoLookup for MaxMindLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        let result = self.reader.lookup(ip).context("MMDB lookup failed")?;

        let Ok(Some(city)) = result.decode::<geoip2::City>() else {
            bail!("no City record for {}", ip);
        };

        let country_code = city.country.iso_code.map(|s| s.to_string());
        let country_name = city.country.names.english.map(|s| s.to_string());
        let city_name = city.city.names.english.map(|s| s.to_string());

        if country_code.is_none() && country_name.is_none() {
            bail!("City record for {} carries no country", ip);
        }

        Ok(GeoLocation {
            country_code: country_code.unwrap_or_default(),
            country_name: country_name.unwrap_or_default(),
            city: city_name.unwrap_or_default(),
        })
    }
}

/// Address -> location resolver with a total fallback
#[derive(Clone)]
pub struct GeoResolver {
    backend: Option<Arc<dyn GeoLookup>>,
    timeout: Duration,
    cache: Cache<IpAddr, GeoLocation>,
}

impl GeoResolver {
    /// `timeout` is clamped to the 3 second ceiling
    pub fn new(
        backend: Option<Arc<dyn GeoLookup>>,
        timeout: Duration,
        cache_max_entries: u64,
        cache_ttl: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(cache_max_entries)
            .time_to_live(cache_ttl)
            .build();

        Self {
            backend,
            timeout: timeout.min(Duration::from_millis(MAX_GEO_TIMEOUT_MS)),
            cache,
        }
    }

    /// Resolver that never calls out; public addresses resolve to "Unknown"
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_millis(MAX_GEO_TIMEOUT_MS), 0, Duration::from_secs(1))
    }

    pub fn from_config(config: &GeoConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let backend: Option<Arc<dyn GeoLookup>> = match config.provider {
            GeoProvider::IpApi => Some(Arc::new(IpApiLookup::new(&config.api_url, timeout)?)),
            GeoProvider::Maxmind => {
                let path = config
                    .mmdb_path
                    .as_deref()
                    .context("GEO_MMDB_PATH must be set when GEO_PROVIDER=maxmind")?;
                Some(Arc::new(MaxMindLookup::new(path)?))
            }
            GeoProvider::None => None,
        };

        Ok(Self::new(
            backend,
            timeout,
            config.cache_max_entries,
            Duration::from_secs(config.cache_ttl_secs),
        ))
    }

    /// Resolve an address. Never fails and never waits longer than the
    /// configured timeout.
    pub async fn resolve(&self, address: &str) -> GeoLocation {
        if is_local_address(address) {
            return GeoLocation::local();
        }

        let Ok(ip) = address.parse::<IpAddr>() else {
            return GeoLocation::local();
        };
        let ip = ip.to_canonical();

        let Some(backend) = self.backend.as_ref() else {
            return GeoLocation::unknown();
        };

        if let Some(hit) = self.cache.get(&ip).await {
            return hit;
        }

        match tokio::time::timeout(self.timeout, backend.lookup(ip)).await {
            Ok(Ok(location)) => {
                self.cache.insert(ip, location.clone()).await;
                location
            }
            Ok(Err(err)) => {
                debug!(ip = %ip, error = %err, "geolocation lookup failed");
                GeoLocation::unknown()
            }
            Err(_) => {
                warn!(ip = %ip, timeout_ms = self.timeout.as_millis() as u64, "geolocation lookup timed out");
                GeoLocation::unknown()
            }
        }
    }
}
