use std::net::IpAddr;
use std::time::Duration;

use ipnet::IpNet;

/// Minutes a page view stays eligible for heartbeat updates and session reuse.
pub const LOOKBACK_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    /// Treat a query-string change as a navigation to a different page.
    pub track_url_changes: bool,
    /// Store the host on sessions and scope the lookback by host.
    pub filter_by_domain: bool,
    pub excluded_ips: Vec<IpNet>,
    pub lookup_cache_ttl_secs: u64,
    /// Bearer token that unlocks flexible query mode. `None` disables it.
    pub admin_token: Option<String>,
    pub cors_origins: Vec<String>,
    pub beacon_queue_size: usize,
}

/// The subset of [`Config`] the ingestion pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingConfig {
    pub track_url_changes: bool,
    pub filter_by_domain: bool,
    pub lookback_minutes: i64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_url_changes: false,
            filter_by_domain: false,
            lookback_minutes: LOOKBACK_MINUTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("PAGEFLOW_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("PAGEFLOW_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("PAGEFLOW_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            track_url_changes: env_bool("PAGEFLOW_TRACK_URL_CHANGES", false),
            filter_by_domain: env_bool("PAGEFLOW_FILTER_BY_DOMAIN", false),
            excluded_ips: match std::env::var("PAGEFLOW_EXCLUDED_IPS") {
                Ok(raw) => parse_ip_list(&raw)?,
                Err(_) => Vec::new(),
            },
            lookup_cache_ttl_secs: std::env::var("PAGEFLOW_LOOKUP_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            admin_token: std::env::var("PAGEFLOW_ADMIN_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            cors_origins: std::env::var("PAGEFLOW_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            beacon_queue_size: std::env::var("PAGEFLOW_BEACON_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(1024),
        })
    }

    pub fn tracking(&self) -> TrackingConfig {
        TrackingConfig {
            track_url_changes: self.track_url_changes,
            filter_by_domain: self.filter_by_domain,
            lookback_minutes: LOOKBACK_MINUTES,
        }
    }

    pub fn lookup_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.lookup_cache_ttl_secs)
    }

    pub fn is_excluded_ip(&self, ip: IpAddr) -> bool {
        self.excluded_ips.iter().any(|net| net.contains(&ip))
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Parse a comma-separated list of IP addresses and CIDR ranges.
///
/// Bare addresses become single-host networks.
pub fn parse_ip_list(raw: &str) -> Result<Vec<IpNet>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            if let Ok(net) = entry.parse::<IpNet>() {
                return Ok(net);
            }
            let addr = entry
                .parse::<IpAddr>()
                .map_err(|_| format!("invalid excluded ip: {entry}"))?;
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            IpNet::new(addr, prefix).map_err(|e| format!("invalid excluded ip {entry}: {e}"))
        })
        .collect()
}
