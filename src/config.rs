use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineOptions;
use crate::tenant::ClubSettings;

/// Server settings, read from `COURTSIDE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub club: ClubSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "courtside".into(),
            max_connections: 256,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            club: ClubSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults; the latter are logged.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let engine_defaults = EngineOptions::default();
        let club_defaults = ClubSettings::default();

        let parsed = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparsable setting");
                    None
                }
            }
        };
        let secs = |key: &str| parsed(key).map(Duration::from_secs);

        // 0 disables the payment window: pending reservations wait indefinitely.
        let payment_timeout = match parsed("COURTSIDE_PAYMENT_TIMEOUT_SECS") {
            Some(0) => None,
            Some(s) => Some(Duration::from_secs(s)),
            None => engine_defaults.payment_timeout,
        };

        Self {
            bind: lookup("COURTSIDE_BIND").unwrap_or(defaults.bind),
            port: parsed("COURTSIDE_PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("COURTSIDE_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("COURTSIDE_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed("COURTSIDE_MAX_CONNECTIONS")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_connections),
            metrics_port: parsed("COURTSIDE_METRICS_PORT").and_then(|p| u16::try_from(p).ok()),
            tls_cert: lookup("COURTSIDE_TLS_CERT"),
            tls_key: lookup("COURTSIDE_TLS_KEY"),
            club: ClubSettings {
                engine: EngineOptions {
                    payment_timeout,
                    lock_timeout: secs("COURTSIDE_REQUEST_TIMEOUT_SECS").unwrap_or(engine_defaults.lock_timeout),
                },
                reaper_interval: secs("COURTSIDE_REAPER_INTERVAL_SECS").unwrap_or(club_defaults.reaper_interval),
                compact_threshold: parsed("COURTSIDE_COMPACT_THRESHOLD").unwrap_or(club_defaults.compact_threshold),
                compact_check_interval: club_defaults.compact_check_interval,
            },
        }
    }
}
