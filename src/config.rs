use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::EngineOptions;
use crate::limits::MAX_CANCEL_NOTICE_MINUTES;
use crate::ratelimit::RateLimitConfig;

#[derive(Debug)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    TlsPair,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::TlsPair => write!(
                f,
                "both SPELPLAUT_TLS_CERT and SPELPLAUT_TLS_KEY must be set, or neither"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub admins: Vec<String>,
    pub cancel_notice_minutes: i64,
    pub sweep_interval_secs: u64,
    pub login_burst: u32,
    pub login_refill_per_min: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls_cert = lookup("SPELPLAUT_TLS_CERT");
        let tls_key = lookup("SPELPLAUT_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        let admins = lookup("SPELPLAUT_ADMINS")
            .unwrap_or_else(|| "admin".into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let cancel_notice_minutes: i64 = parsed(&lookup, "SPELPLAUT_CANCEL_NOTICE_MINUTES", 120)?;
        if !(0..=MAX_CANCEL_NOTICE_MINUTES).contains(&cancel_notice_minutes) {
            return Err(ConfigError::Invalid {
                key: "SPELPLAUT_CANCEL_NOTICE_MINUTES",
                value: cancel_notice_minutes.to_string(),
            });
        }

        Ok(Self {
            port: parsed(&lookup, "SPELPLAUT_PORT", 5433)?,
            bind: lookup("SPELPLAUT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("SPELPLAUT_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: lookup("SPELPLAUT_PASSWORD").unwrap_or_else(|| "spelplaut".into()),
            max_connections: parsed(&lookup, "SPELPLAUT_MAX_CONNECTIONS", 256)?,
            compact_threshold: parsed(&lookup, "SPELPLAUT_COMPACT_THRESHOLD", 1000)?,
            metrics_port: lookup("SPELPLAUT_METRICS_PORT")
                .map(|v| parse_value("SPELPLAUT_METRICS_PORT", v))
                .transpose()?,
            tls_cert,
            tls_key,
            admins,
            cancel_notice_minutes,
            sweep_interval_secs: parsed(&lookup, "SPELPLAUT_SWEEP_INTERVAL_SECS", 60)?,
            login_burst: parsed(&lookup, "SPELPLAUT_LOGIN_BURST", 10)?,
            login_refill_per_min: parsed(&lookup, "SPELPLAUT_LOGIN_REFILL_PER_MIN", 10)?,
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            cancel_notice_minutes: self.cancel_notice_minutes,
        }
    }

    pub fn login_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::per_minute(self.login_burst, self.login_refill_per_min)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("spelplaut.wal")
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid { key, value })
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    lookup(key).map_or(Ok(default), |v| parse_value(key, v))
}
