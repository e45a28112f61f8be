//! Server settings, read once from `INNKEEP_*` environment variables.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::FixedOffset;
use thiserror::Error;

use crate::model::UserId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("both INNKEEP_TLS_CERT and INNKEEP_TLS_KEY must be set, or neither")]
    PartialTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Shared startup password for every client.
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between background compactions.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    /// User names treated as hotel staff.
    pub admin_users: HashSet<UserId>,
    /// Hotel local offset; decides what "today" is for past-date checks.
    pub utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset and empty values fall back
    /// to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tls_cert = get("INNKEEP_TLS_CERT");
        let tls_key = get("INNKEEP_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }

        Ok(Self {
            bind: get("INNKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("INNKEEP_PORT"), "INNKEEP_PORT", "a port number", 5433)?,
            data_dir: PathBuf::from(get("INNKEEP_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("INNKEEP_PASSWORD").unwrap_or_else(|| "innkeep".into()),
            max_connections: parse_or(
                get("INNKEEP_MAX_CONNECTIONS"),
                "INNKEEP_MAX_CONNECTIONS",
                "a positive integer",
                256,
            )?,
            compact_threshold: parse_or(
                get("INNKEEP_COMPACT_THRESHOLD"),
                "INNKEEP_COMPACT_THRESHOLD",
                "a positive integer",
                1000,
            )?,
            tls_cert,
            tls_key,
            metrics_port: get("INNKEEP_METRICS_PORT")
                .map(|v| parse_value(v, "INNKEEP_METRICS_PORT", "a port number"))
                .transpose()?,
            admin_users: get("INNKEEP_ADMIN_USERS")
                .map(|v| parse_user_list(&v))
                .unwrap_or_default(),
            utc_offset: match get("INNKEEP_UTC_OFFSET") {
                Some(v) => parse_offset(&v)?,
                None => FixedOffset::east_opt(0).ok_or(ConfigError::Invalid {
                    var: "INNKEEP_UTC_OFFSET",
                    expected: "an offset",
                    value: "+00:00".into(),
                })?,
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }
}

fn parse_value<T: std::str::FromStr>(
    value: String,
    var: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value,
    })
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    value.map_or(Ok(default), |v| parse_value(v, var, expected))
}

fn parse_user_list(value: &str) -> HashSet<UserId> {
    value
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

/// `+HH:MM`, `-HH:MM` or `Z`.
fn parse_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::Invalid {
        var: "INNKEEP_UTC_OFFSET",
        expected: "an offset like +02:00",
        value: value.to_string(),
    };
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = match trimmed.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
