use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::notify::DEFAULT_QUEUE_CAPACITY;

/// Runtime settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub storage_timeout: Duration,
    pub session_lifetime: Duration,
    pub compact_threshold: u64,
    pub mail_from: String,
    pub mail_queue: usize,
    pub production: bool,
    pub admin_email: String,
    /// No password means nobody can log in.
    pub admin_password: Option<String>,
    /// Send anonymous visitors of `/admin` to the login page.
    pub require_login: bool,
    /// Room names created at startup if missing.
    pub rooms: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: lookup("ROOMBOOK_BIND").unwrap_or_else(|| "127.0.0.1".into()),
            port: parse_or(&lookup, "ROOMBOOK_PORT", 8080),
            data_dir: PathBuf::from(lookup("ROOMBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port: lookup("ROOMBOOK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            storage_timeout: Duration::from_millis(parse_or(
                &lookup,
                "ROOMBOOK_STORAGE_TIMEOUT_MS",
                3000,
            )),
            session_lifetime: Duration::from_secs(parse_or(
                &lookup,
                "ROOMBOOK_SESSION_LIFETIME_SECS",
                86_400,
            )),
            compact_threshold: parse_or(&lookup, "ROOMBOOK_COMPACT_THRESHOLD", 1000),
            mail_from: lookup("ROOMBOOK_MAIL_FROM")
                .unwrap_or_else(|| "reservations@roombook.local".into()),
            mail_queue: parse_or(&lookup, "ROOMBOOK_MAIL_QUEUE", DEFAULT_QUEUE_CAPACITY),
            production: parse_or(&lookup, "ROOMBOOK_PRODUCTION", false),
            admin_email: lookup("ROOMBOOK_ADMIN_EMAIL")
                .unwrap_or_else(|| "admin@roombook.local".into()),
            admin_password: lookup("ROOMBOOK_ADMIN_PASSWORD").filter(|p| !p.is_empty()),
            require_login: parse_or(&lookup, "ROOMBOOK_REQUIRE_LOGIN", false),
            rooms: lookup("ROOMBOOK_ROOMS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
    }
}
