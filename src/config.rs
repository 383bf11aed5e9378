//! Runtime configuration, read from the environment at startup.
//!
//! | variable | default |
//! |----------|---------|
//! | `MVG_OBSERVER_PORT` | `3000` |
//! | `MVG_OBSERVER_UPSTREAM_URL` | `http://127.0.0.1:8080/api` |
//! | `MVG_OBSERVER_DEBOUNCE_MS` | `300` |
//! | `MVG_OBSERVER_STALE_AFTER_SECS` | `300` |
//!
//! Values that fail to parse fall back to the default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::client::DEFAULT_UPSTREAM_URL;
use crate::history::DEFAULT_DEBOUNCE;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default age after which a station counts as stale.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port of the HTTP server.
    pub port: u16,

    /// Base URL of the upstream delay service.
    pub upstream_url: String,

    /// Quiet period before history settings changes are fetched.
    pub debounce: Duration,

    /// Stations not updated for this long are reported as stale.
    pub stale_after: chrono::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            stale_after: chrono::Duration::seconds(DEFAULT_STALE_AFTER_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = parse_or(&lookup, "MVG_OBSERVER_PORT", defaults.port);

        let upstream_url = lookup("MVG_OBSERVER_UPSTREAM_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.upstream_url);

        let debounce = lookup("MVG_OBSERVER_DEBOUNCE_MS")
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.debounce);

        let stale_after = chrono::Duration::seconds(parse_or(
            &lookup,
            "MVG_OBSERVER_STALE_AFTER_SECS",
            DEFAULT_STALE_AFTER_SECS,
        ));

        Self {
            port,
            upstream_url,
            debounce,
            stale_after,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
