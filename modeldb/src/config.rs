use std::env;
use std::time::Duration;

/// Environment variable holding the default connection URI.
pub const URI_ENV: &str = "MODELDB_URI";
/// Environment variable overriding the server-selection timeout, in milliseconds.
pub const TIMEOUT_ENV: &str = "MODELDB_SERVER_SELECTION_TIMEOUT_MS";

pub const DEFAULT_SERVER_SELECTION_TIMEOUT_MS: u64 = 5000;

/// Connection defaults for a `ConnectionManager`.
#[derive(Debug, Clone, PartialEq)]
pub struct DbConfig {
    /// URI used when `connect` is called without one.
    pub uri: Option<String>,
    /// Upper bound on a single connect attempt.
    pub server_selection_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            uri: None,
            server_selection_timeout: Duration::from_millis(DEFAULT_SERVER_SELECTION_TIMEOUT_MS),
        }
    }
}

impl DbConfig {
    /// Read `MODELDB_URI` and `MODELDB_SERVER_SELECTION_TIMEOUT_MS`.
    /// Unset, empty or unparsable values keep the defaults.
    pub fn from_env() -> Self {
        let mut config = DbConfig::default();

        if let Ok(uri) = env::var(URI_ENV) {
            if !uri.trim().is_empty() {
                config.uri = Some(uri);
            }
        }

        if let Ok(raw) = env::var(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.server_selection_timeout = Duration::from_millis(ms),
                _ => log::warn!("Ignoring invalid {TIMEOUT_ENV} value '{raw}'"),
            }
        }

        config
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }
}
