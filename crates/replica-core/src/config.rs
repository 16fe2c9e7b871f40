//! Replica configuration loaded from environment variables.
//!
//! Every setting has a default, so a replica can be opened with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use replica_shared::constants::{
    CHANNEL_DIFFERENCE_LIMIT, CHANNEL_POLL_SECS, CLEANUP_DELAY_MS, COMMIT_WINDOW_MS,
    DIALOG_REFRESH_MS, GC_GRACE_MS, RESYNC_DEBOUNCE_MS,
};
use replica_store::{Database, StoreOptions};

/// Replica configuration.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Database file.
    /// Env: `REPLICA_DB_PATH`
    /// Default: the platform data directory (see [`Database::default_path`]).
    pub db_path: Option<PathBuf>,

    /// Idle window after which a batched write transaction commits.
    /// Env: `REPLICA_COMMIT_WINDOW_MS`
    pub commit_window: Duration,

    /// Delay between a staleness signal and the catch-up request.
    /// Env: `REPLICA_RESYNC_DEBOUNCE_MS`
    pub resync_debounce: Duration,

    /// Interval of the channel difference poll.
    /// Env: `REPLICA_CHANNEL_POLL_SECS`
    pub channel_poll_interval: Duration,

    /// How long retired cache entries stay readable.
    /// Env: `REPLICA_GC_GRACE_MS`
    pub gc_grace: Duration,

    /// Delay between a cleanup request and the eviction sweep.
    /// Env: `REPLICA_CLEANUP_DELAY_MS`
    pub cleanup_delay: Duration,

    /// Delay before dialogs are re-fetched after structural updates.
    /// Env: `REPLICA_DIALOG_REFRESH_MS`
    pub dialog_refresh_delay: Duration,

    /// Whether detaching a message view schedules a cleanup.
    /// Env: `REPLICA_AUTO_CLEANUP` (true/false)
    /// Default: `true`
    pub auto_cleanup: bool,

    /// Maximum number of updates asked for per channel difference.
    /// Env: `REPLICA_CHANNEL_DIFF_LIMIT`
    pub channel_difference_limit: i32,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            commit_window: Duration::from_millis(COMMIT_WINDOW_MS),
            resync_debounce: Duration::from_millis(RESYNC_DEBOUNCE_MS),
            channel_poll_interval: Duration::from_secs(CHANNEL_POLL_SECS),
            gc_grace: Duration::from_millis(GC_GRACE_MS),
            cleanup_delay: Duration::from_millis(CLEANUP_DELAY_MS),
            dialog_refresh_delay: Duration::from_millis(DIALOG_REFRESH_MS),
            auto_cleanup: true,
            channel_difference_limit: CHANNEL_DIFFERENCE_LIMIT,
            event_capacity: 1024,
        }
    }
}

impl ReplicaConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("REPLICA_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        let millis = |name: &str, slot: &mut Duration| {
            if let Some(ms) = parse_var::<u64>(&lookup, name) {
                *slot = Duration::from_millis(ms);
            }
        };
        millis("REPLICA_COMMIT_WINDOW_MS", &mut config.commit_window);
        millis("REPLICA_RESYNC_DEBOUNCE_MS", &mut config.resync_debounce);
        millis("REPLICA_GC_GRACE_MS", &mut config.gc_grace);
        millis("REPLICA_CLEANUP_DELAY_MS", &mut config.cleanup_delay);
        millis("REPLICA_DIALOG_REFRESH_MS", &mut config.dialog_refresh_delay);

        match parse_var::<u64>(&lookup, "REPLICA_CHANNEL_POLL_SECS") {
            Some(0) => tracing::warn!("REPLICA_CHANNEL_POLL_SECS must be positive, using default"),
            Some(secs) => config.channel_poll_interval = Duration::from_secs(secs),
            None => {}
        }

        if let Some(val) = lookup("REPLICA_AUTO_CLEANUP") {
            config.auto_cleanup = val != "false" && val != "0";
        }

        match parse_var::<i32>(&lookup, "REPLICA_CHANNEL_DIFF_LIMIT") {
            Some(limit) if limit > 0 => config.channel_difference_limit = limit,
            Some(_) => tracing::warn!("REPLICA_CHANNEL_DIFF_LIMIT must be positive, using default"),
            None => {}
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Database file to open: the configured path or the platform default.
    pub fn resolve_db_path(&self) -> replica_store::Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Database::default_path(),
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            commit_window: self.commit_window,
        }
    }
}

/// Parse a variable, warning and returning `None` when it does not parse.
fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(value = %raw, "Invalid {name}, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ReplicaConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ReplicaConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ReplicaConfig::default();
        assert_eq!(config.commit_window, Duration::from_secs(1));
        assert_eq!(config.resync_debounce, Duration::from_millis(1500));
        assert_eq!(config.channel_poll_interval, Duration::from_secs(15));
        assert_eq!(config.channel_difference_limit, 50);
        assert!(config.auto_cleanup);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("REPLICA_DB_PATH", "/tmp/replica-test.db"),
            ("REPLICA_GC_GRACE_MS", "10"),
            ("REPLICA_AUTO_CLEANUP", "false"),
            ("REPLICA_CHANNEL_DIFF_LIMIT", "20"),
        ]);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/replica-test.db")));
        assert_eq!(config.gc_grace, Duration::from_millis(10));
        assert!(!config.auto_cleanup);
        assert_eq!(config.channel_difference_limit, 20);
        assert_eq!(
            config.resolve_db_path().unwrap(),
            PathBuf::from("/tmp/replica-test.db")
        );
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("REPLICA_COMMIT_WINDOW_MS", "soon"),
            ("REPLICA_CHANNEL_POLL_SECS", "0"),
            ("REPLICA_CHANNEL_DIFF_LIMIT", "-5"),
        ]);
        let defaults = ReplicaConfig::default();
        assert_eq!(config.commit_window, defaults.commit_window);
        assert_eq!(config.channel_poll_interval, defaults.channel_poll_interval);
        assert_eq!(config.channel_difference_limit, defaults.channel_difference_limit);
    }

    #[test]
    fn test_store_options_carry_commit_window() {
        let config = config_from(&[("REPLICA_COMMIT_WINDOW_MS", "250")]);
        assert_eq!(config.store_options().commit_window, Duration::from_millis(250));
    }
}
