use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the write-ahead log.
    pub data_dir: PathBuf,
    /// How long a mutation waits for the timeline lock before giving up.
    pub lock_timeout: Duration,
    /// Rewrite the WAL after this many commits.
    pub compact_threshold: u64,
    /// Prometheus exporter port. Disabled when unset.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(5_000),
            compact_threshold: 1_000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = lookup("SLOTBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let lock_timeout = lookup("SLOTBOOK_LOCK_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);
        let compact_threshold = lookup("SLOTBOOK_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        let metrics_port = lookup("SLOTBOOK_METRICS_PORT").and_then(|s| s.parse().ok());
        Self {
            data_dir,
            lock_timeout,
            compact_threshold,
            metrics_port,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/slotbook.wal"));
    }

    #[test]
    fn reads_all_keys() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("SLOTBOOK_DATA_DIR", "/var/lib/slotbook"),
            ("SLOTBOOK_LOCK_TIMEOUT_MS", "250"),
            ("SLOTBOOK_COMPACT_THRESHOLD", "10"),
            ("SLOTBOOK_METRICS_PORT", "9100"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/slotbook"));
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.compact_threshold, 10);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("SLOTBOOK_LOCK_TIMEOUT_MS", "soon"),
            ("SLOTBOOK_COMPACT_THRESHOLD", "-3"),
            ("SLOTBOOK_METRICS_PORT", "99999"),
        ]));
        assert_eq!(cfg.lock_timeout, Config::default().lock_timeout);
        assert_eq!(cfg.compact_threshold, 1_000);
        assert_eq!(cfg.metrics_port, None);
    }
}
