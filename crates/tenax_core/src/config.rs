//! Engine configuration.

use std::path::PathBuf;

/// Which persistence adapter the engine should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// File-based adapter under [`Config::storage_dir`].
    File,
    /// In-memory adapter; state dies with the engine.
    Memory,
}

/// Configuration for building an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which adapter to construct.
    pub adapter: AdapterKind,

    /// Root directory of the file adapter's store.
    pub storage_dir: PathBuf,

    /// Whether reads re-verify integrity on every access instead of only
    /// at commit.
    pub instant_read_integrity_fail: bool,

    /// Log filter directive for hosts that wire up a `tracing`
    /// subscriber, e.g. `"tenax_core=debug"`. The engine itself never
    /// installs a subscriber.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::File,
            storage_dir: PathBuf::from("tenax"),
            instant_read_integrity_fail: false,
            log_filter: None,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the adapter kind.
    #[must_use]
    pub fn adapter(mut self, kind: AdapterKind) -> Self {
        self.adapter = kind;
        self
    }

    /// Sets the file adapter's storage directory.
    #[must_use]
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Sets whether reads re-verify integrity on every access.
    #[must_use]
    pub const fn instant_read_integrity_fail(mut self, value: bool) -> Self {
        self.instant_read_integrity_fail = value;
        self
    }

    /// Sets the log filter directive.
    #[must_use]
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.adapter, AdapterKind::File);
        assert!(!config.instant_read_integrity_fail);
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .adapter(AdapterKind::Memory)
            .storage_dir("/tmp/tx")
            .instant_read_integrity_fail(true)
            .log_filter("tenax_core=debug");

        assert_eq!(config.adapter, AdapterKind::Memory);
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/tx"));
        assert!(config.instant_read_integrity_fail);
        assert_eq!(config.log_filter.as_deref(), Some("tenax_core=debug"));
    }
}
