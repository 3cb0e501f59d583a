//! Record store configuration.

/// Configuration for file-backed record stores.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to fsync the batch log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Compact the log on open once it holds more than this many batches
    /// (0 = never).
    pub compact_after_batches: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            compact_after_batches: 0,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the batch count that triggers compaction on open.
    #[must_use]
    pub const fn compact_after_batches(mut self, batches: usize) -> Self {
        self.compact_after_batches = batches;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.sync_on_commit);
        assert_eq!(config.compact_after_batches, 0);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .sync_on_commit(false)
            .compact_after_batches(64);

        assert!(!config.sync_on_commit);
        assert_eq!(config.compact_after_batches, 64);
    }
}
