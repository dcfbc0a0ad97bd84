//! Store options.

use std::time::Duration;

use cellbox_engine::{Model, StoreConfig};

/// Options for opening a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Entity and property metadata of the store.
    pub model: Model,

    /// Maximum committed data size in KiB (0 = unlimited).
    pub max_data_size_kb: u64,

    /// Maximum number of concurrent read transactions.
    pub max_readers: u32,

    /// Capacity of the async write queue.
    pub async_max_queue_length: usize,

    /// How long an async put or remove waits for queue space.
    pub async_enqueue_timeout: Duration,

    /// Reject all write transactions.
    pub read_only: bool,
}

impl Default for Options {
    fn default() -> Self {
        let config = StoreConfig::default();
        Self {
            model: Model::default(),
            max_data_size_kb: config.max_data_size_kb,
            max_readers: config.max_readers,
            async_max_queue_length: config.async_max_queue_length,
            async_enqueue_timeout: config.async_enqueue_timeout,
            read_only: config.read_only,
        }
    }
}

impl Options {
    /// Creates options for `model` with default settings.
    #[must_use]
    pub fn new(model: Model) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    /// Sets the maximum committed data size in KiB.
    #[must_use]
    pub const fn max_data_size_kb(mut self, size: u64) -> Self {
        self.max_data_size_kb = size;
        self
    }

    /// Sets the maximum number of concurrent readers.
    #[must_use]
    pub const fn max_readers(mut self, readers: u32) -> Self {
        self.max_readers = readers;
        self
    }

    /// Sets the async queue capacity.
    #[must_use]
    pub const fn async_max_queue_length(mut self, length: usize) -> Self {
        self.async_max_queue_length = length;
        self
    }

    /// Sets the async enqueue timeout.
    #[must_use]
    pub const fn async_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.async_enqueue_timeout = timeout;
        self
    }

    /// Opens the store read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub(crate) fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_data_size_kb: self.max_data_size_kb,
            max_readers: self.max_readers,
            async_max_queue_length: self.async_max_queue_length,
            async_enqueue_timeout: self.async_enqueue_timeout,
            read_only: self.read_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = Options::default();
        assert_eq!(options.store_config(), StoreConfig::default());
        assert!(!options.read_only);
    }

    #[test]
    fn builder_pattern() {
        let options = Options::new(Model::default())
            .max_readers(4)
            .async_max_queue_length(8)
            .async_enqueue_timeout(Duration::from_millis(50))
            .read_only(true);

        let config = options.store_config();
        assert_eq!(config.max_readers, 4);
        assert_eq!(config.async_max_queue_length, 8);
        assert_eq!(config.async_enqueue_timeout, Duration::from_millis(50));
        assert!(config.read_only);
    }
}
