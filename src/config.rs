//! Per-open reader configuration

use crate::core::{BatchPolicy, Layout};
use crate::error::{ConfigError, Result};
use crate::source::Backend;

/// Default size of one chunk pulled from a source
pub const DEFAULT_CHUNK_SIZE: usize = 0x80000;

/// Default number of sealed batches a worker may queue ahead of its consumer
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Options for opening a [`VcfReader`](crate::VcfReader)
///
/// Built fluently from [`ReaderConfig::default`]:
///
/// ```rust
/// use vcfstream::{Backend, BatchPolicy, ReaderConfig};
///
/// let config = ReaderConfig::default()
///     .with_backend(Backend::Mapped)
///     .with_policy(BatchPolicy::Bytes(1 << 20))
///     .store_samples(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderConfig {
    pub backend: Backend,
    pub chunk_size: usize,
    pub policy: BatchPolicy,
    pub store_samples: bool,
    pub self_contained: bool,
    pub light: bool,
    pub queue_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            chunk_size: DEFAULT_CHUNK_SIZE,
            policy: BatchPolicy::default(),
            store_samples: true,
            self_contained: true,
            light: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ReaderConfig {
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether sample columns are located and stored
    #[must_use]
    pub fn store_samples(mut self, store_samples: bool) -> Self {
        self.store_samples = store_samples;
        self
    }

    /// Whether every record owns its fields (`true`) or borrows them from its batch
    #[must_use]
    pub fn self_contained(mut self, self_contained: bool) -> Self {
        self.self_contained = self_contained;
        self
    }

    /// Whether data lines are batched unparsed
    #[must_use]
    pub fn light(mut self, light: bool) -> Self {
        self.light = light;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// The batch layout implied by the `light` and `self_contained` flags
    #[must_use]
    pub fn layout(&self) -> Layout {
        if self.light {
            Layout::Light
        } else if self.self_contained {
            Layout::Owned
        } else {
            Layout::Shared
        }
    }

    /// Checks that every size in the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize.into());
        }
        if self.policy.threshold() == 0 {
            return Err(ConfigError::ZeroBatchThreshold.into());
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.backend, Backend::Auto);
        assert_eq!(config.chunk_size, 0x80000);
        assert_eq!(config.policy, BatchPolicy::Records(1024));
        assert!(config.store_samples);
        assert_eq!(config.layout(), Layout::Owned);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layout_selection() {
        let config = ReaderConfig::default().self_contained(false);
        assert_eq!(config.layout(), Layout::Shared);
        assert_eq!(config.light(true).layout(), Layout::Light);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let cases = [
            (
                ReaderConfig::default().with_chunk_size(0),
                ConfigError::ZeroChunkSize,
            ),
            (
                ReaderConfig::default().with_policy(BatchPolicy::Bytes(0)),
                ConfigError::ZeroBatchThreshold,
            ),
            (
                ReaderConfig::default().with_queue_capacity(0),
                ConfigError::ZeroQueueCapacity,
            ),
        ];
        for (config, expected) in cases {
            match config.validate() {
                Err(Error::ConfigError(err)) => assert_eq!(err, expected),
                other => panic!("expected {expected:?}, got {other:?}"),
            }
        }
    }
}
