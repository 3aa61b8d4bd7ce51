use crate::cache::Cache;
use crate::config::{CacheConfiguration, IsolationLevel, Mode};
use crate::error::{CacheError, Result};
use crate::integration::{CacheLoader, CacheWriter};
use crate::manager::{CacheManager, OptionalFeature};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Configures and registers one cache of a [`CacheManager`].
///
/// Setters only record values; every check runs in [`build`](Self::build).
pub struct CacheBuilder<'m, K, V> {
    manager: &'m CacheManager,
    name: String,
    configuration: CacheConfiguration,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
}

impl<'m, K, V> CacheBuilder<'m, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(manager: &'m CacheManager, name: String, configuration: CacheConfiguration) -> Self {
        Self {
            manager,
            name,
            configuration,
            loader: None,
            writer: None,
        }
    }

    pub fn set_read_through(self, read_through: bool) -> Self {
        self.configuration.set_read_through(read_through);
        self
    }

    pub fn set_write_through(self, write_through: bool) -> Self {
        self.configuration.set_write_through(write_through);
        self
    }

    pub fn set_statistics_enabled(self, enabled: bool) -> Self {
        self.configuration.set_statistics_enabled(enabled);
        self
    }

    pub fn set_store_by_value(mut self, store_by_value: bool) -> Self {
        self.configuration.store_by_value(store_by_value);
        self
    }

    /// Declares the transactional pairing. Both `None` means not
    /// transactional; a mixed pairing is rejected by `build`.
    pub fn set_transaction_enabled(mut self, isolation_level: IsolationLevel, mode: Mode) -> Self {
        self.configuration.transaction(isolation_level, mode);
        self
    }

    /// Entries expire `expiry` after their last write.
    pub fn set_expiry(mut self, expiry: Duration) -> Self {
        self.configuration.expire_after(Some(expiry));
        self
    }

    pub fn set_cache_loader(mut self, loader: impl CacheLoader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn set_cache_writer(mut self, writer: impl CacheWriter<K, V> + 'static) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// Read access to what has been configured so far.
    pub fn configuration(&self) -> &CacheConfiguration {
        &self.configuration
    }

    /// Validates the configuration, then registers and starts the cache.
    ///
    /// # Errors
    ///
    /// - [`CacheError::IllegalArgument`] for a mismatched isolation level
    ///   and mode, or a zero expiry.
    /// - [`CacheError::InvalidConfiguration`] for a transactional cache on a
    ///   manager without transactions, or read/write-through without a
    ///   loader/writer.
    /// - [`CacheError::CacheAlreadyExists`] if the name is taken; the
    ///   registered cache is left untouched.
    /// - [`CacheError::IllegalState`] if the manager is shut down.
    pub fn build(self) -> Result<Arc<Cache<K, V>>> {
        self.configuration.validate()?;

        if self.configuration.is_transactional() && !self.manager.is_supported(OptionalFeature::Transactions) {
            return Err(CacheError::InvalidConfiguration(format!(
                "cache `{}` is transactional but manager `{}` has no user transaction",
                self.name,
                self.manager.name()
            )));
        }

        if self.configuration.is_read_through() && self.loader.is_none() {
            return Err(CacheError::InvalidConfiguration(format!(
                "cache `{}` is read-through but has no loader",
                self.name
            )));
        }

        if self.configuration.is_write_through() && self.writer.is_none() {
            return Err(CacheError::InvalidConfiguration(format!(
                "cache `{}` is write-through but has no writer",
                self.name
            )));
        }

        let cache = Cache::new(
            self.name,
            self.configuration,
            self.loader,
            self.writer,
            self.manager.metrics_config(),
            self.manager.backoff_config(),
        );

        self.manager.register(cache)
    }
}
