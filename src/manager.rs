use crate::builder::CacheBuilder;
use crate::cache::Cache;
use crate::config::CacheConfiguration;
use crate::core::backoff::BackoffConfig;
use crate::error::{CacheError, Result};
use crate::metrics::MetricsConfig;
use crate::status::Status;
use crate::transaction::UserTransaction;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Capabilities a manager may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalFeature {
    /// Transactional caches; requires a [`UserTransaction`] handle.
    Transactions,
    /// Caches configured with store-by-value turned off.
    StoreByReference,
}

mod sealed {
    /// Lifecycle hooks only the owning manager may call.
    pub trait Halt {
        /// Stops the cache whatever its current state.
        fn halt(&self);
    }
}

use sealed::Halt;

/// The type-erased face of a [`Cache`], as seen through [`Caches`].
///
/// Implemented only by [`Cache`].
pub trait ManagedCache: Halt + Send + Sync {
    fn name(&self) -> &str;

    fn status(&self) -> Status;

    fn configuration(&self) -> &CacheConfiguration;

    /// See [`Cache::stop`].
    fn stop(&self) -> Result<()>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<K, V> ManagedCache for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Cache::name(self)
    }

    fn status(&self) -> Status {
        Cache::status(self)
    }

    fn configuration(&self) -> &CacheConfiguration {
        Cache::configuration(self)
    }

    fn stop(&self) -> Result<()> {
        Cache::stop(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<K, V> Halt for Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn halt(&self) {
        Cache::halt(self)
    }
}

/// A read-only snapshot of a manager's caches.
///
/// Membership is fixed when [`CacheManager::caches`] is called: caches
/// removed before that call are absent, caches created or removed after it
/// do not change this snapshot, however many times it is iterated. There is
/// no way to mutate the manager through it.
#[derive(Clone, Default)]
pub struct Caches {
    caches: Vec<Arc<dyn ManagedCache>>,
}

impl Caches {
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn ManagedCache>> {
        self.caches.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.caches.iter().map(|cache| cache.name()).collect()
    }
}

impl<'a> IntoIterator for &'a Caches {
    type Item = &'a Arc<dyn ManagedCache>;
    type IntoIter = std::slice::Iter<'a, Arc<dyn ManagedCache>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for Caches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Builder for a [`CacheManager`].
#[derive(Default)]
pub struct CacheManagerBuilder {
    name: Option<String>,
    user_transaction: Option<Arc<dyn UserTransaction>>,
    metrics_config: MetricsConfig,
    backoff_config: BackoffConfig,
}

impl CacheManagerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enables [`OptionalFeature::Transactions`].
    pub fn user_transaction(mut self, user_transaction: Arc<dyn UserTransaction>) -> Self {
        self.user_transaction = Some(user_transaction);
        self
    }

    /// Statistics sizing applied to every cache of the manager.
    pub fn metrics_config(mut self, metrics_config: MetricsConfig) -> Self {
        self.metrics_config = metrics_config;
        self
    }

    /// Backoff used when a key's slot is retired under a waiting operation.
    pub fn backoff_config(mut self, backoff_config: BackoffConfig) -> Self {
        self.backoff_config = backoff_config;
        self
    }

    pub fn build(self) -> CacheManager {
        let name = self
            .name
            .unwrap_or_else(|| CacheManager::DEFAULT_NAME.to_string());
        log::debug!("cache manager `{name}` started");

        CacheManager {
            name,
            lifecycle: RwLock::new(Status::Started),
            caches: DashMap::new(),
            user_transaction: self.user_transaction,
            metrics_config: self.metrics_config,
            backoff_config: self.backoff_config,
        }
    }
}

/// Owns a named set of caches and their shared lifecycle.
///
/// A manager starts in [`Status::Started`] and can be shut down once.
/// Registry operations (create, look up, remove) take the lifecycle lock in
/// shared mode and the registry's own shard locks; they never touch per-key
/// cache locks, so they are not held up by slow entry processors.
pub struct CacheManager {
    name: String,
    /// Held exclusively only by `shutdown`.
    lifecycle: RwLock<Status>,
    caches: DashMap<String, Arc<dyn ManagedCache>>,
    user_transaction: Option<Arc<dyn UserTransaction>>,
    metrics_config: MetricsConfig,
    backoff_config: BackoffConfig,
}

impl CacheManager {
    pub const DEFAULT_NAME: &'static str = "default";

    /// A started manager with default settings and no transaction support.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder().name(name).build()
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::default()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        *self.lifecycle.read()
    }

    /// Starts building a cache called `name`.
    ///
    /// Name uniqueness and the manager's state are checked by
    /// [`CacheBuilder::build`].
    pub fn create_cache_builder<K, V>(&self, name: impl Into<String>) -> Result<CacheBuilder<'_, K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(CacheError::NullArgument("name"));
        }

        Ok(CacheBuilder::new(self, name, self.create_cache_configuration()))
    }

    /// A fresh default configuration, independent of every other instance.
    pub fn create_cache_configuration(&self) -> CacheConfiguration {
        CacheConfiguration::new()
    }

    /// Looks up a cache by name.
    ///
    /// Returns `Ok(None)` for an unknown name and
    /// [`CacheError::IncompatibleTypes`] if the cache was built with other
    /// key or value types.
    pub fn get_cache<K, V>(&self, name: &str) -> Result<Option<Arc<Cache<K, V>>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(CacheError::NullArgument("name"));
        }

        let lifecycle = self.lifecycle.read();
        Self::ensure_started(*lifecycle)?;

        let Some(cache) = self.caches.get(name).map(|cache| Arc::clone(cache.value())) else {
            return Ok(None);
        };

        cache
            .into_any()
            .downcast::<Cache<K, V>>()
            .map(Some)
            .map_err(|_| CacheError::IncompatibleTypes(name.to_string()))
    }

    /// Unregisters and stops the cache called `name`. Returns whether one
    /// was registered.
    pub fn remove_cache(&self, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Err(CacheError::NullArgument("name"));
        }

        let lifecycle = self.lifecycle.read();
        Self::ensure_started(*lifecycle)?;

        match self.caches.remove(name) {
            Some((_, cache)) => {
                cache.halt();
                log::debug!("cache `{name}` removed from manager `{}`", self.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Snapshot of the registered caches. Empty once the manager is shut
    /// down.
    pub fn caches(&self) -> Caches {
        let caches = self
            .caches
            .iter()
            .map(|cache| Arc::clone(cache.value()))
            .collect();

        Caches { caches }
    }

    /// Stops every cache, empties the registry and stops the manager.
    ///
    /// Fails with [`CacheError::IllegalState`] on a manager that is already
    /// stopped.
    pub fn shutdown(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        Self::ensure_started(*lifecycle)?;
        *lifecycle = Status::Stopped;

        let names = self
            .caches
            .iter()
            .map(|cache| cache.key().clone())
            .collect::<Vec<_>>();

        for name in names {
            if let Some((_, cache)) = self.caches.remove(&name) {
                cache.halt();
            }
        }

        log::debug!("cache manager `{}` shut down", self.name);
        Ok(())
    }

    pub fn is_supported(&self, feature: OptionalFeature) -> bool {
        match feature {
            OptionalFeature::Transactions => self.user_transaction.is_some(),
            OptionalFeature::StoreByReference => true,
        }
    }

    /// The transaction handle, if the manager supports transactions.
    pub fn user_transaction(&self) -> Result<Arc<dyn UserTransaction>> {
        self.user_transaction
            .clone()
            .ok_or(CacheError::UnsupportedOperation("transactions"))
    }

    /// Adds `cache` to the registry and starts it.
    pub(crate) fn register<K, V>(&self, cache: Cache<K, V>) -> Result<Arc<Cache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let lifecycle = self.lifecycle.read();
        Self::ensure_started(*lifecycle)?;

        match self.caches.entry(cache.name().to_string()) {
            MapEntry::Occupied(occupied) => Err(CacheError::CacheAlreadyExists(occupied.key().clone())),
            MapEntry::Vacant(vacant) => {
                let cache = Arc::new(cache);
                cache.start()?;
                vacant.insert(Arc::clone(&cache) as Arc<dyn ManagedCache>);
                log::debug!("cache `{}` created in manager `{}`", cache.name(), self.name);
                Ok(cache)
            }
        }
    }

    pub(crate) fn metrics_config(&self) -> MetricsConfig {
        self.metrics_config
    }

    pub(crate) fn backoff_config(&self) -> BackoffConfig {
        self.backoff_config
    }

    #[inline]
    fn ensure_started(status: Status) -> Result<()> {
        match status {
            Status::Started => Ok(()),
            status => Err(CacheError::manager_state(status)),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("caches", &self.caches())
            .field("transactions", &self.user_transaction.is_some())
            .finish()
    }
}
