use crate::error::Result;
use crate::manager::{CacheManager, CacheManagerBuilder};
use crate::status::Status;
use dashmap::DashMap;
use std::sync::Arc;

/// A caller-owned registry of named cache managers.
///
/// Hands out one shared manager per name; a manager that was shut down is
/// replaced by a fresh one on the next lookup. There is no process-wide
/// instance: create a factory where the application boots and pass it
/// along.
pub struct CacheManagerFactory {
    managers: DashMap<String, Arc<CacheManager>>,
    configure: Box<dyn Fn(CacheManagerBuilder) -> CacheManagerBuilder + Send + Sync>,
}

impl CacheManagerFactory {
    pub fn new() -> Self {
        Self::with_builder(|builder| builder)
    }

    /// A factory that runs `configure` on the builder of every manager it
    /// creates; the manager's name is set before `configure` runs.
    pub fn with_builder<F>(configure: F) -> Self
    where
        F: Fn(CacheManagerBuilder) -> CacheManagerBuilder + Send + Sync + 'static,
    {
        Self {
            managers: DashMap::new(),
            configure: Box::new(configure),
        }
    }

    /// The started manager called `name`, created on first use.
    pub fn manager(&self, name: &str) -> Arc<CacheManager> {
        let mut slot = self.managers.entry(name.to_string()).or_insert_with(|| self.create(name));

        if slot.status() != Status::Started {
            log::debug!("replacing stopped cache manager `{name}`");
            *slot = self.create(name);
        }

        Arc::clone(slot.value())
    }

    pub fn default_manager(&self) -> Arc<CacheManager> {
        self.manager(CacheManager::DEFAULT_NAME)
    }

    /// Shuts down and forgets the manager called `name`. Returns whether
    /// one was registered.
    ///
    /// A manager that was already shut down through its own handle is
    /// forgotten without error.
    pub fn close_manager(&self, name: &str) -> Result<bool> {
        match self.managers.remove(name) {
            Some((_, manager)) => {
                Self::shutdown(&manager)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Shuts down and forgets every manager.
    pub fn close(&self) -> Result<()> {
        let names = self
            .managers
            .iter()
            .map(|manager| manager.key().clone())
            .collect::<Vec<_>>();

        for name in names {
            self.close_manager(&name)?;
        }
        Ok(())
    }

    fn create(&self, name: &str) -> Arc<CacheManager> {
        Arc::new((self.configure)(CacheManager::builder().name(name)).build())
    }

    fn shutdown(manager: &CacheManager) -> Result<()> {
        match manager.status() {
            Status::Started => manager.shutdown(),
            _ => Ok(()),
        }
    }
}

impl Default for CacheManagerFactory {
    fn default() -> Self {
        Self::new()
    }
}
