use crate::error::{CacheError, Result};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::time::Duration;

/// Transactional isolation a cache declares to the transaction coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Not transactional.
    #[default]
    None,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Locking strategy a transactional cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Not transactional.
    #[default]
    None,
    /// Transactions local to this manager.
    Local,
    /// Distributed (XA) transactions.
    Xa,
}

/// Checks that an isolation level and mode describe the same thing:
/// either both `None` or both transactional.
pub fn validate_transaction(isolation: IsolationLevel, mode: Mode) -> Result<()> {
    match (isolation, mode) {
        (IsolationLevel::None, Mode::None) => Ok(()),
        (IsolationLevel::None, mode) => Err(CacheError::IllegalArgument(format!(
            "transaction mode {mode:?} requires an isolation level other than None"
        ))),
        (isolation, Mode::None) => Err(CacheError::IllegalArgument(format!(
            "isolation level {isolation:?} requires a transaction mode other than None"
        ))),
        _ => Ok(()),
    }
}

/// Behaviour flags of one cache.
///
/// Read-through, write-through and statistics can be toggled on a live
/// cache through [`Cache::configuration`](crate::Cache::configuration);
/// the remaining settings are fixed once the cache is built.
///
/// Every instance is independent: cloning copies the current flag values
/// into new storage. Equality compares fields.
pub struct CacheConfiguration {
    read_through: AtomicBool,
    write_through: AtomicBool,
    statistics_enabled: AtomicBool,
    store_by_value: bool,
    isolation_level: IsolationLevel,
    mode: Mode,
    expiry: Option<Duration>,
}

impl CacheConfiguration {
    pub fn new() -> Self {
        Self {
            read_through: AtomicBool::new(false),
            write_through: AtomicBool::new(false),
            statistics_enabled: AtomicBool::new(false),
            store_by_value: true,
            isolation_level: IsolationLevel::None,
            mode: Mode::None,
            expiry: None,
        }
    }

    #[inline]
    pub fn is_read_through(&self) -> bool {
        self.read_through.load(Acquire)
    }

    #[inline]
    pub fn set_read_through(&self, read_through: bool) {
        self.read_through.store(read_through, Release);
    }

    #[inline]
    pub fn is_write_through(&self) -> bool {
        self.write_through.load(Acquire)
    }

    #[inline]
    pub fn set_write_through(&self, write_through: bool) {
        self.write_through.store(write_through, Release);
    }

    #[inline]
    pub fn is_statistics_enabled(&self) -> bool {
        self.statistics_enabled.load(Acquire)
    }

    #[inline]
    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.statistics_enabled.store(enabled, Release);
    }

    /// Values are moved in on write and cloned out on read, so the cache
    /// never shares a value with a caller whichever way this is set.
    #[inline]
    pub fn is_store_by_value(&self) -> bool {
        self.store_by_value
    }

    #[inline]
    pub fn transaction_isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    #[inline]
    pub fn transaction_mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn is_transactional(&self) -> bool {
        self.mode != Mode::None
    }

    /// Time-to-live measured from the last write of an entry.
    #[inline]
    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }

    pub(crate) fn store_by_value(&mut self, store_by_value: bool) {
        self.store_by_value = store_by_value;
    }

    pub(crate) fn transaction(&mut self, isolation_level: IsolationLevel, mode: Mode) {
        self.isolation_level = isolation_level;
        self.mode = mode;
    }

    pub(crate) fn expire_after(&mut self, expiry: Option<Duration>) {
        self.expiry = expiry;
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_transaction(self.isolation_level, self.mode)?;

        if self.expiry.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::IllegalArgument(
                "expiry must be longer than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheConfiguration {
    fn clone(&self) -> Self {
        Self {
            read_through: AtomicBool::new(self.is_read_through()),
            write_through: AtomicBool::new(self.is_write_through()),
            statistics_enabled: AtomicBool::new(self.is_statistics_enabled()),
            store_by_value: self.store_by_value,
            isolation_level: self.isolation_level,
            mode: self.mode,
            expiry: self.expiry,
        }
    }
}

impl PartialEq for CacheConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.is_read_through() == other.is_read_through()
            && self.is_write_through() == other.is_write_through()
            && self.is_statistics_enabled() == other.is_statistics_enabled()
            && self.store_by_value == other.store_by_value
            && self.isolation_level == other.isolation_level
            && self.mode == other.mode
            && self.expiry == other.expiry
    }
}

impl Eq for CacheConfiguration {}

impl fmt::Debug for CacheConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfiguration")
            .field("read_through", &self.is_read_through())
            .field("write_through", &self.is_write_through())
            .field("statistics_enabled", &self.is_statistics_enabled())
            .field("store_by_value", &self.store_by_value)
            .field("isolation_level", &self.isolation_level)
            .field("mode", &self.mode)
            .field("expiry", &self.expiry)
            .finish()
    }
}
