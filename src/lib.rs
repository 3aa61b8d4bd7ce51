//! An in-process, multi-cache key/value store.
//!
//! A [`CacheManager`] owns named [`Cache`]s and their lifecycle. Each cache
//! serializes the operations on one key behind that key's own lock, so
//! compare-and-swap style calls and [`Cache::invoke`] run atomically while
//! unrelated keys proceed in parallel.
//!
//! ```
//! use keystore_cache::CacheManager;
//!
//! let manager = CacheManager::new("app");
//! let cache = manager
//!     .create_cache_builder::<String, u64>("visits")?
//!     .set_statistics_enabled(true)
//!     .build()?;
//!
//! cache.put("home".to_string(), 1)?;
//! let total = cache.invoke("home".to_string(), |entry| {
//!     let next = entry.value().copied().unwrap_or(0) + 1;
//!     entry.set_value(next);
//!     Ok::<_, std::convert::Infallible>(next)
//! })?;
//!
//! assert_eq!(total, 2);
//! assert_eq!(cache.statistics().puts(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub use crate::builder::CacheBuilder;
pub use crate::cache::Cache;
pub use crate::config::{CacheConfiguration, IsolationLevel, Mode, validate_transaction};
pub use crate::core::backoff::{BackoffConfig, BackoffPolicy};
pub use crate::core::handler::MutableEntry;
pub use crate::error::{BoxError, CacheError, InvokeError, Result};
pub use crate::factory::CacheManagerFactory;
pub use crate::integration::{CacheLoader, CacheWriter};
pub use crate::manager::{CacheManager, CacheManagerBuilder, Caches, ManagedCache, OptionalFeature};
pub use crate::metrics::{CacheStatistics, LatencyPercentile, MetricsConfig};
pub use crate::processor::EntryProcessor;
pub use crate::status::Status;
pub use crate::transaction::{TransactionStatus, UserTransaction};

mod builder;
mod cache;
mod config;
mod error;
mod factory;
mod integration;
mod manager;
mod processor;
mod slots;
mod status;
mod transaction;

pub mod core;
pub mod metrics;
