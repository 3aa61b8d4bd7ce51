//! Plug points for an external backing store.
//!
//! Both callbacks run synchronously inside the per-key critical section of
//! the operation that triggered them, so the store sees writes to one key in
//! the same order the cache applies them.
use crate::error::BoxError;

/// Supplies values for keys missing from a read-through cache.
pub trait CacheLoader<K, V>: Send + Sync {
    /// Returns `Ok(None)` when the store has no value for `key` either.
    fn load(&self, key: &K) -> Result<Option<V>, BoxError>;
}

impl<K, V, F> CacheLoader<K, V> for F
where
    F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync,
{
    fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
        self(key)
    }
}

/// Receives every mutation of a write-through cache before it is applied.
///
/// An error from either method aborts the mutation: the cache entry is left
/// as it was and the caller gets [`CacheError::Writer`](crate::CacheError::Writer).
pub trait CacheWriter<K, V>: Send + Sync {
    fn write(&self, key: &K, value: &V) -> Result<(), BoxError>;

    fn delete(&self, key: &K) -> Result<(), BoxError>;
}
