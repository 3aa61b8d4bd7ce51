use crate::core::entry::Entry;
use crate::core::key::Key;
use std::hash::Hash;

/// Concurrent key → [`Entry`] storage with per-key exclusive access.
///
/// Every closure passed to an engine runs while holding the lock of exactly
/// one key. Closures for the same key are serialized in lock-acquisition
/// order; closures for different keys never wait on each other.
///
/// After a closure returns (or unwinds), an entry left without a live value
/// is unlinked from the engine, so a key with no entry and a key with an
/// empty entry are indistinguishable.
pub trait CacheEngine<K, V>
where
    K: Eq + Hash,
{
    /// Runs `f` against the entry for `key`, creating an empty entry first
    /// if the key is not present.
    fn compute<F, R>(&self, key: K, f: F) -> R
    where
        F: FnOnce(&K, &mut Entry<V>) -> R;

    /// Runs `f` against the entry for `key` only if one is present.
    ///
    /// Returns `None` without taking any per-key lock when the key is absent.
    fn compute_if_present<F, R>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&K, &mut Entry<V>) -> R;

    /// Snapshot of the keys indexed at the time of the call.
    ///
    /// Keys whose first writer is still running may be included; their
    /// entries are empty until that writer commits.
    fn keys(&self) -> Vec<Key<K>>;

    /// Unlinks every entry without visiting them.
    fn purge(&self);
}
