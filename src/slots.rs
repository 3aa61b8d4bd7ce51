use crate::core::backoff::BackoffConfig;
use crate::core::engine::CacheEngine;
use crate::core::entry::Entry;
use crate::core::key::Key;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::hash::Hash;
use std::sync::Arc;

/// Mutable part of a [`Slot`], guarded by the slot's lock.
#[derive(Debug)]
struct SlotState<V> {
    entry: Entry<V>,
    /// Set once the slot has been unlinked from the index. A thread that
    /// acquires a retired slot must look the key up again.
    retired: bool,
}

/// One key's entry and the lock that serializes every operation on it.
#[derive(Debug)]
struct Slot<K, V> {
    key: Key<K>,
    state: Mutex<SlotState<V>>,
}

impl<K, V> Slot<K, V> {
    fn vacant(key: Key<K>) -> Self {
        Self {
            key,
            state: Mutex::new(SlotState {
                entry: Entry::vacant(),
                retired: false,
            }),
        }
    }
}

type Index<K, V> = DashMap<Key<K>, Arc<Slot<K, V>>>;

/// A held slot lock.
///
/// Dropping it (including during unwinding out of user code) unlinks the
/// slot if its entry no longer has a live value.
struct SlotGuard<'a, K, V>
where
    K: Eq + Hash,
{
    index: &'a Index<K, V>,
    slot: &'a Arc<Slot<K, V>>,
    state: MutexGuard<'a, SlotState<V>>,
}

impl<K, V> Drop for SlotGuard<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if self.state.retired || self.state.entry.exists() {
            return;
        }

        // Lock order is always slot → index shard; the index shard is never
        // held while waiting on a slot.
        self.state.retired = true;
        self.state.entry.clear();
        self.index
            .remove_if(&self.slot.key, |_, current| Arc::ptr_eq(current, self.slot));
    }
}

/// Concurrent storage with one lock per key.
///
/// The index is a sharded `DashMap` from key to slot; shard locks are only
/// held long enough to find or insert a slot. All reads and writes of a
/// value happen under the slot's own `parking_lot::Mutex`, so a long-running
/// operation on one key blocks that key alone.
pub struct SlotTable<K, V>
where
    K: Eq + Hash,
{
    index: Index<K, V>,
    backoff_config: BackoffConfig,
}

impl<K, V> SlotTable<K, V>
where
    K: Eq + Hash,
{
    pub fn new(backoff_config: BackoffConfig) -> Self {
        Self {
            index: DashMap::new(),
            backoff_config,
        }
    }

    /// Number of indexed keys, including keys whose first writer is still
    /// running.
    #[inline]
    pub fn indexed(&self) -> usize {
        self.index.len()
    }

    fn run<F, R>(&self, slot: &Arc<Slot<K, V>>, f: F) -> Result<R, F>
    where
        F: FnOnce(&K, &mut Entry<V>) -> R,
    {
        let state = slot.state.lock();

        if state.retired {
            return Err(f);
        }

        let mut guard = SlotGuard {
            index: &self.index,
            slot,
            state,
        };

        Ok(f(slot.key.as_ref(), &mut guard.state.entry))
    }
}

impl<K, V> CacheEngine<K, V> for SlotTable<K, V>
where
    K: Eq + Hash,
{
    fn compute<F, R>(&self, key: K, f: F) -> R
    where
        F: FnOnce(&K, &mut Entry<V>) -> R,
    {
        let key = Key::new(key);
        let mut f = f;
        let mut backoff = self.backoff_config.build();

        loop {
            let slot = Arc::clone(
                self.index
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Slot::vacant(key.clone())))
                    .value(),
            );

            match self.run(&slot, f) {
                Ok(result) => return result,
                Err(passed) => {
                    log::trace!("slot retired while waiting, retrying");
                    backoff.snooze();
                    f = passed;
                }
            }
        }
    }

    fn compute_if_present<F, R>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&K, &mut Entry<V>) -> R,
    {
        let mut f = f;
        let mut backoff = self.backoff_config.build();

        loop {
            let slot = Arc::clone(self.index.get(key)?.value());

            match self.run(&slot, f) {
                Ok(result) => return Some(result),
                Err(passed) => {
                    log::trace!("slot retired while waiting, retrying");
                    backoff.snooze();
                    f = passed;
                }
            }
        }
    }

    fn keys(&self) -> Vec<Key<K>> {
        self.index.iter().map(|slot| slot.key().clone()).collect()
    }

    fn purge(&self) {
        self.index.clear();
    }
}
