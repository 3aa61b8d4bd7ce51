use crate::config::CacheConfiguration;
use crate::core::backoff::BackoffConfig;
use crate::core::engine::CacheEngine;
use crate::core::entry::Entry;
use crate::core::handler::{MutableEntry, Mutation};
use crate::error::{CacheError, InvokeError, Result};
use crate::integration::{CacheLoader, CacheWriter};
use crate::metrics::{CacheStatistics, Metrics, MetricsConfig};
use crate::processor::EntryProcessor;
use crate::slots::SlotTable;
use crate::status::{AtomicStatus, Status};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

/// A named key/value cache owned by a [`CacheManager`](crate::CacheManager).
///
/// Every single-key operation runs under that key's lock, so operations on
/// one key are linearizable and compare-and-swap variants cannot be
/// interleaved with another writer. Operations on different keys run in
/// parallel. Bulk operations are a sequence of single-key operations with no
/// atomicity across keys.
///
/// Every operation fails with [`CacheError::IllegalState`] unless the cache
/// is [`Status::Started`].
pub struct Cache<K, V>
where
    K: Eq + Hash,
{
    name: String,
    status: AtomicStatus,
    configuration: CacheConfiguration,
    engine: SlotTable<K, V>,
    metrics: Metrics,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(
        name: String,
        configuration: CacheConfiguration,
        loader: Option<Arc<dyn CacheLoader<K, V>>>,
        writer: Option<Arc<dyn CacheWriter<K, V>>>,
        metrics_config: MetricsConfig,
        backoff_config: BackoffConfig,
    ) -> Self {
        Self {
            name,
            status: AtomicStatus::new(Status::Uninitialized),
            configuration,
            engine: SlotTable::new(backoff_config),
            metrics: Metrics::new(metrics_config),
            loader,
            writer,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.status.load()
    }

    /// The live configuration; flag changes made through it apply to
    /// subsequent operations.
    #[inline]
    pub fn configuration(&self) -> &CacheConfiguration {
        &self.configuration
    }

    /// Returns the value for `key`.
    ///
    /// On a miss with read-through enabled the loader is consulted under
    /// the key's lock and a loaded value is stored before being returned.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_started()?;
        let started = Instant::now();

        let value = match self.read_through_loader() {
            Some(loader) => self.engine.compute(key.clone(), |key, entry| -> Result<Option<V>> {
                if let Some(value) = self.read(entry) {
                    return Ok(Some(value));
                }

                let loaded = loader.load(key).map_err(|error| {
                    log::warn!("loader failed for cache `{}`: {error}", self.name);
                    CacheError::Loader(error)
                })?;

                if let Some(value) = &loaded {
                    entry.set(value.clone(), self.deadline());
                    self.record(Metrics::record_put);
                }

                Ok(loaded)
            })?,
            None => self
                .engine
                .compute_if_present(key, |_, entry| self.read(entry))
                .unwrap_or_else(|| {
                    self.record(Metrics::record_miss);
                    None
                }),
        };

        self.record_latency(started);
        Ok(value)
    }

    /// Returns `true` if `key` has a live value. Never loads.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_started()?;

        Ok(self
            .engine
            .compute_if_present(key, |_, entry| {
                self.expire(entry);
                entry.exists()
            })
            .unwrap_or(false))
    }

    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.get_and_put(key, value).map(|_| ())
    }

    /// Stores `value`, returning the value it replaced.
    pub fn get_and_put(&self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_started()?;
        let started = Instant::now();

        let previous = self.engine.compute(key, |key, entry| {
            self.expire(entry);
            self.store(key, entry, value)
        })?;

        self.record_latency(started);
        Ok(previous)
    }

    /// Stores `value` only if `key` has no live value. Returns whether it
    /// was stored.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<bool> {
        self.ensure_started()?;

        self.engine.compute(key, |key, entry| {
            self.expire(entry);
            if entry.exists() {
                return Ok(false);
            }
            self.store(key, entry, value).map(|_| true)
        })
    }

    /// Replaces the value of `key` only if it has one.
    pub fn replace(&self, key: &K, value: V) -> Result<bool> {
        self.get_and_replace(key, value).map(|previous| previous.is_some())
    }

    /// Replaces the value of `key` only if it has one, returning the old
    /// value.
    pub fn get_and_replace(&self, key: &K, value: V) -> Result<Option<V>> {
        self.ensure_started()?;

        self.engine
            .compute_if_present(key, |key, entry| {
                self.expire(entry);
                if !entry.exists() {
                    return Ok(None);
                }
                self.store(key, entry, value)
            })
            .unwrap_or(Ok(None))
    }

    /// Replaces the value of `key` with `new` only if it currently equals
    /// `expected`. The comparison and the write are one atomic step.
    pub fn replace_if_equals(&self, key: &K, expected: &V, new: V) -> Result<bool>
    where
        V: PartialEq,
    {
        self.ensure_started()?;

        self.engine
            .compute_if_present(key, |key, entry| {
                self.expire(entry);
                if entry.value() != Some(expected) {
                    return Ok(false);
                }
                self.store(key, entry, new).map(|_| true)
            })
            .unwrap_or(Ok(false))
    }

    pub fn remove(&self, key: &K) -> Result<bool> {
        self.get_and_remove(key).map(|previous| previous.is_some())
    }

    /// Removes `key`, returning the value it held.
    pub fn get_and_remove(&self, key: &K) -> Result<Option<V>> {
        self.ensure_started()?;

        self.engine
            .compute_if_present(key, |key, entry| {
                self.expire(entry);
                if !entry.exists() {
                    return Ok(None);
                }
                self.erase(key, entry)
            })
            .unwrap_or(Ok(None))
    }

    /// Removes `key` only if its value currently equals `expected`. The
    /// comparison and the removal are one atomic step.
    pub fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        self.ensure_started()?;

        self.engine
            .compute_if_present(key, |key, entry| {
                self.expire(entry);
                if entry.value() != Some(expected) {
                    return Ok(false);
                }
                self.erase(key, entry).map(|_| true)
            })
            .unwrap_or(Ok(false))
    }

    /// Looks up every key in turn. Missing keys are left out of the result.
    pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, V>>
    where
        I: IntoIterator<Item = K>,
    {
        self.ensure_started()?;

        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(&key)? {
                found.insert(key, value);
            }
        }
        Ok(found)
    }

    /// Stores every pair in turn; stops at the first failure.
    pub fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.ensure_started()?;

        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Removes every listed key in turn; stops at the first failure.
    pub fn remove_all<I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Borrow<K>,
    {
        self.ensure_started()?;

        for key in keys {
            self.remove(key.borrow())?;
        }
        Ok(())
    }

    /// Removes every key present when the call starts.
    ///
    /// Writes racing with this call may survive it; each key is removed
    /// atomically but not all keys at once.
    pub fn clear(&self) -> Result<()> {
        self.ensure_started()?;

        for key in self.engine.keys() {
            self.remove(key.as_ref())?;
        }
        Ok(())
    }

    /// Runs `processor` against `key` with exclusive access to its entry.
    ///
    /// Changes made through the [`MutableEntry`] are applied when the
    /// processor returns `Ok`, and discarded entirely when it returns `Err`
    /// or panics; in either failure case the entry is left exactly as it
    /// was. Other operations on `key` wait until the processor finishes.
    pub fn invoke<F, R, E>(&self, key: K, processor: F) -> Result<R, InvokeError<E>>
    where
        F: FnOnce(&mut MutableEntry<'_, K, V>) -> Result<R, E>,
    {
        self.ensure_started()?;
        let started = Instant::now();

        let outcome = self.engine.compute(key, |key, entry| -> Result<R, InvokeError<E>> {
            self.expire(entry);

            let mut view = MutableEntry::new(key, entry.value());
            let output = processor(&mut view).map_err(InvokeError::Processor)?;

            match view.into_mutation() {
                None => {}
                Some(Mutation::Set(value)) => {
                    self.store(key, entry, value)?;
                }
                Some(Mutation::Remove) => {
                    self.erase(key, entry)?;
                }
            }

            Ok(output)
        });

        self.record_latency(started);
        outcome
    }

    /// [`invoke`](Self::invoke) for a named [`EntryProcessor`].
    pub fn invoke_processor<P>(&self, key: K, processor: P) -> Result<P::Output, InvokeError<P::Error>>
    where
        P: EntryProcessor<K, V>,
    {
        self.invoke(key, |entry| processor.process(entry))
    }

    /// Snapshot of the keys with a live value.
    pub fn keys(&self) -> Result<Vec<K>> {
        self.ensure_started()?;

        Ok(self
            .engine
            .keys()
            .into_iter()
            .filter_map(|key| {
                self.engine
                    .compute_if_present(key.as_ref(), |key, entry| {
                        self.expire(entry);
                        entry.exists().then(|| key.clone())
                    })
                    .flatten()
            })
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        self.keys().map(|keys| keys.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Statistics recorded while statistics were enabled.
    pub fn statistics(&self) -> CacheStatistics {
        self.metrics.snapshot()
    }

    pub fn clear_statistics(&self) {
        self.metrics.reset();
    }

    /// Stops the cache and drops its entries.
    ///
    /// Fails with [`CacheError::IllegalState`] if the cache is not started.
    pub fn stop(&self) -> Result<()> {
        self.status
            .transition(Status::Started, Status::Stopped)
            .map_err(CacheError::cache_state)?;

        self.engine.purge();
        log::debug!("cache `{}` stopped", self.name);
        Ok(())
    }

    pub(crate) fn start(&self) -> Result<()> {
        self.status
            .transition(Status::Uninitialized, Status::Started)
            .map_err(CacheError::cache_state)?;

        log::debug!("cache `{}` started", self.name);
        Ok(())
    }

    /// Stops the cache whatever its current state.
    pub(crate) fn halt(&self) {
        if self.status.stop() != Status::Stopped {
            self.engine.purge();
            log::debug!("cache `{}` stopped by its manager", self.name);
        }
    }

    #[inline]
    fn ensure_started(&self) -> Result<()> {
        match self.status.load() {
            Status::Started => Ok(()),
            status => Err(CacheError::cache_state(status)),
        }
    }

    fn read_through_loader(&self) -> Option<&Arc<dyn CacheLoader<K, V>>> {
        self.loader
            .as_ref()
            .filter(|_| self.configuration.is_read_through())
    }

    fn write_through_writer(&self) -> Option<&Arc<dyn CacheWriter<K, V>>> {
        self.writer
            .as_ref()
            .filter(|_| self.configuration.is_write_through())
    }

    #[inline]
    fn deadline(&self) -> Option<Instant> {
        self.configuration
            .expiry()
            .map(|expiry| Instant::now() + expiry)
    }

    /// Reads the live value, recording a hit or a miss.
    fn read(&self, entry: &mut Entry<V>) -> Option<V> {
        self.expire(entry);

        match entry.value() {
            Some(value) => {
                self.record(Metrics::record_hit);
                Some(value.clone())
            }
            None => {
                self.record(Metrics::record_miss);
                None
            }
        }
    }

    /// Writes through (if enabled), then stores `value`.
    fn store(&self, key: &K, entry: &mut Entry<V>, value: V) -> Result<Option<V>> {
        if let Some(writer) = self.write_through_writer() {
            writer.write(key, &value).map_err(|error| {
                log::warn!("writer failed to store into cache `{}`: {error}", self.name);
                CacheError::Writer(error)
            })?;
        }

        let previous = entry.set(value, self.deadline());
        self.record(Metrics::record_put);
        Ok(previous)
    }

    /// Deletes through (if enabled), then clears the entry.
    fn erase(&self, key: &K, entry: &mut Entry<V>) -> Result<Option<V>> {
        if let Some(writer) = self.write_through_writer() {
            writer.delete(key).map_err(|error| {
                log::warn!("writer failed to delete from cache `{}`: {error}", self.name);
                CacheError::Writer(error)
            })?;
        }

        let previous = entry.clear();
        self.record(Metrics::record_removal);
        Ok(previous)
    }

    #[inline]
    fn expire(&self, entry: &mut Entry<V>) {
        if entry.purge_expired() {
            self.record(Metrics::record_expiration);
        }
    }

    #[inline]
    fn record(&self, event: fn(&Metrics)) {
        if self.configuration.is_statistics_enabled() {
            event(&self.metrics);
        }
    }

    #[inline]
    fn record_latency(&self, started: Instant) {
        if self.configuration.is_statistics_enabled() {
            let micros = started.elapsed().as_micros().max(1);
            self.metrics
                .record_latency(u64::try_from(micros).unwrap_or(u64::MAX));
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("status", &self.status.load())
            .field("configuration", &self.configuration)
            .field("indexed", &self.engine.indexed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::manager::CacheManager;
    use fake::Fake;
    use fake::faker::lorem::en::Word;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;
    use std::time::Duration;

    const KEY: u32 = 123;
    const HOLD: Duration = Duration::from_millis(100);
    const START_GAP: Duration = Duration::from_millis(10);

    fn started_cache() -> Arc<Cache<u32, String>> {
        CacheManager::new("test")
            .create_cache_builder("cache")
            .unwrap()
            .build()
            .unwrap()
    }

    fn seeded_cache() -> Arc<Cache<u32, String>> {
        let cache = started_cache();
        cache.put(KEY, "a1".to_string()).unwrap();
        cache
    }

    fn random_word() -> String {
        Word().fake()
    }

    /// Replaces the value of `KEY` after holding its lock for `hold`.
    /// Returns the value it saw and when its logic finished.
    fn swap_slowly(cache: &Cache<u32, String>, new: &str, hold: Duration) -> (Option<String>, Instant) {
        cache
            .invoke(KEY, |entry| {
                let seen = entry.value().cloned();
                thread::sleep(hold);
                entry.set_value(new.to_string());
                Ok::<_, Infallible>((seen, Instant::now()))
            })
            .unwrap()
    }

    /// Starts a slow processor that swaps `KEY` to `a2`, then runs `second`
    /// while the processor still holds the key. Asserts that `second` only
    /// completed after the processor.
    fn after_slow_processor<R, F>(cache: &Cache<u32, String>, second: F) -> (Option<String>, R)
    where
        F: FnOnce(&Cache<u32, String>) -> R + Send,
        R: Send,
    {
        thread::scope(|scope| {
            let first = scope.spawn(|| swap_slowly(cache, "a2", HOLD));
            thread::sleep(START_GAP);
            let second = scope.spawn(move || {
                let result = second(cache);
                (result, Instant::now())
            });

            let (seen, first_done) = first.join().unwrap();
            let (result, second_done) = second.join().unwrap();

            assert!(second_done >= first_done);
            (seen, result)
        })
    }

    #[test]
    fn test_invoke_no_value_no_mutation() {
        let cache = started_cache();

        let result = cache.invoke(KEY, |entry| {
            assert!(!entry.exists());
            Ok::<_, Infallible>("ret")
        });

        assert_eq!(result.unwrap(), "ret");
        assert!(!cache.contains_key(&KEY).unwrap());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_invoke_no_value_set_value() {
        let cache = started_cache();
        let value = random_word();

        let result = cache.invoke(KEY, |entry| {
            assert!(!entry.exists());
            entry.set_value(value.clone());
            assert!(entry.exists());
            Ok::<_, Infallible>("ret")
        });

        assert_eq!(result.unwrap(), "ret");
        assert_eq!(cache.get(&KEY).unwrap(), Some(value));
    }

    #[test]
    fn test_invoke_no_value_error_discards_set() {
        let cache = started_cache();

        let result = cache.invoke(KEY, |entry| {
            entry.set_value("new".to_string());
            assert!(entry.exists());
            Err::<(), _>("processor failed")
        });

        assert_eq!(result.unwrap_err().into_processor_error(), Some("processor failed"));
        assert!(!cache.contains_key(&KEY).unwrap());
    }

    #[test]
    fn test_invoke_existing_replace() {
        let cache = seeded_cache();

        let result = cache.invoke(KEY, |entry| {
            let old = entry.value().cloned();
            entry.set_value("a2".to_string());
            assert_eq!(entry.value().map(String::as_str), Some("a2"));
            Ok::<_, Infallible>(old)
        });

        assert_eq!(result.unwrap().as_deref(), Some("a1"));
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a2"));
    }

    #[test]
    fn test_invoke_existing_error_keeps_value() {
        let cache = seeded_cache();

        let result = cache.invoke(KEY, |entry| {
            entry.set_value("a2".to_string());
            Err::<(), _>("processor failed")
        });

        assert!(matches!(result, Err(InvokeError::Processor("processor failed"))));
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a1"));
    }

    #[test]
    fn test_invoke_remove_missing() {
        let cache = started_cache();

        let result = cache.invoke(KEY, |entry| {
            entry.set_value("a1".to_string());
            assert!(entry.exists());
            entry.remove();
            assert!(!entry.exists());
            Ok::<_, Infallible>("ret")
        });

        assert_eq!(result.unwrap(), "ret");
        assert!(!cache.contains_key(&KEY).unwrap());
    }

    #[test]
    fn test_invoke_remove_there() {
        let cache = seeded_cache();

        let result = cache.invoke(KEY, |entry| {
            let old = entry.value().cloned();
            entry.remove();
            assert!(!entry.exists());
            Ok::<_, Infallible>(old)
        });

        assert_eq!(result.unwrap().as_deref(), Some("a1"));
        assert!(!cache.contains_key(&KEY).unwrap());
    }

    #[test]
    fn test_invoke_remove_error_keeps_value() {
        let cache = seeded_cache();

        let result = cache.invoke(KEY, |entry| {
            entry.remove();
            Err::<(), _>("processor failed")
        });

        assert!(result.is_err());
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a1"));
    }

    #[test]
    fn test_invoke_panic_keeps_value() {
        let cache = seeded_cache();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            cache.invoke(KEY, |entry| -> std::result::Result<(), Infallible> {
                entry.set_value("a2".to_string());
                panic!("processor panicked")
            })
        }));

        assert!(outcome.is_err());
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a1"));
        assert!(cache.put(KEY, "a3".to_string()).is_ok());
    }

    #[test]
    fn test_invoke_named_processor() {
        struct Append(&'static str);

        impl EntryProcessor<u32, String> for Append {
            type Output = usize;
            type Error = Infallible;

            fn process(self, entry: &mut MutableEntry<'_, u32, String>) -> std::result::Result<usize, Infallible> {
                let value = entry.value().cloned().unwrap_or_default() + self.0;
                let len = value.len();
                entry.set_value(value);
                Ok(len)
            }
        }

        let cache = seeded_cache();

        assert_eq!(cache.invoke_processor(KEY, Append("-b")).unwrap(), 4);
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a1-b"));
    }

    #[test]
    fn test_processor_then_processor() {
        let cache = seeded_cache();

        let (first, second) = after_slow_processor(&cache, |cache| swap_slowly(cache, "a3", Duration::from_millis(1)));

        assert_eq!(first.as_deref(), Some("a1"));
        assert_eq!(second.0.as_deref(), Some("a2"));
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a3"));
    }

    #[test]
    fn test_processor_then_get() {
        let cache = seeded_cache();

        let (first, read) = after_slow_processor(&cache, |cache| cache.get(&KEY).unwrap());

        assert_eq!(first.as_deref(), Some("a1"));
        assert_eq!(read.as_deref(), Some("a2"));
    }

    #[test]
    fn test_processor_then_get_all() {
        let cache = seeded_cache();
        cache.put(7, "other".to_string()).unwrap();

        let (_, found) = after_slow_processor(&cache, |cache| cache.get_all([KEY, 7, 8]).unwrap());

        assert_eq!(found.len(), 2);
        assert_eq!(found.get(&KEY).map(String::as_str), Some("a2"));
        assert_eq!(found.get(&7).map(String::as_str), Some("other"));
    }

    #[test]
    fn test_processor_then_contains_key() {
        let cache = seeded_cache();

        let (_, contains) = after_slow_processor(&cache, |cache| cache.contains_key(&KEY).unwrap());

        assert!(contains);
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a2"));
    }

    #[test]
    fn test_processor_then_put() {
        let cache = seeded_cache();

        let (first, previous) = after_slow_processor(&cache, |cache| cache.get_and_put(KEY, "a3".to_string()).unwrap());

        assert_eq!(first.as_deref(), Some("a1"));
        assert_eq!(previous.as_deref(), Some("a2"));
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a3"));
    }

    #[test]
    fn test_processor_then_put_all() {
        let cache = seeded_cache();

        after_slow_processor(&cache, |cache| {
            cache
                .put_all([(KEY, "a3".to_string()), (9, "nine".to_string())])
                .unwrap()
        });

        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a3"));
        assert_eq!(cache.get(&9).unwrap().as_deref(), Some("nine"));
    }

    #[test]
    fn test_processor_then_put_if_absent() {
        let cache = seeded_cache();

        let (_, stored) = after_slow_processor(&cache, |cache| cache.put_if_absent(KEY, "a3".to_string()).unwrap());

        assert!(!stored);
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a2"));
    }

    #[test]
    fn test_processor_creates_then_replace() {
        let cache = started_cache();

        let (first, replaced) = after_slow_processor(&cache, |cache| cache.replace(&KEY, "a3".to_string()).unwrap());

        assert_eq!(first, None);
        assert!(replaced);
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a3"));
    }

    #[test]
    fn test_processor_then_get_and_replace() {
        let cache = seeded_cache();

        let (_, previous) =
            after_slow_processor(&cache, |cache| cache.get_and_replace(&KEY, "a3".to_string()).unwrap());

        assert_eq!(previous.as_deref(), Some("a2"));
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a3"));
    }

    #[test]
    fn test_processor_then_replace_if_equals() {
        let cache = seeded_cache();

        let (_, replaced) = after_slow_processor(&cache, |cache| {
            cache
                .replace_if_equals(&KEY, &"a2".to_string(), "a3".to_string())
                .unwrap()
        });

        assert!(replaced);
        assert_eq!(cache.get(&KEY).unwrap().as_deref(), Some("a3"));
    }

    #[test]
    fn test_processor_then_remove() {
        let cache = seeded_cache();

        let (_, removed) = after_slow_processor(&cache, |cache| cache.remove(&KEY).unwrap());

        assert!(removed);
        assert!(!cache.contains_key(&KEY).unwrap());
    }

    #[test]
    fn test_processor_then_remove_if_equals() {
        let cache = seeded_cache();

        let (_, removed) = after_slow_processor(&cache, |cache| cache.remove_if_equals(&KEY, &"a2".to_string()).unwrap());

        assert!(removed);
        assert!(!cache.contains_key(&KEY).unwrap());
    }

    #[test]
    fn test_processor_then_get_and_remove() {
        let cache = seeded_cache();

        let (_, removed) = after_slow_processor(&cache, |cache| cache.get_and_remove(&KEY).unwrap());

        assert_eq!(removed.as_deref(), Some("a2"));
        assert!(!cache.contains_key(&KEY).unwrap());
    }

    #[test]
    fn test_processor_then_remove_all() {
        let cache = seeded_cache();
        cache.put(7, "other".to_string()).unwrap();

        after_slow_processor(&cache, |cache| cache.remove_all([KEY]).unwrap());

        assert!(!cache.contains_key(&KEY).unwrap());
        assert!(cache.contains_key(&7).unwrap());
    }

    #[test]
    fn test_processor_then_clear() {
        let cache = seeded_cache();
        cache.put(7, "other".to_string()).unwrap();

        after_slow_processor(&cache, |cache| cache.clear().unwrap());

        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_concurrent_invokes_do_not_lose_updates() {
        let manager = CacheManager::new("counters");
        let cache = manager
            .create_cache_builder::<u32, u64>("counters")
            .unwrap()
            .build()
            .unwrap();

        let threads = 8;
        let increments = 250;

        thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    for _ in 0..increments {
                        cache
                            .invoke(KEY, |entry| {
                                let next = entry.value().copied().unwrap_or(0) + 1;
                                entry.set_value(next);
                                Ok::<_, Infallible>(())
                            })
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(cache.get(&KEY).unwrap(), Some(threads * increments));
    }

    #[test]
    fn test_concurrent_put_if_absent_has_one_winner() {
        let cache = started_cache();
        let winners = AtomicUsize::new(0);

        thread::scope(|scope| {
            for id in 0..8 {
                let cache = &cache;
                let winners = &winners;
                scope.spawn(move || {
                    if cache.put_if_absent(KEY, format!("t{id}")).unwrap() {
                        winners.fetch_add(1, Relaxed);
                    }
                });
            }
        });

        assert_eq!(winners.load(Relaxed), 1);
        assert!(cache.get(&KEY).unwrap().is_some());
    }

    #[test]
    fn test_compare_and_swap_operations() {
        let cache = started_cache();

        assert!(!cache.replace(&KEY, "a1".to_string()).unwrap());
        assert!(!cache.contains_key(&KEY).unwrap());

        assert!(cache.put_if_absent(KEY, "a1".to_string()).unwrap());
        assert!(!cache.put_if_absent(KEY, "a2".to_string()).unwrap());

        assert!(!cache.replace_if_equals(&KEY, &"zz".to_string(), "a2".to_string()).unwrap());
        assert!(cache.replace_if_equals(&KEY, &"a1".to_string(), "a2".to_string()).unwrap());
        assert_eq!(cache.get_and_replace(&KEY, "a3".to_string()).unwrap().as_deref(), Some("a2"));

        assert!(!cache.remove_if_equals(&KEY, &"a2".to_string()).unwrap());
        assert!(cache.remove_if_equals(&KEY, &"a3".to_string()).unwrap());
        assert!(!cache.remove(&KEY).unwrap());
        assert_eq!(cache.get_and_remove(&KEY).unwrap(), None);
    }

    #[test]
    fn test_bulk_operations() {
        let cache = started_cache();
        let entries = (0..16).map(|key| (key, random_word())).collect::<HashMap<_, _>>();

        cache.put_all(entries.clone()).unwrap();
        assert_eq!(cache.len().unwrap(), 16);
        assert_eq!(cache.get_all(0..20).unwrap(), entries);

        cache.remove_all([0u32, 1, 2, 100]).unwrap();
        assert_eq!(cache.len().unwrap(), 13);

        let mut keys = cache.keys().unwrap();
        keys.sort_unstable();
        assert_eq!(keys, (3..16).collect::<Vec<_>>());

        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_operations_fail_once_stopped() {
        let cache = seeded_cache();
        cache.stop().unwrap();

        assert_eq!(cache.status(), Status::Stopped);
        assert!(matches!(cache.get(&KEY), Err(CacheError::IllegalState { .. })));
        assert!(matches!(cache.contains_key(&KEY), Err(CacheError::IllegalState { .. })));
        assert!(matches!(cache.put(KEY, "x".to_string()), Err(CacheError::IllegalState { .. })));
        assert!(matches!(cache.remove(&KEY), Err(CacheError::IllegalState { .. })));
        assert!(matches!(cache.clear(), Err(CacheError::IllegalState { .. })));
        assert!(matches!(cache.get_all([KEY]), Err(CacheError::IllegalState { .. })));

        let result = cache.invoke(KEY, |_| -> std::result::Result<(), Infallible> {
            unreachable!("processor must not run on a stopped cache")
        });
        assert!(matches!(result, Err(InvokeError::Cache(CacheError::IllegalState { .. }))));

        assert!(matches!(cache.stop(), Err(CacheError::IllegalState { .. })));
    }

    #[test]
    fn test_read_through_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader_calls = Arc::clone(&calls);

        let manager = CacheManager::new("loader");
        let cache = manager
            .create_cache_builder::<u32, String>("cache")
            .unwrap()
            .set_read_through(true)
            .set_cache_loader(move |key: &u32| -> std::result::Result<Option<String>, BoxError> {
                loader_calls.fetch_add(1, Relaxed);
                Ok((*key < 100).then(|| format!("loaded-{key}")))
            })
            .build()
            .unwrap();

        assert!(!cache.contains_key(&1).unwrap());
        assert_eq!(calls.load(Relaxed), 0);

        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("loaded-1"));
        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("loaded-1"));
        assert_eq!(calls.load(Relaxed), 1);
        assert!(cache.contains_key(&1).unwrap());

        assert_eq!(cache.get(&500).unwrap(), None);
        assert!(!cache.contains_key(&500).unwrap());
        assert_eq!(calls.load(Relaxed), 2);

        let found = cache.get_all([1, 3, 4, 700]).unwrap();
        assert_eq!(calls.load(Relaxed), 5);
        assert_eq!(found.len(), 3);
        assert_eq!(found.get(&1).map(String::as_str), Some("loaded-1"));
        assert_eq!(found.get(&3).map(String::as_str), Some("loaded-3"));
        assert_eq!(found.get(&4).map(String::as_str), Some("loaded-4"));
        assert!(!found.contains_key(&700));
        assert!(cache.contains_key(&3).unwrap());
        assert!(!cache.contains_key(&700).unwrap());

        cache.configuration().set_read_through(false);
        assert_eq!(cache.get(&2).unwrap(), None);
        assert_eq!(calls.load(Relaxed), 5);
    }

    #[test]
    fn test_read_through_loader_failure() {
        let manager = CacheManager::new("loader");
        let cache = manager
            .create_cache_builder::<u32, String>("cache")
            .unwrap()
            .set_read_through(true)
            .set_cache_loader(|_: &u32| -> std::result::Result<Option<String>, BoxError> { Err("store offline".into()) })
            .build()
            .unwrap();

        assert!(matches!(cache.get(&1), Err(CacheError::Loader(_))));
        assert!(cache.is_empty().unwrap());
    }

    #[derive(Clone, Default)]
    struct RecordingWriter {
        log: Arc<Mutex<Vec<String>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingWriter {
        fn check(&self) -> std::result::Result<(), BoxError> {
            if self.failing.load(Relaxed) {
                return Err("store offline".into());
            }
            Ok(())
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl CacheWriter<u32, String> for RecordingWriter {
        fn write(&self, key: &u32, value: &String) -> std::result::Result<(), BoxError> {
            self.check()?;
            self.log.lock().push(format!("write {key}={value}"));
            Ok(())
        }

        fn delete(&self, key: &u32) -> std::result::Result<(), BoxError> {
            self.check()?;
            self.log.lock().push(format!("delete {key}"));
            Ok(())
        }
    }

    fn write_through_cache(writer: &RecordingWriter) -> Arc<Cache<u32, String>> {
        CacheManager::new("writer")
            .create_cache_builder("cache")
            .unwrap()
            .set_write_through(true)
            .set_cache_writer(writer.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_write_through_sees_every_mutation() {
        let writer = RecordingWriter::default();
        let cache = write_through_cache(&writer);

        cache.put(1, "a".to_string()).unwrap();
        cache
            .invoke(1, |entry| {
                entry.set_value("b".to_string());
                Ok::<_, Infallible>(())
            })
            .unwrap();
        cache.invoke(2, |_| Ok::<_, Infallible>(())).unwrap();
        cache.remove(&1).unwrap();
        cache.remove(&1).unwrap();

        assert_eq!(writer.entries(), ["write 1=a", "write 1=b", "delete 1"]);
    }

    #[test]
    fn test_write_through_sees_bulk_mutations() {
        let writer = RecordingWriter::default();
        let cache = write_through_cache(&writer);

        cache
            .put_all([(1, "a".to_string()), (2, "b".to_string()), (3, "c".to_string())])
            .unwrap();
        assert_eq!(writer.entries(), ["write 1=a", "write 2=b", "write 3=c"]);

        cache.remove_all([1u32, 9]).unwrap();
        assert_eq!(writer.entries()[3..], ["delete 1"]);

        cache.clear().unwrap();
        let mut cleared = writer.entries()[4..].to_vec();
        cleared.sort();
        assert_eq!(cleared, ["delete 2", "delete 3"]);
        assert_eq!(writer.entries().len(), 6);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_writer_failure_keeps_value() {
        let writer = RecordingWriter::default();
        let cache = write_through_cache(&writer);
        cache.put(1, "a".to_string()).unwrap();

        writer.failing.store(true, Relaxed);

        assert!(matches!(cache.put(1, "b".to_string()), Err(CacheError::Writer(_))));
        assert!(matches!(cache.remove(&1), Err(CacheError::Writer(_))));

        let result = cache.invoke(1, |entry| {
            entry.set_value("c".to_string());
            Ok::<_, Infallible>(())
        });
        assert!(matches!(result, Err(InvokeError::Cache(CacheError::Writer(_)))));

        assert!(matches!(cache.put(2, "x".to_string()), Err(CacheError::Writer(_))));
        assert!(!cache.contains_key(&2).unwrap());

        writer.failing.store(false, Relaxed);
        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_expired_entries_are_absent() {
        let manager = CacheManager::new("expiry");
        let cache = manager
            .create_cache_builder::<u32, String>("cache")
            .unwrap()
            .set_expiry(Duration::from_millis(30))
            .set_statistics_enabled(true)
            .build()
            .unwrap();

        cache.put(1, "a".to_string()).unwrap();
        cache.put(2, "b".to_string()).unwrap();
        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("a"));

        thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get(&1).unwrap(), None);
        assert!(!cache.contains_key(&2).unwrap());
        assert!(cache.is_empty().unwrap());
        assert_eq!(cache.get_and_put(1, "c".to_string()).unwrap(), None);
        assert_eq!(cache.statistics().expirations(), 2);
    }

    #[test]
    fn test_statistics_follow_the_live_flag() {
        let cache = started_cache();

        cache.put(1, "a".to_string()).unwrap();
        cache.get(&1).unwrap();
        assert_eq!(cache.statistics().puts(), 0);
        assert_eq!(cache.statistics().hits(), 0);

        cache.configuration().set_statistics_enabled(true);
        cache.put(1, "b".to_string()).unwrap();
        cache.get(&1).unwrap();
        cache.get(&2).unwrap();
        cache.remove(&1).unwrap();

        let statistics = cache.statistics();
        assert_eq!(statistics.puts(), 1);
        assert_eq!(statistics.hits(), 1);
        assert_eq!(statistics.misses(), 1);
        assert_eq!(statistics.removals(), 1);
        assert_eq!(statistics.hit_rate(), 0.5);

        cache.clear_statistics();
        assert_eq!(cache.statistics().puts(), 0);
        assert_eq!(cache.statistics().hits(), 0);
    }
}
