use crate::core::handler::MutableEntry;

/// User logic run atomically against a single entry.
///
/// Closures are the usual way to pass processor logic (see
/// [`Cache::invoke`](crate::Cache::invoke)); implement this trait for
/// processors that carry their own state or are reused across calls.
///
/// The processor may read and change the entry any number of times. If it
/// returns `Err`, none of its changes are applied.
pub trait EntryProcessor<K, V> {
    type Output;
    type Error;

    fn process(self, entry: &mut MutableEntry<'_, K, V>) -> Result<Self::Output, Self::Error>;
}
