/// A pending change recorded by a [`MutableEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<V> {
    Set(V),
    Remove,
}

/// The view of one entry handed to an entry processor.
///
/// Every read reflects the entry as it was when the per-key lock was
/// acquired, overlaid with the changes made so far through this view.
/// Changes are buffered here and only reach the cache if the processor
/// returns normally.
#[derive(Debug)]
pub struct MutableEntry<'a, K, V> {
    key: &'a K,
    original: Option<&'a V>,
    pending: Option<Mutation<V>>,
}

impl<'a, K, V> MutableEntry<'a, K, V> {
    #[inline]
    pub(crate) fn new(key: &'a K, original: Option<&'a V>) -> Self {
        Self {
            key,
            original,
            pending: None,
        }
    }

    #[inline]
    pub fn key(&self) -> &K {
        self.key
    }

    /// Returns `true` if the entry currently has a value.
    #[inline]
    pub fn exists(&self) -> bool {
        self.value().is_some()
    }

    /// Returns the current value, or `None` when the entry does not exist.
    ///
    /// After [`remove`](Self::remove) this is `None`, never the stale value.
    #[inline]
    pub fn value(&self) -> Option<&V> {
        match &self.pending {
            None => self.original,
            Some(Mutation::Set(value)) => Some(value),
            Some(Mutation::Remove) => None,
        }
    }

    #[inline]
    pub fn set_value(&mut self, value: V) {
        self.pending = Some(Mutation::Set(value));
    }

    /// Marks the entry as absent, whatever its prior state.
    #[inline]
    pub fn remove(&mut self) {
        self.pending = Some(Mutation::Remove);
    }

    /// Consumes the view, yielding the change to commit, if any.
    ///
    /// Removing an entry that did not exist when the view was opened is
    /// not a change.
    pub(crate) fn into_mutation(self) -> Option<Mutation<V>> {
        match self.pending {
            Some(Mutation::Remove) if self.original.is_none() => None,
            pending => pending,
        }
    }
}
