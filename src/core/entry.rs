use std::time::Instant;

/// The value slot of a single cache key.
///
/// A key with no `Entry` and an `Entry` whose value is `None` are the same
/// thing to every caller: the key does not exist.
#[derive(Debug)]
pub struct Entry<V> {
    value: Option<V>,
    /// Deadline after which the value is treated as absent.
    expires_at: Option<Instant>,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self::vacant()
    }
}

impl<V> Entry<V> {
    #[inline]
    pub fn vacant() -> Self {
        Self {
            value: None,
            expires_at: None,
        }
    }

    /// Returns the live value, or `None` if absent or expired.
    #[inline]
    pub fn value(&self) -> Option<&V> {
        if self.is_expired() {
            return None;
        }
        self.value.as_ref()
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.value().is_some()
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    /// Drops a value whose deadline has passed. Returns `true` if one was
    /// dropped.
    pub(crate) fn purge_expired(&mut self) -> bool {
        if self.value.is_some() && self.is_expired() {
            self.value = None;
            self.expires_at = None;
            return true;
        }
        false
    }

    /// Stores `value`, returning the previous live value.
    pub(crate) fn set(&mut self, value: V, expires_at: Option<Instant>) -> Option<V> {
        let expired = self.is_expired();
        self.expires_at = expires_at;
        self.value.replace(value).filter(|_| !expired)
    }

    /// Clears the value, returning the previous live value.
    pub(crate) fn clear(&mut self) -> Option<V> {
        let expired = self.is_expired();
        self.expires_at = None;
        self.value.take().filter(|_| !expired)
    }
}
