use crate::status::Status;
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error returned by backing-store callbacks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by caches and cache managers.
///
/// None of these are retried internally; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A required argument was absent.
    #[error("argument `{0}` must not be empty")]
    NullArgument(&'static str),

    /// The target is not in the lifecycle state the operation requires.
    #[error("{target} is {status}, operation requires a started {target}")]
    IllegalState { target: &'static str, status: Status },

    #[error("cache `{0}` already exists")]
    CacheAlreadyExists(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The configuration is well-formed but the manager cannot honour it.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The cache exists but was built with different key/value types.
    #[error("cache `{0}` was built with different key or value types")]
    IncompatibleTypes(String),

    #[error("cache loader failed")]
    Loader(#[source] BoxError),

    #[error("cache writer failed")]
    Writer(#[source] BoxError),
}

impl CacheError {
    #[inline]
    pub(crate) fn cache_state(status: Status) -> Self {
        Self::IllegalState {
            target: "cache",
            status,
        }
    }

    #[inline]
    pub(crate) fn manager_state(status: Status) -> Self {
        Self::IllegalState {
            target: "cache manager",
            status,
        }
    }
}

/// Outcome of a failed [`invoke`](crate::Cache::invoke).
///
/// `Processor` means the user logic failed and the entry was left exactly
/// as it was before the invocation; the error is the processor's own.
#[derive(Debug, Error)]
pub enum InvokeError<E> {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("entry processor failed")]
    Processor(#[source] E),
}

impl<E> InvokeError<E> {
    /// Returns the processor's error, if that is what failed.
    pub fn into_processor_error(self) -> Option<E> {
        match self {
            Self::Processor(error) => Some(error),
            Self::Cache(_) => None,
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
