use std::fmt;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use Status::{Started, Stopped, Uninitialized};

/// Lifecycle state shared by caches and cache managers.
///
/// # Invariants
/// - `Uninitialized` → `Started` → `Stopped`, never backwards.
/// - `Stopped` is terminal; a stopped cache is replaced, not restarted.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Uninitialized = 0,
    Started = 1,
    Stopped = 2,
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        match status {
            Uninitialized => 0,
            Started => 1,
            Stopped => 2,
        }
    }
}

impl From<u8> for Status {
    fn from(status: u8) -> Self {
        match status {
            0 => Uninitialized,
            1 => Started,
            2 => Stopped,
            _ => unreachable!("only values 0-2 are supported"),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Uninitialized => "uninitialized",
            Started => "started",
            Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// An atomically updated [`Status`].
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn new(status: Status) -> Self {
        Self(AtomicU8::new(status.into()))
    }

    #[inline]
    pub(crate) fn load(&self) -> Status {
        self.0.load(Acquire).into()
    }

    /// Moves from `from` to `to`, returning the observed state on failure.
    #[inline]
    pub(crate) fn transition(&self, from: Status, to: Status) -> Result<(), Status> {
        self.0
            .compare_exchange(from.into(), to.into(), AcqRel, Acquire)
            .map(|_| ())
            .map_err(Status::from)
    }

    /// Forces the terminal state, returning the previous one.
    #[inline]
    pub(crate) fn stop(&self) -> Status {
        self.0.swap(Stopped.into(), AcqRel).into()
    }
}
