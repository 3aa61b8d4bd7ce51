use std::hint::spin_loop;
use std::thread;

/// Backoff for the retry loop that re-acquires a retired slot.
///
/// A slot is retired when the last value of its key is removed while other
/// threads are queued on its lock. Those threads must look the key up again;
/// backing off first gives the retiring thread time to unlink the slot from
/// the index so the retry does not find it a second time.
///
/// Each step spins a random number of times between `0` and the current
/// limit ("full jitter"). Once the limit is exhausted the thread yields to
/// the scheduler instead of spinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Spin bound grows by one per step.
    Linear { current: usize, limit: usize },
    /// Spin bound doubles per step.
    Exponential { current: usize, limit: usize },
}

impl Backoff {
    #[inline]
    pub fn linear(limit: usize) -> Self {
        Self::Linear { current: 1, limit }
    }

    #[inline]
    pub fn exponential(limit: usize) -> Self {
        Self::Exponential { current: 1, limit }
    }

    #[inline]
    fn current_limit(&self) -> usize {
        match *self {
            Self::Linear { current, .. } | Self::Exponential { current, .. } => current,
        }
    }

    #[inline]
    fn is_exhausted(&self) -> bool {
        match *self {
            Self::Linear { current, limit } | Self::Exponential { current, limit } => {
                current >= limit
            }
        }
    }

    #[inline]
    fn step(&mut self) {
        match self {
            Self::Linear { current, limit } => {
                *current = current.saturating_add(1).min(*limit);
            }
            Self::Exponential { current, limit } => {
                *current = current.saturating_mul(2).min(*limit);
            }
        }
    }

    /// Waits once, then widens the window for the next call.
    pub fn snooze(&mut self) {
        if self.is_exhausted() {
            thread::yield_now();
            return;
        }

        let jitter = fastrand::usize(..=self.current_limit());

        for _ in 0..jitter {
            spin_loop();
        }

        self.step();
    }
}

/// How the spin bound of a [`Backoff`] grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Linear,
    Exponential,
}

/// Factory for per-operation [`Backoff`] state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub policy: BackoffPolicy,
    /// Largest spin bound before the backoff starts yielding.
    pub limit: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::Exponential,
            limit: 64,
        }
    }
}

impl BackoffConfig {
    #[must_use]
    pub fn build(&self) -> Backoff {
        match self.policy {
            BackoffPolicy::Linear => Backoff::linear(self.limit.max(1)),
            BackoffPolicy::Exponential => Backoff::exponential(self.limit.max(1)),
        }
    }
}
