//! Intrusive, thread-safe reference counter.
//!
//! The counter lives inside the resource it counts; there is no separate
//! control block. `release` reports the zero transition to exactly one
//! caller, and refuses to go below zero instead of wrapping.

use crate::error::{Error, Result};
use core::sync::atomic::{fence, AtomicUsize, Ordering};

/// Above this many references we abort, the same limit `std::sync::Arc` uses.
const MAX_REFCOUNT: usize = isize::MAX as usize;

#[derive(Debug)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    pub const fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Current count. Only a snapshot when other threads hold references.
    #[inline]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Add one reference. The caller must already hold one.
    #[inline]
    pub fn acquire(&self) -> usize {
        // A new reference can only be formed from an existing one, so no
        // synchronization is needed here (same argument as Arc::clone).
        let old = self.count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            // Follow Arc semantics: abort on overflow rather than continue unsafely.
            std::process::abort();
        }
        old + 1
    }

    /// Drop one reference and return the remaining count.
    ///
    /// `Ok(0)` is returned to exactly one caller; that caller owns the
    /// reclamation. A release on a zero count is rejected with
    /// `DoubleReleaseDetected` and leaves the count at zero.
    #[inline]
    pub fn release(&self) -> Result<usize> {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return Err(Error::DoubleReleaseDetected);
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let remaining = current - 1;
        if remaining == 0 {
            // Pair with the Release decrements of every other holder so their
            // writes are visible before reclamation.
            fence(Ordering::Acquire);
        }
        Ok(remaining)
    }
}
