//! Debug-only, thread-aware reentrancy guard.
//!
//! Detects a thread re-entering a lock it already holds, which for the
//! non-reentrant segment mutexes would otherwise be a silent deadlock (for
//! example, erasing from inside a `for_each` callback). In debug builds the
//! second entry panics. In release builds this compiles to a zero-cost no-op.
//!
//! Usage: call `check()` before acquiring the protected lock, then keep the
//! guard returned by `enter()` for as long as the lock is held. The guard
//! must be dropped before the lock is released.

#[cfg(not(debug_assertions))]
use core::marker::PhantomData;
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicUsize, Ordering};

/// Per-lock reentrancy tracker.
#[derive(Debug)]
pub struct DebugReentrancy {
    // Token of the thread currently inside, 0 when nobody is.
    #[cfg(debug_assertions)]
    holder: AtomicUsize,
}

#[cfg(debug_assertions)]
fn current_thread_token() -> usize {
    thread_local! {
        static TOKEN: u8 = const { 0 };
    }
    // The address of a thread-local is unique among live threads and never 0.
    TOKEN.with(|t| t as *const u8 as usize)
}

impl DebugReentrancy {
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            holder: AtomicUsize::new(0),
        }
    }

    /// Panics (debug builds) if the current thread is already inside.
    #[inline]
    pub fn check(&self) {
        #[cfg(debug_assertions)]
        {
            // Only this thread can store its own token, so a racy load can
            // never produce a false positive.
            assert!(
                self.holder.load(Ordering::Relaxed) != current_thread_token(),
                "reentrancy detected: nested entry into store segment"
            );
        }
    }

    /// Mark the current thread as inside. Call only while holding the lock.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            self.holder.store(current_thread_token(), Ordering::Relaxed);
            ReentrancyGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard { _z: PhantomData }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            self.owner.holder.store(0, Ordering::Relaxed);
        }
    }
}
