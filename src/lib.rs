//! rc-hive: intrusively reference-counted GPU-style resources kept at
//! stable addresses in a concurrent segmented store, handed across a C
//! boundary as raw pointers.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a raw pointer obtained once stays valid until the last
//!   reference is released, `destroy()` is idempotent and independent of
//!   reclamation, and memory is reclaimed exactly once.
//! - Layers:
//!   - StableStore<T>: segmented hive. Slots never move; each segment has
//!     its own free list and lock, so erasing one element never disturbs
//!     another. Addresses carry a slot generation.
//!   - Resource / ResourceHeader: the intrusive count, the atomic
//!     `InternalState` and the hand-off of GPU-side teardown to the
//!     deletion queue. `Texture` and `Buffer` are the concrete kinds.
//!   - ResourceRegistry: one store per kind; the only place where "count
//!     reached zero" becomes "destroy if needed, erase, drop".
//!   - Handle<'r, T>: RAII add-ref/release for Rust callers.
//!   - native: the raw-pointer surface and its `extern "C"` wrappers over
//!     the process-wide registry.
//!
//! Constraints
//! - Thread-safe: counts and states are atomics; the store takes a
//!   per-segment mutex for insert/erase/iterate and a read lock on the
//!   segment list, written only when a segment is added.
//! - No per-resource allocations beyond the store's own segments.
//! - Only the release that observes the count go from one to zero may
//!   erase, so a slot is never erased twice by well-behaved callers.
//! - Nothing on the C paths panics; violations are logged and reported.
//!
//! Why this split?
//! - Localize invariants: the store knows nothing about counts, the count
//!   knows nothing about slots, and the registry joins the two.
//! - Minimize unsafe: raw-pointer resolution lives in `StableStore` and
//!   `ResourceRegistry`; everything above works with references.
//!
//! Reentrancy policy
//! - Segment locks are held only for slot bookkeeping and for the callback
//!   of `StableStore::with`/`for_each`. Erased values are dropped after
//!   the lock is released, so a resource's `Drop` may touch the store.
//!   Debug builds panic instead of deadlocking when a callback reenters
//!   a segment it is iterating.
//!
//! Overflow semantics
//! - The count aborts the process above `isize::MAX`, as `Arc` does.
//!   Releasing below zero is caught and reported as
//!   `DoubleReleaseDetected` without touching the count.
//!
//! Stale pointers
//! - Typed `StableAddress`es detect reuse through the slot generation.
//!   Raw pointers cannot: a pointer to a vacant slot is rejected, a pointer
//!   to a slot that has been reused is undefined behavior by contract.
//!   Slot memory lives as long as its store, so the vacancy check itself
//!   never reads freed memory.
//!
//! Notes and non-goals
//! - No GPU command submission: the deletion queue only records teardown
//!   requests with the submission they must wait for.
//! - No custom allocator and no cross-process handle sharing.

pub mod buffer;
pub mod config;
pub mod count;
pub mod deletion;
pub mod error;
pub mod handle;
pub mod native;
mod reentrancy;
pub mod registry;
pub mod resource;
pub mod stable_store;
mod stable_store_proptest;
pub mod texture;

// Public surface
pub use buffer::{Buffer, BufferDescriptor, MAX_BUFFER_SIZE};
pub use config::{RegistryConfig, StoreConfig};
pub use deletion::{DeletionQueue, PendingDestruction};
pub use error::{Error, Result};
pub use handle::Handle;
pub use registry::{RegistryReport, Released, ResourceRegistry};
pub use resource::{InternalState, Resource, ResourceDescriptor, ResourceId, ResourceKind};
pub use stable_store::{StableAddress, StableStore, StoreReport};
pub use texture::{Extent3d, Texture, TextureDescriptor, TextureFormat};
