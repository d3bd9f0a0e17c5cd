//! Crate error type.

use thiserror::Error;

/// Failures reported by the store, the counting protocol, resources and the
/// registry lifecycle.
///
/// None of these are recovered from silently: every path that produces one
/// also logs it, because masking them risks a use-after-free further on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The address does not refer to an occupied slot of this store.
    #[error("address does not refer to a live slot of this store")]
    InvalidAddress,
    /// A release would have taken the reference count below zero.
    #[error("release would drop the reference count below zero")]
    DoubleReleaseDetected,
    /// The operation needs GPU-side backing that `destroy()` already gave up.
    #[error("resource has already been destroyed")]
    UseAfterDestroy,
    #[error("buffer is already mapped")]
    AlreadyMapped,
    #[error("buffer is not mapped")]
    NotMapped,
    #[error("resource registry is already constructed")]
    RegistryAlreadyConstructed,
    #[error("resource registry has not been constructed")]
    RegistryNotConstructed,
    /// Shutdown was requested while resources were still referenced.
    #[error("{live} resources are still alive")]
    LiveResources { live: usize },
    #[error("invalid store configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid resource descriptor: {0}")]
    InvalidDescriptor(&'static str),
    /// A CPU staging range of `size` bytes could not be allocated.
    #[error("could not allocate {size} bytes")]
    AllocationFailed { size: u64 },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
