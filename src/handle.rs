//! `Handle<'r, T>`: the RAII form of the add-ref/release protocol.
//!
//! Cloning takes a reference, dropping gives one back; the drop that takes
//! the count to zero reclaims the resource through its registry. Handles
//! compare and hash by address.

use crate::registry::ResourceRegistry;
use crate::resource::{InternalState, Resource, ResourceId};
use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem;
use core::ops::Deref;
use core::ptr::NonNull;

pub struct Handle<'r, T: Resource> {
    registry: &'r ResourceRegistry,
    ptr: NonNull<T>,
}

// SAFETY: a handle is a counted shared reference to `T`, which is
// `Send + Sync`; the count itself is atomic.
unsafe impl<T: Resource> Send for Handle<'_, T> {}
unsafe impl<T: Resource> Sync for Handle<'_, T> {}

impl<'r, T: Resource> Handle<'r, T> {
    /// Adopt one already-counted reference.
    ///
    /// # Safety
    /// `ptr` must be a live resource of `registry`, and the caller must give
    /// up one reference to it (for example one obtained from `into_raw`).
    pub unsafe fn from_raw(registry: &'r ResourceRegistry, ptr: NonNull<T>) -> Self {
        Self { registry, ptr }
    }

    /// Give up RAII ownership; the reference stays counted and must later
    /// be released through the registry or re-adopted with `from_raw`.
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub fn registry(&self) -> &'r ResourceRegistry {
        self.registry
    }

    pub fn id(&self) -> ResourceId {
        self.header().id()
    }

    pub fn ref_count(&self) -> usize {
        self.header().ref_count().get()
    }

    pub fn state(&self) -> InternalState {
        self.header().state()
    }

    /// Record that submission `submission` uses this resource, so its
    /// teardown waits for that submission.
    pub fn mark_used(&self, submission: u64) {
        self.header().mark_used(submission);
    }
}

impl<T: Resource> Deref for Handle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: our reference keeps the slot occupied.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Resource> Clone for Handle<'_, T> {
    fn clone(&self) -> Self {
        let count = self.header().ref_count().acquire();
        log::trace!("{} {} add_ref -> {}", T::KIND, self.id(), count);
        Self {
            registry: self.registry,
            ptr: self.ptr,
        }
    }
}

impl<T: Resource> Drop for Handle<'_, T> {
    fn drop(&mut self) {
        // SAFETY: we own one counted reference, given up here. Failures are
        // logged by the registry.
        let _ = unsafe { self.registry.release(self.ptr) };
    }
}

impl<T: Resource> PartialEq for Handle<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T: Resource> Eq for Handle<'_, T> {}

impl<T: Resource> Hash for Handle<'_, T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl<T: Resource> fmt::Debug for Handle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &T::KIND)
            .field("id", &self.id())
            .field("ptr", &self.ptr)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::texture::{Texture, TextureDescriptor};
    use std::collections::HashSet;

    /// Invariant: clone and drop move the intrusive count by one each, and
    /// the last drop reclaims.
    #[test]
    fn clone_and_drop_track_count() {
        let r = ResourceRegistry::new(RegistryConfig::default()).unwrap();
        let a = r.create::<Texture>(TextureDescriptor::default());
        assert_eq!(a.ref_count(), 1);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        assert_eq!(a, b);
        drop(b);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(r.live_count::<Texture>(), 1);
        drop(a);
        assert_eq!(r.live_count::<Texture>(), 0);
    }

    #[test]
    fn into_raw_and_from_raw_keep_the_reference() {
        let r = ResourceRegistry::new(RegistryConfig::default()).unwrap();
        let ptr = r.create::<Texture>(TextureDescriptor::default()).into_raw();
        assert_eq!(r.live_count::<Texture>(), 1);
        let h = unsafe { Handle::from_raw(&r, ptr) };
        assert_eq!(h.ref_count(), 1);
        assert_eq!(h.as_ptr(), ptr.as_ptr());
        drop(h);
        assert_eq!(r.live_count::<Texture>(), 0);
    }

    #[test]
    fn handles_hash_by_address() {
        let r = ResourceRegistry::new(RegistryConfig::default()).unwrap();
        let a = r.create::<Texture>(TextureDescriptor::default());
        let b = r.create::<Texture>(TextureDescriptor::default());
        let set: HashSet<_> = [a.clone(), a.clone(), b.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_ne!(a, b);
    }
}
