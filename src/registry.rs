//! ResourceRegistry: owns one `StableStore` per resource kind and is the
//! only place that turns "count reached zero" into "erase and reclaim".
//!
//! A registry can live locally (embedded in a device object, or in tests)
//! or be installed as the process-wide instance with `construct`, looked up
//! with `instance`, and removed with `shutdown`.

use crate::buffer::Buffer;
use crate::config::RegistryConfig;
use crate::deletion::{DeletionQueue, PendingDestruction};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::resource::{Resource, ResourceDescriptor, ResourceHeader, ResourceId};
use crate::stable_store::{StableAddress, StableStore, StoreReport};
use crate::texture::Texture;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Outcome of a release.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Released {
    /// Other references remain.
    Live { remaining: usize },
    /// This was the last reference; the resource was destroyed (if it had
    /// not been already) and its slot erased.
    Reclaimed,
}

/// Occupancy snapshot of a registry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryReport {
    pub textures: StoreReport,
    pub buffers: StoreReport,
    /// Teardown requests not yet collected.
    pub pending_destructions: usize,
}

impl RegistryReport {
    pub fn live_resources(&self) -> usize {
        self.textures.live + self.buffers.live
    }
}

pub struct ResourceRegistry {
    pub(crate) textures: StableStore<Texture>,
    pub(crate) buffers: StableStore<Buffer>,
    next_id: AtomicU64,
    submission: AtomicU64,
    // Must stay after the stores: resources dropped with them still send
    // their teardown here.
    deletion: DeletionQueue,
}

static INSTANCE: AtomicPtr<ResourceRegistry> = AtomicPtr::new(ptr::null_mut());

impl ResourceRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            textures: StableStore::with_config(config.textures)?,
            buffers: StableStore::with_config(config.buffers)?,
            next_id: AtomicU64::new(1),
            submission: AtomicU64::new(0),
            deletion: DeletionQueue::new(),
        })
    }

    /// Install the process-wide registry. Must happen before the first
    /// resource is created through the native surface.
    pub fn construct(config: RegistryConfig) -> Result<&'static ResourceRegistry> {
        let fresh = Box::into_raw(Box::new(Self::new(config)?));
        match INSTANCE.compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                log::info!("resource registry constructed");
                // SAFETY: just leaked; only `shutdown` frees it.
                Ok(unsafe { &*fresh })
            }
            Err(_) => {
                // SAFETY: never published.
                drop(unsafe { Box::from_raw(fresh) });
                log::error!("resource registry is already constructed");
                Err(Error::RegistryAlreadyConstructed)
            }
        }
    }

    /// The process-wide registry, if constructed.
    pub fn instance() -> Option<&'static ResourceRegistry> {
        // SAFETY: non-null values are leaked boxes that stay alive until
        // `shutdown`, whose caller guarantees no reference outlives it.
        unsafe { INSTANCE.load(Ordering::Acquire).as_ref() }
    }

    /// Remove and drop the process-wide registry.
    ///
    /// Refuses with `LiveResources` while any resource is still alive.
    ///
    /// # Safety
    /// No reference previously returned by `construct` or `instance` may be
    /// used after this returns `Ok`, and no other thread may be using the
    /// registry concurrently.
    pub unsafe fn shutdown() -> Result<()> {
        let current = INSTANCE.load(Ordering::Acquire);
        // SAFETY: see `instance`.
        let Some(registry) = (unsafe { current.as_ref() }) else {
            log::error!("shutdown requested but the resource registry is not constructed");
            return Err(Error::RegistryNotConstructed);
        };
        let live = registry.live_resources();
        if live > 0 {
            log::error!("refusing to shut down the resource registry: {live} resources alive");
            return Err(Error::LiveResources { live });
        }
        if INSTANCE
            .compare_exchange(current, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::RegistryNotConstructed);
        }
        // SAFETY: unpublished above; the caller rules out remaining users.
        drop(unsafe { Box::from_raw(current) });
        log::info!("resource registry shut down");
        Ok(())
    }

    pub fn store<T: Resource>(&self) -> &StableStore<T> {
        T::store(self)
    }

    /// Create a resource. The returned handle owns its creation reference.
    pub fn create<T: Resource>(&self, desc: T::Descriptor) -> Handle<'_, T> {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = desc.label().map(str::to_owned);
        let header = ResourceHeader::new(id, label, self.deletion.sender());
        let address = T::store(self).insert(T::from_descriptor(header, desc));
        log::debug!("{} {} created at {:p}", T::KIND, id, address.as_ptr());
        // SAFETY: the fresh count of one is adopted by the handle.
        unsafe { Handle::from_raw(self, address.as_non_null()) }
    }

    /// Borrow the resource behind a raw pointer.
    ///
    /// Fails with `InvalidAddress` if the pointer's slot is vacant.
    ///
    /// # Safety
    /// `ptr` must have been produced by this registry, and the caller must
    /// hold a reference that keeps it alive for the returned lifetime.
    pub unsafe fn resolve<T: Resource>(&self, ptr: NonNull<T>) -> Result<&T> {
        match unsafe { T::store(self).address_of(ptr) } {
            // SAFETY: occupied; the caller's reference prevents reclamation.
            Ok(_) => Ok(unsafe { ptr.as_ref() }),
            Err(err) => {
                log::error!("{} handle {:p} does not refer to a live resource", T::KIND, ptr);
                Err(err)
            }
        }
    }

    /// Take one more reference. Returns the new count.
    ///
    /// # Safety
    /// As for `resolve`.
    pub unsafe fn add_ref<T: Resource>(&self, ptr: NonNull<T>) -> Result<usize> {
        let resource = unsafe { self.resolve(ptr) }?;
        let count = resource.header().ref_count().acquire();
        log::trace!("{} {} add_ref -> {}", T::KIND, resource.header().id(), count);
        Ok(count)
    }

    /// Give up one reference. The caller that drops the count to zero
    /// destroys (if needed) and erases the resource; `ptr` is dangling
    /// afterwards.
    ///
    /// # Safety
    /// As for `resolve`; the reference being given up is the one that keeps
    /// `ptr` alive.
    pub unsafe fn release<T: Resource>(&self, ptr: NonNull<T>) -> Result<Released> {
        let store = T::store(self);
        let address = match unsafe { store.address_of(ptr) } {
            Ok(address) => address,
            Err(err) => {
                log::error!("release of {} handle {:p} that is not live", T::KIND, ptr);
                return Err(err);
            }
        };
        // SAFETY: occupied, and our reference is still counted.
        let header = unsafe { ptr.as_ref() }.header();
        let remaining = match header.ref_count().release() {
            Ok(remaining) => remaining,
            Err(err) => {
                log::error!("{} {}: release without a matching reference", T::KIND, header.id());
                return Err(err);
            }
        };
        log::trace!("{} {} release -> {}", T::KIND, header.id(), remaining);
        if remaining > 0 {
            return Ok(Released::Live { remaining });
        }
        if self.erase_if_present(address) {
            Ok(Released::Reclaimed)
        } else {
            Err(Error::InvalidAddress)
        }
    }

    /// Destroy the resource without touching its count. Returns whether this
    /// call performed the transition.
    ///
    /// # Safety
    /// As for `resolve`.
    pub unsafe fn destroy<T: Resource>(&self, ptr: NonNull<T>) -> Result<bool> {
        let resource = unsafe { self.resolve(ptr) }?;
        Ok(resource.destroy())
    }

    /// Reclaim a resource whose count just reached zero: destroy it if that
    /// has not happened yet, erase its slot, then drop it outside the
    /// segment lock. Only the caller that observed the zero may call this.
    pub(crate) fn erase_if_present<T: Resource>(&self, address: StableAddress<T>) -> bool {
        let store = T::store(self);
        // SAFETY: the count is zero, so no other holder can erase it.
        let Some(resource) = (unsafe { store.get(address) }) else {
            log::error!("{} at {:p} vanished before reclamation", T::KIND, address.as_ptr());
            return false;
        };
        resource.destroy();
        match store.erase(address) {
            Ok(resource) => {
                log::debug!("{} {} reclaimed", T::KIND, resource.header().id());
                drop(resource);
                true
            }
            Err(err) => {
                log::error!("{} at {:p}: {}", T::KIND, address.as_ptr(), err);
                false
            }
        }
    }

    pub fn live_count<T: Resource>(&self) -> usize {
        T::store(self).len()
    }

    pub fn live_resources(&self) -> usize {
        self.textures.len() + self.buffers.len()
    }

    /// Start a new submission and return its index.
    pub fn submit(&self) -> u64 {
        self.submission.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current_submission(&self) -> u64 {
        self.submission.load(Ordering::Acquire)
    }

    pub fn deletion_queue(&self) -> &DeletionQueue {
        &self.deletion
    }

    /// Teardown requests whose last use finished by submission `completed`.
    pub fn collect_destroyed(&self, completed: u64) -> Vec<PendingDestruction> {
        let ready = self.deletion.collect_ready(completed);
        if !ready.is_empty() {
            log::debug!("collected {} teardowns up to submission {}", ready.len(), completed);
        }
        ready
    }

    pub fn report(&self) -> RegistryReport {
        RegistryReport {
            textures: self.textures.report(),
            buffers: self.buffers.report(),
            pending_destructions: self.deletion.pending(),
        }
    }
}

impl core::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("textures", &self.textures)
            .field("buffers", &self.buffers)
            .field("submission", &self.current_submission())
            .finish()
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        let live = self.live_resources();
        if live > 0 {
            log::error!("resource registry dropped with {live} live resources; destroying them");
        }
    }
}
