//! Buffer resource, the only kind that uses `InternalState::Unavailable`.
//!
//! Mapping moves a buffer `Available -> Unavailable` and gives it a CPU
//! staging range; unmapping moves it back and drops the range. Destroying
//! a mapped buffer unmaps it first.

use crate::error::{Error, Result};
use crate::registry::ResourceRegistry;
use crate::resource::{
    InternalState, Resource, ResourceDescriptor, ResourceHeader, ResourceKind,
};
use crate::stable_store::StableStore;
use parking_lot::Mutex;

/// Largest buffer a descriptor may ask for; a staging range must fit in
/// one allocation.
pub const MAX_BUFFER_SIZE: u64 = isize::MAX as u64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub mapped_at_creation: bool,
}

impl ResourceDescriptor for BufferDescriptor {
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Debug)]
pub struct Buffer {
    header: ResourceHeader,
    size: u64,
    // Some while mapped. State transitions happen with this lock held so
    // the state and the range never disagree for longer than a destroy.
    staging: Mutex<Option<Box<[u8]>>>,
}

fn state_error(actual: InternalState, wanted: InternalState) -> Error {
    match (actual, wanted) {
        (InternalState::Destroyed, _) => Error::UseAfterDestroy,
        (InternalState::Unavailable, InternalState::Available) => Error::AlreadyMapped,
        _ => Error::NotMapped,
    }
}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_mapped(&self) -> bool {
        self.header.state() == InternalState::Unavailable
    }

    fn staging_range(&self) -> Result<Box<[u8]>> {
        let failed = || {
            log::error!("buffer {}: cannot allocate {} bytes", self.header.id(), self.size);
            Error::AllocationFailed { size: self.size }
        };
        let len = usize::try_from(self.size).map_err(|_| failed())?;
        let mut range = Vec::new();
        range.try_reserve_exact(len).map_err(|_| failed())?;
        range.resize(len, 0u8);
        Ok(range.into_boxed_slice())
    }

    /// Map the whole buffer for CPU access.
    ///
    /// Fails with `AllocationFailed`, leaving the buffer `Available`, if the
    /// staging range cannot be allocated.
    pub fn map(&self) -> Result<()> {
        let mut staging = self.staging.lock();
        let state = self.header.state();
        if state != InternalState::Available {
            return Err(state_error(state, InternalState::Available));
        }
        let range = self.staging_range()?;
        self.header
            .transition(InternalState::Available, InternalState::Unavailable)
            .map_err(|actual| state_error(actual, InternalState::Available))?;
        *staging = Some(range);
        log::trace!("buffer {} mapped", self.header.id());
        Ok(())
    }

    pub fn unmap(&self) -> Result<()> {
        let mut staging = self.staging.lock();
        self.header
            .transition(InternalState::Unavailable, InternalState::Available)
            .map_err(|actual| state_error(actual, InternalState::Unavailable))?;
        staging.take();
        log::trace!("buffer {} unmapped", self.header.id());
        Ok(())
    }

    /// Run `f` on the mapped range.
    pub fn with_mapped_range<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut staging = self.staging.lock();
        match staging.as_deref_mut() {
            Some(range) => Ok(f(range)),
            None if self.header.is_destroyed() => Err(Error::UseAfterDestroy),
            None => Err(Error::NotMapped),
        }
    }
}

impl Resource for Buffer {
    type Descriptor = BufferDescriptor;

    const KIND: ResourceKind = ResourceKind::Buffer;

    fn from_descriptor(header: ResourceHeader, desc: BufferDescriptor) -> Self {
        let buffer = Self {
            header,
            size: desc.size,
            staging: Mutex::new(None),
        };
        if desc.mapped_at_creation {
            // Not yet shared, so only the allocation can fail.
            if let Err(err) = buffer.map() {
                log::error!("buffer {} left unmapped at creation: {err}", buffer.header.id());
            }
        }
        buffer
    }

    fn header(&self) -> &ResourceHeader {
        &self.header
    }

    fn store(registry: &ResourceRegistry) -> &StableStore<Self> {
        &registry.buffers
    }

    fn on_destroy(&self, previous: InternalState) {
        if previous == InternalState::Unavailable {
            // Unmap: the staging range can go right away.
            self.staging.lock().take();
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
        log::trace!(
            "buffer {} dropped with count {}",
            self.header.id(),
            self.header.ref_count().get()
        );
    }
}
