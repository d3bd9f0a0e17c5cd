//! Resource capability: intrusive count, destruction state and teardown.
//!
//! Every resource embeds a `ResourceHeader` and implements `Resource`.
//! `destroy()` gives up the GPU-side backing exactly once and never frees
//! the CPU object; memory reclamation is driven solely by the count.

use crate::count::RefCount;
use crate::deletion::{DeletionSender, PendingDestruction};
use crate::registry::ResourceRegistry;
use crate::stable_store::StableStore;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// WebGPU internal state of a resource.
///
/// `Unavailable` means "mapped for CPU access" and is only used by buffers.
/// Nothing ever leaves `Destroyed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InternalState {
    Available = 0,
    Unavailable = 1,
    Destroyed = 2,
}

impl InternalState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => InternalState::Available,
            1 => InternalState::Unavailable,
            _ => InternalState::Destroyed,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Texture => f.write_str("texture"),
            ResourceKind::Buffer => f.write_str("buffer"),
        }
    }
}

/// Registry-unique resource identifier, used in logs and teardown requests.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State shared by every resource kind, embedded in the resource itself.
#[derive(Debug)]
pub struct ResourceHeader {
    id: ResourceId,
    label: Option<String>,
    ref_count: RefCount,
    state: AtomicU8,
    last_submission: AtomicU64,
    retire: DeletionSender,
}

impl ResourceHeader {
    /// A new header owns one reference: the one handed to the creator.
    pub(crate) fn new(id: ResourceId, label: Option<String>, retire: DeletionSender) -> Self {
        Self {
            id,
            label,
            ref_count: RefCount::new(1),
            state: AtomicU8::new(InternalState::Available as u8),
            last_submission: AtomicU64::new(0),
            retire,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn ref_count(&self) -> &RefCount {
        &self.ref_count
    }

    pub fn state(&self) -> InternalState {
        InternalState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == InternalState::Destroyed
    }

    /// Index of the last submission that used this resource.
    pub fn last_submission(&self) -> u64 {
        self.last_submission.load(Ordering::Acquire)
    }

    pub fn mark_used(&self, submission: u64) {
        self.last_submission.fetch_max(submission, Ordering::AcqRel);
    }

    /// Compare-and-swap `from -> to`. On failure returns the actual state.
    pub(crate) fn transition(
        &self,
        from: InternalState,
        to: InternalState,
    ) -> Result<(), InternalState> {
        debug_assert!(from != InternalState::Destroyed);
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(InternalState::from_u8)
    }

    /// Move to `Destroyed`. Returns the previous state to the single caller
    /// that performed the transition, `None` to everyone else.
    pub(crate) fn mark_destroyed(&self) -> Option<InternalState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != InternalState::Destroyed as u8).then_some(InternalState::Destroyed as u8)
            })
            .ok()
            .map(InternalState::from_u8)
    }

    /// Hand the GPU-side teardown to the deletion queue. Fire-and-forget.
    pub(crate) fn retire(&self, kind: ResourceKind) {
        self.retire.send(PendingDestruction {
            kind,
            id: self.id,
            label: self.label.clone(),
            after_submission: self.last_submission(),
        });
    }
}

/// Creation parameters of a resource.
pub trait ResourceDescriptor {
    fn label(&self) -> Option<&str>;
}

/// A reference-counted resource stored in a `ResourceRegistry`.
pub trait Resource: Sized + Send + Sync + 'static {
    type Descriptor: ResourceDescriptor;

    const KIND: ResourceKind;

    /// Build the CPU-side object. `header` already carries the creation reference.
    fn from_descriptor(header: ResourceHeader, desc: Self::Descriptor) -> Self;

    fn header(&self) -> &ResourceHeader;

    /// The registry store that owns resources of this kind.
    fn store(registry: &ResourceRegistry) -> &StableStore<Self>;

    /// Resource-local work done at the moment of destruction, before the
    /// GPU-side teardown is enqueued (e.g. dropping a staging range).
    fn on_destroy(&self, _previous: InternalState) {}

    /// Give up the GPU-side backing. Idempotent: only the first call, from
    /// any thread, runs `on_destroy` and enqueues teardown. Returns whether
    /// this call performed the transition. Memory is left intact.
    fn destroy(&self) -> bool {
        let header = self.header();
        match header.mark_destroyed() {
            Some(previous) => {
                self.on_destroy(previous);
                header.retire(Self::KIND);
                log::debug!("{} {} destroyed (was {:?})", Self::KIND, header.id(), previous);
                true
            }
            None => false,
        }
    }
}
