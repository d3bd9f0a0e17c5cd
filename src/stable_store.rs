//! StableStore: segmented hive with stable addresses and per-segment locking.
//!
//! Elements live in fixed-capacity segments that are allocated once and
//! never moved or freed while the store lives, so the address of an
//! element stays valid for as long as it occupies its slot. Each segment
//! keeps its own free list behind its own mutex; erasing touches only the
//! segment that holds the slot. The segment list itself sits behind an
//! `RwLock` that is written only when a new segment is appended.
//!
//! Every slot carries a generation: odd while occupied, even while vacant,
//! bumped on each insert and erase. `StableAddress` remembers the
//! generation it was issued with, so a stale address never resolves to a
//! later occupant of the same slot.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use core::cell::UnsafeCell;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use parking_lot::{Mutex, MutexGuard, RwLock};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

#[inline]
fn is_occupied(generation: u32) -> bool {
    generation & 1 == 1
}

#[repr(C)]
struct Slot<T> {
    // Must stay the first field: the `*const T` handed out for a slot is
    // also a valid `*const Slot<T>`.
    value: UnsafeCell<MaybeUninit<T>>,
    generation: AtomicU32,
    segment: AtomicPtr<Segment<T>>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            generation: AtomicU32::new(0),
            segment: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

struct FreeList {
    vacant: Vec<u32>,
}

struct Segment<T> {
    store_id: u64,
    index: usize,
    slots: Box<[Slot<T>]>,
    free: Mutex<FreeList>,
    live: AtomicUsize,
    reentrancy: DebugReentrancy,
}

struct SegmentGuard<'a> {
    // Declared first so the holder is cleared before the mutex unlocks.
    _entered: ReentrancyGuard<'a>,
    free: MutexGuard<'a, FreeList>,
}

impl<T> Segment<T> {
    fn new(store_id: u64, index: usize, capacity: usize) -> Box<Self> {
        let slots: Box<[Slot<T>]> = (0..capacity).map(|_| Slot::vacant()).collect();
        // Reversed so that pop() hands out the lowest index first.
        let vacant: Vec<u32> = (0..capacity as u32).rev().collect();
        let segment = Box::new(Self {
            store_id,
            index,
            slots,
            free: Mutex::new(FreeList { vacant }),
            live: AtomicUsize::new(0),
            reentrancy: DebugReentrancy::new(),
        });
        let raw = &*segment as *const Segment<T> as *mut Segment<T>;
        for slot in segment.slots.iter() {
            slot.segment.store(raw, Ordering::Relaxed);
        }
        segment
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn lock(&self) -> SegmentGuard<'_> {
        self.reentrancy.check();
        let free = self.free.lock();
        let _entered = self.reentrancy.enter();
        SegmentGuard { _entered, free }
    }

    /// Move `value` into a vacant slot, or hand it back if the segment is full.
    fn try_insert(&self, store_id: u64, value: T) -> core::result::Result<StableAddress<T>, T> {
        if self.live.load(Ordering::Relaxed) >= self.capacity() {
            return Err(value);
        }
        let mut guard = self.lock();
        let Some(index) = guard.free.vacant.pop() else {
            return Err(value);
        };
        let slot = &self.slots[index as usize];
        // SAFETY: the slot was on the free list, so nobody else can reach its value.
        unsafe { (*slot.value.get()).write(value) };
        let generation = slot.generation.load(Ordering::Relaxed).wrapping_add(1);
        debug_assert!(is_occupied(generation));
        slot.generation.store(generation, Ordering::Release);
        self.live.fetch_add(1, Ordering::Relaxed);
        drop(guard);
        Ok(StableAddress::new(
            store_id,
            NonNull::from(slot).cast::<T>(),
            generation,
        ))
    }

    fn has_vacancy(&self) -> bool {
        !self.lock().free.vacant.is_empty()
    }

    /// Move the value out of slot `index` if it still holds `generation`.
    fn take(&self, index: usize, generation: u32) -> Result<T> {
        let mut guard = self.lock();
        let slot = &self.slots[index];
        let current = slot.generation.load(Ordering::Relaxed);
        if current != generation || !is_occupied(current) {
            return Err(Error::InvalidAddress);
        }
        // SAFETY: occupied, and the generation bump below retires the slot
        // before anyone can observe the moved-out bytes.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.generation
            .store(current.wrapping_add(1), Ordering::Release);
        guard.free.vacant.push(index as u32);
        self.live.fetch_sub(1, Ordering::Relaxed);
        Ok(value)
    }

    fn index_of(&self, slot: *const Slot<T>) -> Option<usize> {
        let size = mem::size_of::<Slot<T>>();
        let base = self.slots.as_ptr() as usize;
        let addr = slot as usize;
        let offset = addr.checked_sub(base)?;
        if offset % size != 0 || offset / size >= self.slots.len() {
            return None;
        }
        Some(offset / size)
    }
}

/// Address of a live element, usable for as long as the element occupies
/// its slot. Copies are plain values and do not keep the element alive.
pub struct StableAddress<T> {
    store_id: u64,
    ptr: NonNull<T>,
    generation: u32,
}

impl<T> StableAddress<T> {
    fn new(store_id: u64, ptr: NonNull<T>, generation: u32) -> Self {
        Self {
            store_id,
            ptr,
            generation,
        }
    }

    /// The element's address. It never changes while the element is live.
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn slot_ptr(&self) -> NonNull<Slot<T>> {
        self.ptr.cast()
    }
}

impl<T> Clone for StableAddress<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StableAddress<T> {}

impl<T> PartialEq for StableAddress<T> {
    fn eq(&self, other: &Self) -> bool {
        self.store_id == other.store_id
            && self.ptr == other.ptr
            && self.generation == other.generation
    }
}

impl<T> Eq for StableAddress<T> {}

impl<T> Hash for StableAddress<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store_id.hash(state);
        self.ptr.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for StableAddress<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableAddress")
            .field("store", &self.store_id)
            .field("ptr", &self.ptr)
            .field("generation", &self.generation)
            .finish()
    }
}

// SAFETY: an address is an inert token; every dereference goes through the store.
unsafe impl<T: Sync> Send for StableAddress<T> {}
unsafe impl<T: Sync> Sync for StableAddress<T> {}

/// Occupancy snapshot of one store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreReport {
    pub live: usize,
    pub capacity: usize,
    pub segments: usize,
}

pub struct StableStore<T> {
    id: u64,
    config: StoreConfig,
    segments: RwLock<Vec<Box<Segment<T>>>>,
    // Lowest segment index that may still have a vacant slot.
    insert_hint: AtomicUsize,
    len: AtomicUsize,
    capacity: AtomicUsize,
}

// SAFETY: values are moved out on erase from whichever thread erases them
// (needs Send) and shared by reference across threads (needs Sync). All
// slot bookkeeping is guarded by the segment mutexes and atomics.
unsafe impl<T: Send> Send for StableStore<T> {}
unsafe impl<T: Send + Sync> Sync for StableStore<T> {}

impl<T> StableStore<T> {
    pub fn new() -> Self {
        Self::build(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            segments: RwLock::new(Vec::new()),
            insert_hint: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots across all segments.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    pub fn report(&self) -> StoreReport {
        StoreReport {
            live: self.len(),
            capacity: self.capacity(),
            segments: self.segment_count(),
        }
    }

    fn segment(&self, index: usize) -> Option<&Segment<T>> {
        let segments = self.segments.read();
        let segment: *const Segment<T> = &**segments.get(index)?;
        // SAFETY: segments are boxed, only ever appended, and freed only when
        // the store drops, which cannot happen while `&self` is borrowed.
        Some(unsafe { &*segment })
    }

    /// Append a segment unless another thread already did so past `observed`.
    fn grow(&self, observed: usize) {
        let mut segments = self.segments.write();
        if segments.len() > observed {
            return;
        }
        let capacity = self.config.segment_capacity(observed);
        segments.push(Segment::new(self.id, observed, capacity));
        self.capacity.fetch_add(capacity, Ordering::Relaxed);
        log::debug!(
            "stable store {}: allocated segment {} with {} slots",
            self.id,
            observed,
            capacity
        );
    }

    /// Store `value` and return its address. Vacant slots in existing
    /// segments are reused before a new segment is allocated.
    pub fn insert(&self, value: T) -> StableAddress<T> {
        let mut value = value;
        let mut index = self.insert_hint.load(Ordering::Relaxed);
        loop {
            let Some(segment) = self.segment(index) else {
                self.grow(index);
                continue;
            };
            match segment.try_insert(self.id, value) {
                Ok(address) => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return address;
                }
                Err(back) => {
                    value = back;
                    self.advance_hint(segment);
                    index += 1;
                }
            }
        }
    }

    /// Move the insert hint past `segment`, which was just found full.
    ///
    /// An erase that frees a slot in `segment` before our compare-exchange
    /// lowers the hint too early to matter, so the free list is re-read under
    /// the segment lock afterwards. An erase after that re-read happens after
    /// the compare-exchange and lowers the hint itself.
    fn advance_hint(&self, segment: &Segment<T>) {
        let index = segment.index;
        let advanced = self
            .insert_hint
            .compare_exchange(index, index + 1, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok();
        if advanced && segment.has_vacancy() {
            self.insert_hint.fetch_min(index, Ordering::Relaxed);
        }
    }

    /// Remove the element at `address` and hand it back to the caller, who
    /// drops it after the segment lock has been released.
    ///
    /// Fails with `InvalidAddress` if the slot no longer holds the element
    /// the address was issued for (double erase, stale or foreign address).
    pub fn erase(&self, address: StableAddress<T>) -> Result<T> {
        if address.store_id != self.id {
            return Err(Error::InvalidAddress);
        }
        // SAFETY: the address was issued by this store, so its slot lives in
        // one of our segments, which outlive `&self`.
        let (segment, index) = unsafe { self.locate(address.ptr) }?;
        let value = segment.take(index, address.generation)?;
        self.len.fetch_sub(1, Ordering::Relaxed);
        self.insert_hint.fetch_min(segment.index, Ordering::Relaxed);
        Ok(value)
    }

    /// Whether `address` still refers to the element it was issued for.
    pub fn contains(&self, address: StableAddress<T>) -> bool {
        if address.store_id != self.id {
            return false;
        }
        // SAFETY: issued by this store; slot memory outlives `&self`.
        let slot = unsafe { address.slot_ptr().as_ref() };
        slot.generation.load(Ordering::Acquire) == address.generation
    }

    /// Run `f` on the element while its segment is locked, so it cannot be
    /// erased concurrently. `f` must not insert into or erase from this store.
    pub fn with<R>(&self, address: StableAddress<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        if address.store_id != self.id {
            return None;
        }
        // SAFETY: issued by this store; slot memory outlives `&self`.
        let (segment, index) = unsafe { self.locate(address.ptr) }.ok()?;
        let _guard = segment.lock();
        let slot = &segment.slots[index];
        if slot.generation.load(Ordering::Relaxed) != address.generation {
            return None;
        }
        // SAFETY: occupied with the expected generation, and erase is blocked
        // by the segment lock we hold.
        Some(f(unsafe { (*slot.value.get()).assume_init_ref() }))
    }

    /// Borrow the element without locking.
    ///
    /// # Safety
    /// The caller must guarantee that `address` is not erased while the
    /// returned reference is alive (for example by holding a counted
    /// reference to the element).
    pub unsafe fn get(&self, address: StableAddress<T>) -> Option<&T> {
        if !self.contains(address) {
            return None;
        }
        // SAFETY: occupied, and the caller rules out a concurrent erase.
        Some(unsafe { address.ptr.as_ref() })
    }

    /// Recover the current address of a raw element pointer.
    ///
    /// Fails with `InvalidAddress` if the slot is vacant or belongs to a
    /// different store. A pointer to a slot that has since been reused
    /// resolves to the new occupant; raw pointers carry no generation.
    ///
    /// # Safety
    /// `ptr` must have been returned by a `StableStore<T>` that is still alive.
    pub unsafe fn address_of(&self, ptr: NonNull<T>) -> Result<StableAddress<T>> {
        let (segment, index) = unsafe { self.locate(ptr) }?;
        let generation = segment.slots[index].generation.load(Ordering::Acquire);
        if !is_occupied(generation) {
            return Err(Error::InvalidAddress);
        }
        Ok(StableAddress::new(self.id, ptr, generation))
    }

    /// # Safety
    /// `ptr` must point into a slot of a live `StableStore<T>`.
    unsafe fn locate(&self, ptr: NonNull<T>) -> Result<(&Segment<T>, usize)> {
        let slot = ptr.cast::<Slot<T>>();
        let segment = unsafe { slot.as_ref() }.segment.load(Ordering::Acquire);
        // SAFETY: non-null segment pointers are set once at segment creation
        // and stay valid while their store lives.
        let segment = unsafe { segment.as_ref() }.ok_or(Error::InvalidAddress)?;
        if segment.store_id != self.id {
            return Err(Error::InvalidAddress);
        }
        let index = segment
            .index_of(slot.as_ptr())
            .ok_or(Error::InvalidAddress)?;
        Ok((segment, index))
    }

    /// Visit every live element, one segment at a time with that segment
    /// locked. Elements inserted into later segments during the walk may or
    /// may not be visited. `f` must not insert into or erase from this
    /// store; debug builds panic if it touches a locked segment.
    pub fn for_each(&self, mut f: impl FnMut(StableAddress<T>, &T)) {
        let mut index = 0;
        while let Some(segment) = self.segment(index) {
            let _guard = segment.lock();
            for slot in segment.slots.iter() {
                let generation = slot.generation.load(Ordering::Relaxed);
                if !is_occupied(generation) {
                    continue;
                }
                let address = StableAddress::new(self.id, NonNull::from(slot).cast(), generation);
                // SAFETY: occupied, and the segment lock blocks erasure.
                f(address, unsafe { (*slot.value.get()).assume_init_ref() });
            }
            index += 1;
        }
    }
}

impl<T> Default for StableStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for StableStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableStore")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T> Drop for StableStore<T> {
    fn drop(&mut self) {
        for segment in self.segments.get_mut().iter_mut() {
            for slot in segment.slots.iter_mut() {
                let generation = slot.generation.get_mut();
                if is_occupied(*generation) {
                    *generation = generation.wrapping_add(1);
                    // SAFETY: occupied, and `&mut self` excludes every other access.
                    unsafe { slot.value.get_mut().assume_init_drop() };
                }
            }
        }
    }
}
