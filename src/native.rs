//! Native surface over the process-wide registry.
//!
//! The typed functions translate raw pointers into add-ref, release and
//! destroy calls and report failures as `Err`. The `extern "C"` functions
//! below wrap them for C callers: a handle is an opaque pointer carrying
//! exactly the references the caller has counted, never an owning value.
//! Nothing here panics, so no unwind can cross the boundary.

use crate::buffer::{Buffer, BufferDescriptor, MAX_BUFFER_SIZE};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::registry::{Released, ResourceRegistry};
use crate::resource::Resource;
use crate::texture::{Extent3d, Texture, TextureDescriptor, TextureFormat};
use core::ptr::{self, NonNull};

fn registry() -> Result<&'static ResourceRegistry> {
    ResourceRegistry::instance().ok_or_else(|| {
        log::error!("resource registry used before construction");
        Error::RegistryNotConstructed
    })
}

fn non_null<T: Resource>(ptr: *mut T) -> Result<NonNull<T>> {
    NonNull::new(ptr).ok_or_else(|| {
        log::error!("null {} handle", T::KIND);
        Error::InvalidAddress
    })
}

/// Create a resource in the process-wide registry. The returned pointer
/// carries the creation reference.
pub fn create_resource<T: Resource>(desc: T::Descriptor) -> Result<NonNull<T>> {
    Ok(registry()?.create::<T>(desc).into_raw())
}

/// # Safety
/// `ptr` must be null or a pointer returned by `create_resource` on which
/// the caller still holds a reference.
pub unsafe fn destroy_resource<T: Resource>(ptr: *mut T) -> Result<bool> {
    let ptr = non_null(ptr)?;
    unsafe { registry()?.destroy(ptr) }
}

/// # Safety
/// As for `destroy_resource`.
pub unsafe fn add_ref<T: Resource>(ptr: *mut T) -> Result<usize> {
    let ptr = non_null(ptr)?;
    unsafe { registry()?.add_ref(ptr) }
}

/// # Safety
/// As for `destroy_resource`. The reference given up is the caller's; if it
/// was the last one, `ptr` must not be used again.
pub unsafe fn release<T: Resource>(ptr: *mut T) -> Result<Released> {
    let ptr = non_null(ptr)?;
    unsafe { registry()?.release(ptr) }
}

/// Run `f` on the resource behind `ptr`.
///
/// # Safety
/// As for `destroy_resource`.
pub unsafe fn with_resource<T: Resource, R>(ptr: *mut T, f: impl FnOnce(&T) -> R) -> Result<R> {
    let ptr = non_null(ptr)?;
    let resource = unsafe { registry()?.resolve(ptr) }?;
    Ok(f(resource))
}

/// Result code of the C functions that return one.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RchiveStatus {
    Success = 0,
    InvalidAddress = 1,
    DoubleReleaseDetected = 2,
    UseAfterDestroy = 3,
    AlreadyMapped = 4,
    NotMapped = 5,
    RegistryAlreadyConstructed = 6,
    RegistryNotConstructed = 7,
    LiveResources = 8,
    InvalidConfig = 9,
    InvalidDescriptor = 10,
    AllocationFailed = 11,
}

impl From<&Error> for RchiveStatus {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidAddress => RchiveStatus::InvalidAddress,
            Error::DoubleReleaseDetected => RchiveStatus::DoubleReleaseDetected,
            Error::UseAfterDestroy => RchiveStatus::UseAfterDestroy,
            Error::AlreadyMapped => RchiveStatus::AlreadyMapped,
            Error::NotMapped => RchiveStatus::NotMapped,
            Error::RegistryAlreadyConstructed => RchiveStatus::RegistryAlreadyConstructed,
            Error::RegistryNotConstructed => RchiveStatus::RegistryNotConstructed,
            Error::LiveResources { .. } => RchiveStatus::LiveResources,
            Error::InvalidConfig(_) => RchiveStatus::InvalidConfig,
            Error::InvalidDescriptor(_) => RchiveStatus::InvalidDescriptor,
            Error::AllocationFailed { .. } => RchiveStatus::AllocationFailed,
        }
    }
}

impl<T> From<Result<T>> for RchiveStatus {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => RchiveStatus::Success,
            Err(err) => RchiveStatus::from(&err),
        }
    }
}

#[repr(C)]
pub struct RchiveTextureImpl {
    _opaque: [u8; 0],
}

#[repr(C)]
pub struct RchiveBufferImpl {
    _opaque: [u8; 0],
}

pub type RchiveTexture = *mut RchiveTextureImpl;
pub type RchiveBuffer = *mut RchiveBufferImpl;

/// Texture formats, numbered as in `rc_hive.h`.
pub const RCHIVE_FORMAT_RGBA8_UNORM: u32 = 0;
pub const RCHIVE_FORMAT_BGRA8_UNORM: u32 = 1;
pub const RCHIVE_FORMAT_RGBA16_FLOAT: u32 = 2;
pub const RCHIVE_FORMAT_DEPTH32_FLOAT: u32 = 3;

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct RchiveTextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub format: u32,
}

impl TryFrom<&RchiveTextureDescriptor> for TextureDescriptor {
    type Error = Error;

    fn try_from(desc: &RchiveTextureDescriptor) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 || desc.depth_or_array_layers == 0 {
            return Err(Error::InvalidDescriptor("texture extent must be non-zero"));
        }
        let format = match desc.format {
            RCHIVE_FORMAT_RGBA8_UNORM => TextureFormat::Rgba8Unorm,
            RCHIVE_FORMAT_BGRA8_UNORM => TextureFormat::Bgra8Unorm,
            RCHIVE_FORMAT_RGBA16_FLOAT => TextureFormat::Rgba16Float,
            RCHIVE_FORMAT_DEPTH32_FLOAT => TextureFormat::Depth32Float,
            _ => return Err(Error::InvalidDescriptor("unknown texture format")),
        };
        Ok(TextureDescriptor {
            label: None,
            size: Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth_or_array_layers,
            },
            mip_level_count: desc.mip_level_count,
            format,
        })
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct RchiveBufferDescriptor {
    pub size: u64,
    pub mapped_at_creation: bool,
}

impl TryFrom<&RchiveBufferDescriptor> for BufferDescriptor {
    type Error = Error;

    fn try_from(desc: &RchiveBufferDescriptor) -> Result<Self> {
        if desc.size > MAX_BUFFER_SIZE {
            return Err(Error::InvalidDescriptor("buffer size exceeds isize::MAX"));
        }
        Ok(BufferDescriptor {
            label: None,
            size: desc.size,
            mapped_at_creation: desc.mapped_at_creation,
        })
    }
}

fn report<T>(what: &str, result: Result<T>) {
    if let Err(err) = result {
        log::debug!("{what} failed: {err}");
    }
}

/// Construct the process-wide registry with the default configuration.
#[no_mangle]
pub extern "C" fn rchive_registry_construct() -> RchiveStatus {
    ResourceRegistry::construct(RegistryConfig::default()).into()
}

/// # Safety
/// No handle may be used after this returns `Success`.
#[no_mangle]
pub unsafe extern "C" fn rchive_registry_shutdown() -> RchiveStatus {
    unsafe { ResourceRegistry::shutdown() }.into()
}

/// Start a new submission and return its index, or 0 if the registry is
/// not constructed.
#[no_mangle]
pub extern "C" fn rchive_registry_submit() -> u64 {
    registry().map(ResourceRegistry::submit).unwrap_or(0)
}

/// Drain the teardown requests whose last use finished by submission
/// `completed` and return how many there were.
#[no_mangle]
pub extern "C" fn rchive_registry_collect_destroyed(completed: u64) -> usize {
    registry()
        .map(|r| r.collect_destroyed(completed).len())
        .unwrap_or(0)
}

/// Number of teardown requests not yet collected, or 0 if the registry is
/// not constructed.
#[no_mangle]
pub extern "C" fn rchive_registry_pending_destructions() -> usize {
    registry()
        .map(|r| r.deletion_queue().pending())
        .unwrap_or(0)
}

/// Returns null if the registry is not constructed or `desc` is invalid.
///
/// # Safety
/// `desc` must be null or point to a valid descriptor.
#[no_mangle]
pub unsafe extern "C" fn rchive_texture_create(
    desc: *const RchiveTextureDescriptor,
) -> RchiveTexture {
    // SAFETY: caller guarantees desc is null or valid.
    let Some(desc) = (unsafe { desc.as_ref() }) else {
        log::error!("rchive_texture_create: null descriptor");
        return ptr::null_mut();
    };
    let created = TextureDescriptor::try_from(desc).and_then(create_resource::<Texture>);
    match created {
        Ok(texture) => texture.as_ptr().cast(),
        Err(err) => {
            log::error!("rchive_texture_create: {err}");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `texture` must be null or a live handle the caller holds a reference on.
#[no_mangle]
pub unsafe extern "C" fn rchive_texture_destroy(texture: RchiveTexture) {
    report("rchive_texture_destroy", unsafe {
        destroy_resource(texture.cast::<Texture>())
    });
}

/// # Safety
/// As for `rchive_texture_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_texture_add_ref(texture: RchiveTexture) {
    report("rchive_texture_add_ref", unsafe {
        add_ref(texture.cast::<Texture>())
    });
}

/// # Safety
/// As for `rchive_texture_destroy`; after the last release `texture` is
/// dangling.
#[no_mangle]
pub unsafe extern "C" fn rchive_texture_release(texture: RchiveTexture) {
    report("rchive_texture_release", unsafe {
        release(texture.cast::<Texture>())
    });
}

/// Current reference count, or 0 for an invalid handle.
///
/// # Safety
/// As for `rchive_texture_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_texture_ref_count(texture: RchiveTexture) -> usize {
    unsafe { with_resource(texture.cast::<Texture>(), |t| t.header().ref_count().get()) }
        .unwrap_or(0)
}

/// Record that `submission` uses `texture`; its teardown waits for it.
///
/// # Safety
/// As for `rchive_texture_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_texture_mark_used(texture: RchiveTexture, submission: u64) {
    report("rchive_texture_mark_used", unsafe {
        with_resource(texture.cast::<Texture>(), |t| t.header().mark_used(submission))
    });
}

/// Returns null if the registry is not constructed or `desc` is null or
/// asks for more than `isize::MAX` bytes. A buffer mapped at creation whose
/// staging range cannot be allocated is returned unmapped.
///
/// # Safety
/// `desc` must be null or point to a valid descriptor.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_create(desc: *const RchiveBufferDescriptor) -> RchiveBuffer {
    // SAFETY: caller guarantees desc is null or valid.
    let Some(desc) = (unsafe { desc.as_ref() }) else {
        log::error!("rchive_buffer_create: null descriptor");
        return ptr::null_mut();
    };
    let created = BufferDescriptor::try_from(desc).and_then(create_resource::<Buffer>);
    match created {
        Ok(buffer) => buffer.as_ptr().cast(),
        Err(err) => {
            log::error!("rchive_buffer_create: {err}");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `buffer` must be null or a live handle the caller holds a reference on.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_destroy(buffer: RchiveBuffer) {
    report("rchive_buffer_destroy", unsafe {
        destroy_resource(buffer.cast::<Buffer>())
    });
}

/// # Safety
/// As for `rchive_buffer_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_add_ref(buffer: RchiveBuffer) {
    report("rchive_buffer_add_ref", unsafe {
        add_ref(buffer.cast::<Buffer>())
    });
}

/// # Safety
/// As for `rchive_buffer_destroy`; after the last release `buffer` is
/// dangling.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_release(buffer: RchiveBuffer) {
    report("rchive_buffer_release", unsafe {
        release(buffer.cast::<Buffer>())
    });
}

/// Current reference count, or 0 for an invalid handle.
///
/// # Safety
/// As for `rchive_buffer_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_ref_count(buffer: RchiveBuffer) -> usize {
    unsafe { with_resource(buffer.cast::<Buffer>(), |b| b.header().ref_count().get()) }
        .unwrap_or(0)
}

/// # Safety
/// As for `rchive_buffer_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_mark_used(buffer: RchiveBuffer, submission: u64) {
    report("rchive_buffer_mark_used", unsafe {
        with_resource(buffer.cast::<Buffer>(), |b| b.header().mark_used(submission))
    });
}

/// # Safety
/// As for `rchive_buffer_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_map(buffer: RchiveBuffer) -> RchiveStatus {
    unsafe { with_resource(buffer.cast::<Buffer>(), Buffer::map) }
        .and_then(|mapped| mapped)
        .into()
}

/// # Safety
/// As for `rchive_buffer_destroy`.
#[no_mangle]
pub unsafe extern "C" fn rchive_buffer_unmap(buffer: RchiveBuffer) -> RchiveStatus {
    unsafe { with_resource(buffer.cast::<Buffer>(), Buffer::unmap) }
        .and_then(|unmapped| unmapped)
        .into()
}
