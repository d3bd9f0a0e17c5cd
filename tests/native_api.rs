// C surface suite, driven through the process-wide registry.
//
// Tests in this binary share one registry and run concurrently, so they
// never shut it down, never collect from its deletion queue, and never
// touch a handle after its last release. Teardown is observed through
// `DeletionQueue::pending_for`, keyed by each resource's own id.
use rc_hive::native::{
    self, rchive_buffer_add_ref, rchive_buffer_create, rchive_buffer_destroy, rchive_buffer_map,
    rchive_buffer_ref_count, rchive_buffer_release, rchive_buffer_unmap,
    rchive_registry_construct, rchive_texture_add_ref, rchive_texture_create,
    rchive_texture_destroy, rchive_texture_ref_count, rchive_texture_release, RchiveBuffer,
    RchiveBufferDescriptor, RchiveStatus, RchiveTexture, RchiveTextureDescriptor,
    RCHIVE_FORMAT_DEPTH32_FLOAT, RCHIVE_FORMAT_RGBA8_UNORM,
};
use rc_hive::{Buffer, InternalState, Resource, ResourceId, ResourceRegistry, Texture};

fn registry() -> &'static ResourceRegistry {
    let _ = env_logger::builder().is_test(true).try_init();
    let status = rchive_registry_construct();
    assert!(matches!(
        status,
        RchiveStatus::Success | RchiveStatus::RegistryAlreadyConstructed
    ));
    ResourceRegistry::instance().expect("constructed above")
}

fn texture_desc() -> RchiveTextureDescriptor {
    RchiveTextureDescriptor {
        width: 256,
        height: 256,
        depth_or_array_layers: 1,
        mip_level_count: 1,
        format: RCHIVE_FORMAT_RGBA8_UNORM,
    }
}

fn texture_id(t: RchiveTexture) -> ResourceId {
    unsafe { native::with_resource(t.cast::<Texture>(), |t| t.header().id()) }.unwrap()
}

fn texture_state(t: RchiveTexture) -> InternalState {
    unsafe { native::with_resource(t.cast::<Texture>(), |t| t.header().state()) }.unwrap()
}

fn buffer_id(b: RchiveBuffer) -> ResourceId {
    unsafe { native::with_resource(b.cast::<Buffer>(), |b| b.header().id()) }.unwrap()
}

// Test: create, destroy, destroy, release through the C functions.
// Verifies: destroy leaves the count alone, fires teardown once, and the
// final release does not fire it again.
#[test]
fn c_destroy_twice_then_release() {
    let r = registry();
    let t = unsafe { rchive_texture_create(&texture_desc()) };
    assert!(!t.is_null());
    let id = texture_id(t);
    assert_eq!(unsafe { rchive_texture_ref_count(t) }, 1);
    assert_eq!(texture_state(t), InternalState::Available);

    unsafe { rchive_texture_destroy(t) };
    assert_eq!(texture_state(t), InternalState::Destroyed);
    assert_eq!(unsafe { rchive_texture_ref_count(t) }, 1);
    assert_eq!(r.deletion_queue().pending_for(id), 1);

    unsafe { rchive_texture_destroy(t) };
    assert_eq!(r.deletion_queue().pending_for(id), 1);

    unsafe { rchive_texture_release(t) };
    assert_eq!(r.deletion_queue().pending_for(id), 1);
}

// Test: create, add_ref, release, release through the C functions.
// Verifies: the resource stays alive and Available until the last
// release, which then fires teardown exactly once.
#[test]
fn c_add_ref_then_two_releases() {
    let r = registry();
    let t = unsafe { rchive_texture_create(&texture_desc()) };
    let id = texture_id(t);

    unsafe { rchive_texture_add_ref(t) };
    assert_eq!(unsafe { rchive_texture_ref_count(t) }, 2);
    unsafe { rchive_texture_release(t) };
    assert_eq!(unsafe { rchive_texture_ref_count(t) }, 1);
    assert_eq!(texture_state(t), InternalState::Available);
    assert_eq!(r.deletion_queue().pending_for(id), 0);

    unsafe { rchive_texture_release(t) };
    assert_eq!(r.deletion_queue().pending_for(id), 1);
}

#[test]
fn c_buffer_map_states() {
    let r = registry();
    let desc = RchiveBufferDescriptor {
        size: 128,
        mapped_at_creation: true,
    };
    let b = unsafe { rchive_buffer_create(&desc) };
    assert!(!b.is_null());
    let id = buffer_id(b);

    assert_eq!(unsafe { rchive_buffer_map(b) }, RchiveStatus::AlreadyMapped);
    assert_eq!(unsafe { rchive_buffer_unmap(b) }, RchiveStatus::Success);
    assert_eq!(unsafe { rchive_buffer_unmap(b) }, RchiveStatus::NotMapped);
    assert_eq!(unsafe { rchive_buffer_map(b) }, RchiveStatus::Success);

    unsafe { rchive_buffer_add_ref(b) };
    assert_eq!(unsafe { rchive_buffer_ref_count(b) }, 2);
    unsafe { rchive_buffer_destroy(b) };
    assert_eq!(unsafe { rchive_buffer_map(b) }, RchiveStatus::UseAfterDestroy);
    assert_eq!(unsafe { rchive_buffer_unmap(b) }, RchiveStatus::UseAfterDestroy);
    assert_eq!(r.deletion_queue().pending_for(id), 1);

    unsafe { rchive_buffer_release(b) };
    unsafe { rchive_buffer_release(b) };
    assert_eq!(r.deletion_queue().pending_for(id), 1);
}

// Test: invalid descriptors.
// Verifies: create returns null instead of panicking or allocating.
#[test]
fn c_invalid_descriptors_return_null() {
    registry();
    let mut desc = texture_desc();
    desc.format = 42;
    assert!(unsafe { rchive_texture_create(&desc) }.is_null());
    desc.format = RCHIVE_FORMAT_DEPTH32_FLOAT;
    desc.width = 0;
    assert!(unsafe { rchive_texture_create(&desc) }.is_null());
    assert!(unsafe { rchive_texture_create(std::ptr::null()) }.is_null());
    assert!(unsafe { rchive_buffer_create(std::ptr::null()) }.is_null());
    let huge = RchiveBufferDescriptor {
        size: u64::MAX,
        mapped_at_creation: true,
    };
    assert!(unsafe { rchive_buffer_create(&huge) }.is_null());
}

// Test: null handles.
// Verifies: every entry point reports them and returns without effect.
#[test]
fn c_null_handles_are_ignored() {
    registry();
    unsafe {
        rchive_texture_destroy(std::ptr::null_mut());
        rchive_texture_add_ref(std::ptr::null_mut());
        rchive_texture_release(std::ptr::null_mut());
        rchive_buffer_destroy(std::ptr::null_mut());
        rchive_buffer_add_ref(std::ptr::null_mut());
        rchive_buffer_release(std::ptr::null_mut());
        assert_eq!(rchive_buffer_map(std::ptr::null_mut()), RchiveStatus::InvalidAddress);
        assert_eq!(rchive_buffer_unmap(std::ptr::null_mut()), RchiveStatus::InvalidAddress);
        assert_eq!(rchive_buffer_ref_count(std::ptr::null_mut()), 0);
    }
}

// Test: handles shared across threads through the C surface.
// Verifies: balanced add_ref/release from many threads leaves exactly the
// creation reference, and the final release tears down once.
#[test]
fn c_handles_cross_threads() {
    let r = registry();
    let t = unsafe { rchive_texture_create(&texture_desc()) };
    let id = texture_id(t);
    let addr = t as usize;
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(move || {
                let t = addr as RchiveTexture;
                for _ in 0..1_000 {
                    unsafe { rchive_texture_add_ref(t) };
                    unsafe { rchive_texture_release(t) };
                }
            });
        }
    });
    assert_eq!(unsafe { rchive_texture_ref_count(t) }, 1);
    assert_eq!(r.deletion_queue().pending_for(id), 0);
    unsafe { rchive_texture_release(t) };
    assert_eq!(r.deletion_queue().pending_for(id), 1);
}
