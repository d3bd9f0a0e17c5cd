// Process-wide registry lifecycle. Kept in its own test binary with a
// single test, because it shuts the shared registry down.
use rc_hive::native::{
    rchive_buffer_create, rchive_buffer_mark_used, rchive_buffer_release,
    rchive_registry_collect_destroyed, rchive_registry_construct,
    rchive_registry_pending_destructions, rchive_registry_shutdown, rchive_registry_submit,
    rchive_texture_create, rchive_texture_mark_used, rchive_texture_release,
    RchiveBufferDescriptor, RchiveStatus, RchiveTextureDescriptor, RCHIVE_FORMAT_RGBA8_UNORM,
};
use rc_hive::{Error, RegistryConfig, ResourceRegistry};

// Test: construct, refuse shutdown while a resource is alive, shut down.
// Verifies: explicit ordered construction and teardown; creating through
// the C surface before construction or after shutdown yields null.
#[test]
fn construct_use_shutdown() {
    let _ = env_logger::builder().is_test(true).try_init();
    let desc = RchiveTextureDescriptor {
        width: 4,
        height: 4,
        depth_or_array_layers: 1,
        mip_level_count: 1,
        format: RCHIVE_FORMAT_RGBA8_UNORM,
    };

    assert!(ResourceRegistry::instance().is_none());
    assert!(unsafe { rchive_texture_create(&desc) }.is_null());
    assert_eq!(rchive_registry_submit(), 0);
    assert_eq!(rchive_registry_collect_destroyed(u64::MAX), 0);
    assert_eq!(
        unsafe { ResourceRegistry::shutdown() },
        Err(Error::RegistryNotConstructed)
    );

    assert_eq!(rchive_registry_construct(), RchiveStatus::Success);
    assert!(matches!(
        ResourceRegistry::construct(RegistryConfig::default()),
        Err(Error::RegistryAlreadyConstructed)
    ));

    let t = unsafe { rchive_texture_create(&desc) };
    assert!(!t.is_null());
    assert_eq!(
        unsafe { ResourceRegistry::shutdown() },
        Err(Error::LiveResources { live: 1 })
    );
    assert!(ResourceRegistry::instance().is_some());

    unsafe { rchive_texture_release(t) };
    assert_eq!(
        ResourceRegistry::instance().map(|r| r.report().pending_destructions),
        Some(1)
    );
    drain_through_submissions(&desc);
    assert_eq!(unsafe { rchive_registry_shutdown() }, RchiveStatus::Success);
    assert!(ResourceRegistry::instance().is_none());
    assert!(unsafe { rchive_texture_create(&desc) }.is_null());
    assert_eq!(rchive_registry_submit(), 0);
    assert_eq!(rchive_registry_collect_destroyed(u64::MAX), 0);
    assert_eq!(
        unsafe { rchive_registry_shutdown() },
        RchiveStatus::RegistryNotConstructed
    );

    // A new registry can be installed after a clean shutdown.
    assert!(ResourceRegistry::construct(RegistryConfig::default()).is_ok());
    assert_eq!(unsafe { rchive_registry_shutdown() }, RchiveStatus::Success);
}

// Drives submissions and collection through the C functions alone.
// Verifies: teardown requests wait for the submission that last used the
// resource, collection drains them, and the queue ends empty.
fn drain_through_submissions(desc: &RchiveTextureDescriptor) {
    assert_eq!(rchive_registry_collect_destroyed(0), 1);
    assert_eq!(rchive_registry_pending_destructions(), 0);

    let first = rchive_registry_submit();
    let second = rchive_registry_submit();
    assert_eq!(second, first + 1);

    let t = unsafe { rchive_texture_create(desc) };
    let b = unsafe {
        rchive_buffer_create(&RchiveBufferDescriptor {
            size: 32,
            mapped_at_creation: false,
        })
    };
    assert!(!t.is_null() && !b.is_null());
    unsafe {
        rchive_texture_mark_used(t, first);
        rchive_buffer_mark_used(b, second);
        rchive_texture_release(t);
        rchive_buffer_release(b);
    }
    assert_eq!(rchive_registry_pending_destructions(), 2);

    assert_eq!(rchive_registry_collect_destroyed(first - 1), 0);
    assert_eq!(rchive_registry_collect_destroyed(first), 1);
    assert_eq!(rchive_registry_pending_destructions(), 1);
    assert_eq!(rchive_registry_collect_destroyed(second), 1);
    assert_eq!(rchive_registry_pending_destructions(), 0);
}
