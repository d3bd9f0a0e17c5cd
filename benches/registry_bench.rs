use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rc_hive::{RegistryConfig, ResourceRegistry, Texture, TextureDescriptor};
use std::time::Duration;

fn registry() -> ResourceRegistry {
    ResourceRegistry::new(RegistryConfig::default()).unwrap()
}

fn bench_create_release(c: &mut Criterion) {
    c.bench_function("registry_create_release_texture", |b| {
        let r = registry();
        // Keep some residents so segments are partly full.
        let _held: Vec<_> = (0..1_000)
            .map(|_| r.create::<Texture>(TextureDescriptor::default()))
            .collect();
        b.iter(|| {
            let h = r.create::<Texture>(TextureDescriptor::default());
            black_box(&h);
            drop(h);
            // Keep the deletion queue from growing without bound.
            r.collect_destroyed(u64::MAX);
        })
    });
}

fn bench_clone_drop_handle(c: &mut Criterion) {
    c.bench_function("registry_handle_clone_drop", |b| {
        let r = registry();
        let h = r.create::<Texture>(TextureDescriptor::default());
        b.iter(|| {
            let x = h.clone();
            black_box(&x);
            drop(x);
        })
    });
}

fn bench_raw_add_ref_release(c: &mut Criterion) {
    c.bench_function("registry_raw_add_ref_release", |b| {
        let r = registry();
        let ptr = r.create::<Texture>(TextureDescriptor::default()).into_raw();
        b.iter(|| unsafe {
            black_box(r.add_ref(ptr).unwrap());
            black_box(r.release(ptr).unwrap());
        });
        unsafe { r.release(ptr) }.unwrap();
    });
}

fn bench_contended_clone_drop(c: &mut Criterion) {
    c.bench_function("registry_handle_clone_drop_4_threads", |b| {
        let r = registry();
        let h = r.create::<Texture>(TextureDescriptor::default());
        b.iter(|| {
            std::thread::scope(|s| {
                for _ in 0..4 {
                    let h = &h;
                    s.spawn(move || {
                        for _ in 0..1_000 {
                            black_box(h.clone());
                        }
                    });
                }
            })
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_create_release, bench_clone_drop_handle, bench_raw_add_ref_release, bench_contended_clone_drop
}
criterion_main!(benches);
