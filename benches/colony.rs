use colony_runtime::{Colony, ColonyConfig, HeapPages, Object, ObjectManager, Root};
use core::alloc::Layout;
use core::mem::MaybeUninit;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

struct Particle {
    position: [f32; 3],
    mass: f32,
}

unsafe impl Object for Particle {
    const NAME: &'static str = "Particle";
    type Base = Root;
    type Args = f32;

    fn construct(slot: &mut MaybeUninit<Self>, mass: f32) -> bool {
        slot.write(Self {
            position: [0.0; 3],
            mass,
        });
        true
    }
}

fn heap_colony(size: usize) -> Colony {
    let layout = Layout::from_size_align(size, 8).expect("layout");
    Colony::with_config(layout, ColonyConfig::default(), Arc::new(HeapPages::new(4096)))
        .expect("colony")
}

fn bench_emplace_erase(c: &mut Criterion) {
    let mut group = c.benchmark_group("emplace_erase");
    for size in [16usize, 64, 256] {
        let colony = heap_colony(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let ptr = colony.emplace().expect("emplace");
                black_box(colony.erase(ptr.as_ptr()));
            });
        });
    }
    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    c.bench_function("churn_1000", |b| {
        let colony = heap_colony(32);
        let mut live = Vec::with_capacity(1000);
        b.iter(|| {
            for _ in 0..1000 {
                live.push(colony.emplace().expect("emplace"));
            }
            for ptr in live.drain(..).step_by(2) {
                colony.erase(ptr.as_ptr());
            }
            colony.retain(|_| false);
        });
    });
}

fn bench_contains(c: &mut Criterion) {
    let colony = heap_colony(32);
    let ptrs: Vec<_> = (0..10_000).map(|_| colony.emplace().expect("emplace")).collect();

    c.bench_function("contains_10k", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 7919) % ptrs.len();
            black_box(colony.contains(ptrs[i].as_ptr()))
        });
    });
}

fn bench_manager_iterate(c: &mut Criterion) {
    let particles = ObjectManager::<Particle>::with_config(
        ColonyConfig::default(),
        Arc::new(HeapPages::new(4096)),
    )
    .expect("manager");
    for i in 0..10_000 {
        particles.new_instance(i as f32).expect("particle");
    }

    c.bench_function("manager_iterate_10k", |b| {
        b.iter(|| {
            particles.iterate(|_, p| {
                p.position[1] -= p.mass * 0.016;
                true
            })
        });
    });
}

criterion_group!(
    benches,
    bench_emplace_erase,
    bench_churn,
    bench_contains,
    bench_manager_iterate
);
criterion_main!(benches);
