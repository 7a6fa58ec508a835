//! Object manager tests
//!
//! Test suite organized by component:
//! - Registration: dispatch validation and pool sizing
//! - Creation: slot reuse, growth, initializer and constructor rollback
//! - Deletion: finalize-once and foreign handles
//! - Iteration: live-only walks and early exit
//! - Teardown: clear, destroy and drop
//! - Concurrency: shared manager across threads

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::colony::HeapPages;
    use crate::error::ColonyError;
    use crate::object::{base_slot, upcast, Root};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAGE: usize = 4096;

    struct Point {
        x: u64,
    }

    unsafe impl Object for Point {
        const NAME: &'static str = "Point";
        type Base = Root;
        type Args = u64;

        fn construct(slot: &mut MaybeUninit<Self>, x: u64) -> bool {
            slot.write(Self { x });
            true
        }
    }

    /// Counts finalize hooks and drops separately
    struct Tracked {
        id: usize,
        finalized: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    unsafe impl Object for Tracked {
        const NAME: &'static str = "Tracked";
        type Base = Root;
        type Args = (usize, Arc<AtomicUsize>, Arc<AtomicUsize>);

        fn construct(slot: &mut MaybeUninit<Self>, (id, finalized, dropped): Self::Args) -> bool {
            slot.write(Self { id, finalized, dropped });
            true
        }

        fn finalize(&mut self) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Constructor succeeds only when asked to
    struct Picky;

    unsafe impl Object for Picky {
        const NAME: &'static str = "Picky";
        type Base = Root;
        type Args = bool;

        fn construct(slot: &mut MaybeUninit<Self>, accept: bool) -> bool {
            if !accept {
                return false;
            }
            slot.write(Self);
            true
        }
    }

    /// Only ever created through an initializer that fills `seed`
    struct Seeded {
        seed: u32,
        next: u32,
    }

    unsafe impl Object for Seeded {
        const NAME: &'static str = "Seeded";
        type Base = Root;
        type Args = ();

        fn construct(slot: &mut MaybeUninit<Self>, _: ()) -> bool {
            let value = slot.as_mut_ptr();
            unsafe {
                let seed = core::ptr::addr_of!((*value).seed).read();
                core::ptr::addr_of_mut!((*value).next).write(seed + 1);
            }
            true
        }
    }

    #[repr(C)]
    struct Labeled {
        point: Point,
        label: &'static str,
    }

    unsafe impl Object for Labeled {
        const NAME: &'static str = "Labeled";
        type Base = Point;
        type Args = (u64, &'static str);

        fn construct(slot: &mut MaybeUninit<Self>, (x, label): Self::Args) -> bool {
            if !Point::construct(base_slot(slot), x) {
                return false;
            }
            unsafe { core::ptr::addr_of_mut!((*slot.as_mut_ptr()).label).write(label) };
            true
        }
    }

    struct Wide {
        _words: [u64; 4],
    }

    unsafe impl Object for Wide {
        const NAME: &'static str = "Wide";
        type Base = Root;
        type Args = ();

        fn construct(slot: &mut MaybeUninit<Self>, _: ()) -> bool {
            slot.write(Self { _words: [0; 4] });
            true
        }
    }

    /// Claims a base larger than itself; registration must refuse it
    struct Narrow {
        _byte: u8,
    }

    unsafe impl Object for Narrow {
        const NAME: &'static str = "Narrow";
        type Base = Wide;
        type Args = ();

        fn construct(_slot: &mut MaybeUninit<Self>, _: ()) -> bool {
            false
        }
    }

    fn heap_manager<T: Object>(config: ColonyConfig) -> ObjectManager<T> {
        ObjectManager::with_config(config, Arc::new(HeapPages::new(PAGE))).expect("manager")
    }

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)))
    }

    fn tracked(
        manager: &ObjectManager<Tracked>,
        id: usize,
        (finalized, dropped): &(Arc<AtomicUsize>, Arc<AtomicUsize>),
    ) -> ObjectRef<Tracked> {
        manager
            .new_instance((id, Arc::clone(finalized), Arc::clone(dropped)))
            .expect("instance")
    }

    // ===== Registration Tests =====

    #[test]
    fn registration_sizes_pool_from_descriptor() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        let layout = manager.layout();

        assert_eq!(layout.align(), 8);
        assert_eq!(layout.size(), 24);
        assert_eq!(manager.descriptor().size(), 24);
        assert!(manager.dispatch().is::<Point>());
        assert!(manager.is_empty());
    }

    #[test]
    fn registration_with_system_pages() {
        let manager = ObjectManager::<Point>::new().expect("manager");
        let obj = manager.new_instance(5).expect("instance");
        assert_eq!(unsafe { obj.get() }.x, 5);
    }

    #[test]
    fn registration_rejects_missing_table() {
        let result = ObjectManager::<Point>::from_table(
            None,
            ColonyConfig::default(),
            Arc::new(HeapPages::new(PAGE)),
        );
        assert!(matches!(result, Err(RuntimeError::NullDispatch)));
    }

    #[test]
    fn registration_rejects_foreign_table() {
        let result = ObjectManager::<Point>::from_table(
            Some(dispatch_table::<Tracked>()),
            ColonyConfig::default(),
            Arc::new(HeapPages::new(PAGE)),
        );
        assert!(matches!(
            result,
            Err(RuntimeError::TypeMismatch {
                expected: "Point",
                found: "Tracked"
            })
        ));
    }

    #[test]
    fn registration_rejects_base_that_does_not_fit() {
        let result = ObjectManager::<Narrow>::with_config(
            ColonyConfig::default(),
            Arc::new(HeapPages::new(PAGE)),
        );
        assert!(matches!(
            result,
            Err(RuntimeError::InvalidLayout {
                ty: "Narrow",
                base: "Wide"
            })
        ));
    }

    #[test]
    fn registration_surfaces_pool_errors() {
        let result = ObjectManager::<Point>::with_config(
            ColonyConfig::default().with_max_buckets(0),
            Arc::new(HeapPages::new(PAGE)),
        );
        assert!(matches!(
            result,
            Err(RuntimeError::Colony(ColonyError::InvalidConfig { .. }))
        ));
    }

    // ===== Creation Tests =====

    #[test]
    fn creation_yields_distinct_non_overlapping_instances() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        let size = manager.descriptor().size();

        let objs: Vec<_> = (0..4096u64)
            .map(|x| manager.new_instance(x).expect("instance"))
            .collect();
        assert_eq!(manager.len(), 4096);

        let mut addrs: Vec<usize> = objs.iter().map(|o| o.as_ptr() as usize).collect();
        addrs.sort_unstable();
        assert!(addrs.windows(2).all(|w| w[1] - w[0] >= size));
        assert!(addrs.iter().all(|a| a % 8 == 0));

        for (x, obj) in objs.iter().enumerate() {
            assert_eq!(unsafe { obj.get() }.x, x as u64);
        }

        for obj in objs.iter().rev() {
            assert!(manager.delete_instance(*obj));
            assert!(!manager.contains(*obj));
        }
        assert!(manager.is_empty());
    }

    #[test]
    fn creation_reuses_gap_left_by_delete() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        let a = manager.new_instance(1).expect("a");
        let b = manager.new_instance(2).expect("b");
        let c = manager.new_instance(3).expect("c");

        assert!(manager.delete_instance(b));
        let d = manager.new_instance(4).expect("d");

        assert_eq!(d, b);
        assert_eq!(unsafe { d.get() }.x, 4);
        assert!(manager.contains(a) && manager.contains(c));
    }

    #[test]
    fn creation_overflows_into_new_bucket() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        let first_capacity = PAGE / manager.descriptor().size();

        let objs: Vec<_> = (0..first_capacity as u64 + 1)
            .map(|x| manager.new_instance(x).expect("instance"))
            .collect();

        assert_eq!(manager.stats().buckets, 2);
        assert!(objs.iter().all(|&o| manager.contains(o)));
    }

    #[test]
    fn creation_fails_when_pool_is_exhausted() {
        let manager = heap_manager::<Point>(ColonyConfig::fixed());
        let capacity = manager.stats().capacity;

        for x in 0..capacity as u64 {
            manager.new_instance(x).expect("instance");
        }
        assert_eq!(manager.new_instance(0), Err(InstanceError::Exhausted));
        assert_eq!(manager.len(), capacity);
    }

    #[test]
    fn creation_stamps_header_with_manager_table() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        let obj = manager.new_instance(9).expect("instance");

        let header = unsafe { obj.header() };
        assert!(core::ptr::eq(header.dispatch(), manager.dispatch()));
        assert_eq!(header.state(), InstanceState::Live);
    }

    #[test]
    fn failing_initializer_rolls_back_slot() {
        let manager = heap_manager::<Picky>(ColonyConfig::default());
        let mut payload = 0usize;

        let result = manager.new_instance_with(
            |slot| {
                payload = slot.as_mut_ptr() as usize;
                false
            },
            true,
        );

        assert_eq!(result.err(), Some(InstanceError::InitFailed));
        assert!(manager.is_empty());
        let slot = payload - manager.descriptor().payload_offset();
        assert!(!manager.contains_raw(slot as *const u8));

        // The rolled back slot is the next one handed out
        let next = manager.new_instance(true).expect("instance");
        assert_eq!(next.as_ptr() as usize, slot);
    }

    #[test]
    fn initializer_output_reaches_constructor() {
        let manager = heap_manager::<Seeded>(ColonyConfig::default());
        let obj = manager
            .new_instance_with(
                |slot| {
                    unsafe { core::ptr::addr_of_mut!((*slot.as_mut_ptr()).seed).write(41) };
                    true
                },
                (),
            )
            .expect("instance");
        let value = unsafe { obj.get() };
        assert_eq!((value.seed, value.next), (41, 42));
    }

    #[test]
    fn failing_constructor_rolls_back_slot() {
        let manager = heap_manager::<Picky>(ColonyConfig::default());
        assert_eq!(manager.new_instance(false).err(), Some(InstanceError::ConstructFailed));
        assert!(manager.is_empty());
        assert_eq!(manager.iterate(|_, _| true), 0);
    }

    #[test]
    fn panicking_initializer_rolls_back_slot() {
        let manager = heap_manager::<Picky>(ColonyConfig::default());
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = manager.new_instance_with(|_| panic!("initializer blew up"), true);
        }));

        assert!(outcome.is_err());
        assert!(manager.is_empty());
        assert!(manager.new_instance(true).is_ok());
    }

    #[test]
    fn derived_instances_expose_their_base() {
        let manager = heap_manager::<Labeled>(ColonyConfig::default());
        let obj = manager.new_instance((11, "eleven")).expect("instance");

        let value = unsafe { obj.get() };
        assert_eq!(value.label, "eleven");
        assert_eq!(upcast(value).x, 11);

        let raw = obj.raw();
        assert_eq!(unsafe { raw.as_ancestor::<Point>() }.map(|p| p.x), Some(11));
        assert_eq!(manager.dispatch().depth(), 1);
    }

    // ===== Deletion Tests =====

    #[test]
    fn delete_finalizes_exactly_once() {
        let manager = heap_manager::<Tracked>(ColonyConfig::default());
        let counts = counters();
        let obj = tracked(&manager, 1, &counts);

        assert!(manager.delete_instance(obj));
        assert!(!manager.delete_instance(obj));
        assert!(!manager.contains(obj));

        assert_eq!(counts.0.load(Ordering::SeqCst), 1);
        assert_eq!(counts.1.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&counts.0), 1);
    }

    #[test]
    fn delete_ignores_handles_from_other_managers() {
        let ours = heap_manager::<Point>(ColonyConfig::default());
        let theirs = heap_manager::<Point>(ColonyConfig::default());
        let foreign = theirs.new_instance(1).expect("instance");

        assert!(!ours.contains(foreign));
        assert!(!ours.delete_instance(foreign));
        assert!(theirs.contains(foreign));
    }

    #[test]
    fn resolve_only_accepts_live_instances() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        let obj = manager.new_instance(3).expect("instance");

        assert_eq!(manager.resolve(obj.raw()), Some(obj));
        manager.delete_instance(obj);
        assert_eq!(manager.resolve(obj.raw()), None);
    }

    // ===== Iteration Tests =====

    #[test]
    fn iterate_visits_every_live_instance() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        let objs: Vec<_> = (0..10).map(|x| manager.new_instance(x).expect("instance")).collect();
        manager.delete_instance(objs[4]);

        let mut seen = HashSet::new();
        let visited = manager.iterate(|obj, value| {
            value.x *= 10;
            seen.insert(obj);
            true
        });

        assert_eq!(visited, 9);
        assert!(!seen.contains(&objs[4]));
        assert_eq!(unsafe { objs[3].get() }.x, 30);
    }

    #[test]
    fn len_matches_iterate_while_constructing() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        manager.new_instance(1).expect("first");
        manager.new_instance(2).expect("second");

        // The third slot is reserved but not yet live while this runs
        let obj = manager
            .new_instance_with(
                |_| {
                    assert_eq!(manager.len(), 2);
                    assert_eq!(manager.iterate(|_, _| true), 2);
                    assert!(!manager.is_empty());
                    true
                },
                3,
            )
            .expect("third");

        assert!(manager.contains(obj));
        assert_eq!(manager.len(), 3);
        assert_eq!(manager.iterate(|_, _| true), 3);
    }

    #[test]
    fn iterate_stops_early() {
        let manager = heap_manager::<Point>(ColonyConfig::default());
        for x in 0..10 {
            manager.new_instance(x).expect("instance");
        }

        let mut budget = 3;
        let visited = manager.iterate(|_, _| {
            budget -= 1;
            budget > 0
        });
        assert_eq!(visited, 3);
    }

    // ===== Teardown Tests =====

    #[test]
    fn clear_finalizes_all_and_keeps_manager_usable() {
        let manager = heap_manager::<Tracked>(ColonyConfig::default());
        let counts = counters();
        for id in 0..5 {
            tracked(&manager, id, &counts);
        }

        assert_eq!(manager.clear(), 5);
        assert!(manager.is_empty());
        assert_eq!(counts.1.load(Ordering::SeqCst), 5);

        let obj = tracked(&manager, 99, &counts);
        assert_eq!(unsafe { obj.get() }.id, 99);
    }

    #[test]
    fn destroy_finalizes_every_live_instance() {
        let manager = heap_manager::<Tracked>(ColonyConfig::default());
        let counts = counters();
        for id in 0..10 {
            tracked(&manager, id, &counts);
        }

        assert_eq!(manager.destroy(), 10);
        assert_eq!(counts.0.load(Ordering::SeqCst), 10);
        assert_eq!(counts.1.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn teardown_accounts_for_every_instance_created() {
        let manager = heap_manager::<Tracked>(ColonyConfig::default());
        let counts = counters();

        let first = tracked(&manager, 1, &counts);
        assert!(manager.delete_instance(first));
        let second = tracked(&manager, 2, &counts);
        assert_eq!(second, first);
        tracked(&manager, 3, &counts);

        assert_eq!(manager.destroy(), 2);
        assert_eq!(counts.0.load(Ordering::SeqCst), 3);
        assert_eq!(counts.1.load(Ordering::SeqCst), 3);
        assert_eq!(Arc::strong_count(&counts.0), 1);
        assert_eq!(Arc::strong_count(&counts.1), 1);
    }

    #[test]
    fn drop_finalizes_leftovers() {
        let counts = counters();
        {
            let manager = heap_manager::<Tracked>(ColonyConfig::default());
            for id in 0..3 {
                tracked(&manager, id, &counts);
            }
        }
        assert_eq!(counts.1.load(Ordering::SeqCst), 3);
        assert_eq!(Arc::strong_count(&counts.1), 1);
    }

    // ===== Concurrency Tests =====

    #[test]
    fn concurrent_create_and_delete() {
        let manager = Arc::new(heap_manager::<Tracked>(ColonyConfig::default()));
        let counts = Arc::new(counters());

        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let manager = Arc::clone(&manager);
                let counts = Arc::clone(&counts);
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    for round in 0..250 {
                        mine.push(tracked(&manager, thread * 1000 + round, &counts));
                        if round % 2 == 0 {
                            let victim = mine.swap_remove(0);
                            assert!(manager.delete_instance(victim));
                        }
                        // Walks race with construction on other threads
                        manager.iterate(|_, value| value.id < 4000);
                    }
                    mine
                })
            })
            .collect();

        let mut survivors = HashSet::new();
        for handle in handles {
            for obj in handle.join().expect("thread") {
                assert!(survivors.insert(obj));
            }
        }

        assert_eq!(manager.len(), survivors.len());
        assert_eq!(counts.1.load(Ordering::SeqCst), 4 * 250 - survivors.len());
    }
}
