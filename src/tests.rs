use std::{alloc::Layout, cell::Cell, cell::RefCell, ptr::NonNull};

use crate::alloc::{AllocError, BlockAlloc, Heap};
use crate::count::Count;
use crate::pointers::{Strong, Weak};
use crate::selfref::{EnableSelfRef, SelfRef};

struct DropTally(&'static Cell<i32>);

impl Drop for DropTally
{
    fn drop(&mut self) { self.0.set(self.0.get() + 1); }
}

fn tally() -> &'static Cell<i32> { Box::leak(Box::new(Cell::new(0))) }

#[test]
fn user_story()
{
    let h1 = Strong::new(42i32);
    assert_eq!(*h1, 42);
    assert_eq!(Strong::use_count(&h1), 1);

    let h2 = h1.clone();
    assert_eq!(Strong::use_count(&h1), 2);
    assert!(Strong::same_block(&h1, &h2));

    let w = Strong::downgrade(&h1);
    assert_eq!(Strong::weak_count(&h1), 1);
    assert!(!w.expired());
    assert_eq!(w.use_count(), 2);

    std::mem::drop(h1);
    assert_eq!(Strong::use_count(&h2), 1);
    assert_eq!(*h2, 42);

    std::mem::drop(h2);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
    assert_eq!(w.use_count(), 0);
}

#[test]
fn destructor_runs_exactly_once_at_last_release()
{
    let flag = tally();

    let a = Strong::new(DropTally(flag));
    let b = a.clone();
    let c = b.clone();
    assert_eq!(Strong::use_count(&a), 3);
    assert_eq!(flag.get(), 0);

    std::mem::drop(a);
    std::mem::drop(c);
    assert_eq!(flag.get(), 0);

    std::mem::drop(b);
    assert_eq!(flag.get(), 1);
}

#[test]
fn weak_observes_death_of_raw_pointee()
{
    let flag = tally();

    let s = unsafe { Strong::from_raw(Box::into_raw(Box::new(DropTally(flag)))) };
    let w = Strong::downgrade(&s);

    let resurrected = w.upgrade();
    assert!(resurrected.is_some());
    assert_eq!(Strong::use_count(&s), 2);
    std::mem::drop(resurrected);

    std::mem::drop(s);
    assert_eq!(flag.get(), 1);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
}

#[test]
fn aliasing_handle_keeps_owner_alive()
{
    struct Whole
    {
        part: u32,
        tally: DropTally,
    }

    let flag = tally();
    let whole = Strong::new(Whole {
        part: 9,
        tally: DropTally(flag),
    });
    let part = Strong::project(&whole, |w| &w.part);

    assert_eq!(Strong::use_count(&whole), 2);
    assert!(Strong::same_block(&whole, &part));

    std::mem::drop(whole);
    assert_eq!(flag.get(), 0);
    assert_eq!(*part, 9);

    std::mem::drop(part);
    assert_eq!(flag.get(), 1);
}

trait Shape
{
    fn area(&self) -> f64;
}

struct Square(f64);

impl Shape for Square
{
    fn area(&self) -> f64 { self.0 * self.0 }
}

#[test]
fn covariant_projection_shares_the_count()
{
    let square = Strong::new(Square(3.0));
    let shape: Strong<dyn Shape> = Strong::project(&square, |s| s as &dyn Shape);

    assert_eq!(Strong::use_count(&square), 2);
    assert!(Strong::same_block(&square, &shape));
    assert_eq!(shape.area(), 9.0);

    std::mem::drop(square);
    assert_eq!(Strong::use_count(&shape), 1);
    assert_eq!(shape.area(), 9.0);
}

#[test]
fn covariant_weak_projection()
{
    let square = Strong::new(Square(2.0));
    let w = Strong::downgrade(&square);
    let shape_w: Weak<dyn Shape> = unsafe { w.project_raw(|p| p as *const dyn Shape) };

    assert_eq!(Strong::weak_count(&square), 2);
    let up = shape_w.upgrade().expect("pointee still alive");
    assert_eq!(up.area(), 4.0);

    std::mem::drop(up);
    std::mem::drop(square);
    assert!(shape_w.expired());
    assert!(shape_w.upgrade().is_none());
}

struct Node
{
    tag: i32,
    me: SelfRef<Node>,
}

impl EnableSelfRef for Node
{
    fn self_ref(&self) -> &SelfRef<Node> { &self.me }
}

#[test]
fn self_reference_capability()
{
    let unadopted = Node {
        tag: 1,
        me: SelfRef::new(),
    };
    assert!(unadopted.strong_self().is_none());

    let boxed = Box::new(Node {
        tag: 7,
        me: SelfRef::new(),
    });
    let s = unsafe { Strong::adopt(Box::into_raw(boxed)) };
    assert_eq!(Strong::use_count(&s), 1);
    // The embedded slot is the one weak observer.
    assert_eq!(Strong::weak_count(&s), 1);

    let s2 = s.strong_self().expect("adopted node references itself");
    assert_eq!(Strong::use_count(&s), 2);
    assert!(Strong::same_block(&s, &s2));
    assert_eq!(s2.tag, 7);
}

/// Records what the destruction tally stood at when the block came back.
#[derive(Clone, Copy)]
struct DropOrderAlloc
{
    tally: &'static Cell<i32>,
    tally_at_free: &'static Cell<i32>,
}

impl BlockAlloc for DropOrderAlloc
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>
    {
        Heap.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout)
    {
        self.tally_at_free.set(self.tally.get());
        Heap.deallocate(ptr, layout)
    }
}

#[test]
fn self_seeded_weak_does_not_free_block_mid_destruction()
{
    struct Cyclic
    {
        // Declared first so it drops before the guard below: releasing this
        // weak handle happens while the destructor is still running.
        slot: RefCell<Weak<Cyclic>>,
        guard: DropTally,
    }

    let tally = tally();
    let tally_at_free = self::tally();
    let alloc = DropOrderAlloc {
        tally,
        tally_at_free,
    };

    let s = Strong::new_in(
        Cyclic {
            slot: RefCell::new(Weak::new()),
            guard: DropTally(tally),
        },
        alloc,
    );
    *s.slot.borrow_mut() = Strong::downgrade(&s);
    assert_eq!(Strong::weak_count(&s), 1);

    std::mem::drop(s);
    assert_eq!(tally.get(), 1);
    assert_eq!(
        tally_at_free.get(),
        1,
        "storage must be released only after the destructor fully returned"
    );
}

#[test]
fn detached_weak_is_inert()
{
    let w = Weak::<i32>::new();
    assert!(w.expired());
    assert!(w.upgrade().is_none());
    assert_eq!(w.use_count(), 0);

    let w2 = w.clone();
    assert!(w2.expired());
}

#[test]
fn custom_deleter_runs_on_release()
{
    let flag = tally();
    let raw = Box::into_raw(Box::new(5u64));

    let s = unsafe {
        Strong::from_raw_with(raw, move |p: *mut u64| {
            flag.set(flag.get() + 1);
            unsafe {
                drop(Box::from_raw(p));
            }
        })
    };
    assert_eq!(*s, 5);
    assert_eq!(flag.get(), 0);

    std::mem::drop(s);
    assert_eq!(flag.get(), 1);
}

#[derive(Clone, Copy)]
struct CountingAlloc
{
    allocs: &'static Cell<usize>,
    frees: &'static Cell<usize>,
}

impl CountingAlloc
{
    fn fresh() -> Self
    {
        CountingAlloc {
            allocs: Box::leak(Box::new(Cell::new(0))),
            frees: Box::leak(Box::new(Cell::new(0))),
        }
    }
}

impl BlockAlloc for CountingAlloc
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>
    {
        self.allocs.set(self.allocs.get() + 1);
        Heap.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout)
    {
        self.frees.set(self.frees.get() + 1);
        Heap.deallocate(ptr, layout)
    }
}

#[test]
fn caller_allocator_is_balanced()
{
    let alloc = CountingAlloc::fresh();

    let s = Strong::new_in("payload".to_string(), alloc);
    let w = Strong::downgrade(&s);
    assert_eq!(alloc.allocs.get(), 1);
    assert_eq!(alloc.frees.get(), 0);

    std::mem::drop(s);
    // The weak observer still pins the block storage.
    assert_eq!(alloc.frees.get(), 0);

    std::mem::drop(w);
    assert_eq!(alloc.allocs.get(), 1);
    assert_eq!(alloc.frees.get(), 1);
}

struct NoAlloc;

impl BlockAlloc for NoAlloc
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>
    {
        Err(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout)
    {
        unreachable!("nothing was ever allocated")
    }
}

#[test]
fn allocation_failure_drops_the_value()
{
    let flag = tally();
    let result = Strong::try_new_in(DropTally(flag), NoAlloc);
    assert!(result.is_err());
    assert_eq!(flag.get(), 1);
}

#[test]
fn allocation_failure_does_not_leak_the_pointee()
{
    let flag = tally();
    let raw = Box::into_raw(Box::new(DropTally(flag)));

    let result = unsafe {
        Strong::try_from_raw_in(
            raw,
            move |p: *mut DropTally| unsafe {
                drop(Box::from_raw(p));
            },
            NoAlloc,
        )
    };
    assert!(result.is_err());
    assert_eq!(flag.get(), 1);
}

#[test]
fn reset_rebinds_ownership()
{
    let first = tally();
    let second = tally();

    let mut s = unsafe { Strong::from_raw(Box::into_raw(Box::new(DropTally(first)))) };
    let w = Strong::downgrade(&s);

    unsafe {
        Strong::reset(&mut s, Box::into_raw(Box::new(DropTally(second))));
    }
    assert_eq!(first.get(), 1);
    assert_eq!(second.get(), 0);
    assert!(w.expired());
    assert_eq!(Strong::use_count(&s), 1);

    std::mem::drop(s);
    assert_eq!(second.get(), 1);
}

#[cfg(feature = "ledger")]
#[test]
fn ledger_tracks_block_lifecycle()
{
    use crate::ledger::thread_stats;

    let before = thread_stats();

    let s = unsafe { Strong::from_raw(Box::into_raw(Box::new(5u32))) };
    let w = Strong::downgrade(&s);
    let mid = thread_stats();
    assert_eq!(mid.blocks_created - before.blocks_created, 1);
    assert_eq!(mid.objects_destroyed, before.objects_destroyed);

    std::mem::drop(s);
    let object_dead = thread_stats();
    assert_eq!(object_dead.objects_destroyed - before.objects_destroyed, 1);
    // Storage lives on until the last weak observer goes.
    assert_eq!(object_dead.blocks_freed, mid.blocks_freed);

    std::mem::drop(w);
    let reclaimed = thread_stats();
    assert_eq!(reclaimed.blocks_freed - before.blocks_freed, 1);
    assert_eq!(reclaimed.live_blocks(), before.live_blocks());
}

#[test]
fn upgrade_step_refuses_zero()
{
    let spent = Count::new(0);
    assert!(!spent.try_increment_nonzero());
    assert_eq!(spent.get(), 0);

    let live = Count::new(2);
    assert!(live.try_increment_nonzero());
    assert_eq!(live.get(), 3);
}

#[cfg(feature = "atomic")]
#[test]
fn upgrade_step_survives_contention()
{
    let count: &'static Count = Box::leak(Box::new(Count::new(1)));
    let threads = 8;
    let rounds = 1000;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            std::thread::spawn(move || {
                for _ in 0..rounds {
                    assert!(count.try_increment_nonzero());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count.get(), 1 + threads * rounds);

    let spent: &'static Count = Box::leak(Box::new(Count::new(0)));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            std::thread::spawn(move || {
                for _ in 0..rounds {
                    assert!(!spent.try_increment_nonzero());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(spent.get(), 0);
}

#[cfg(feature = "ledger")]
#[test]
fn self_reference_slot_block_reclaimed_with_object()
{
    use crate::ledger::thread_stats;

    let before = thread_stats();

    let boxed = Box::new(Node {
        tag: 3,
        me: SelfRef::new(),
    });
    let s = unsafe { Strong::adopt(Box::into_raw(boxed)) };
    std::mem::drop(s);

    let after = thread_stats();
    assert_eq!(after.blocks_created - before.blocks_created, 1);
    assert_eq!(after.objects_destroyed - before.objects_destroyed, 1);
    assert_eq!(after.blocks_freed - before.blocks_freed, 1);
}
