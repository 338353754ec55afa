use std::{
    alloc::Layout,
    fmt,
    mem::ManuallyDrop,
    ptr::NonNull,
};

use crate::alloc::{AllocError, BlockAlloc, Deleter};
use crate::count::Count;

/// Type-erased control block capability.
///
/// A block carries the two counters plus the two one-shot transitions of the
/// ownership lifecycle. There are exactly two shapes: [`RegularBlock`] for a
/// separately allocated pointee and [`InlineBlock`] for the combined
/// allocation. Handles only ever see `dyn Block` through a [`BlockRef`].
pub(crate) trait Block
{
    fn strong(&self) -> &Count;

    fn weak(&self) -> &Count;

    /// Runs the pointee's destructor. Called exactly once, when the strong
    /// count reaches zero.
    ///
    /// # Safety
    ///
    /// Caller must be the sole path observing the 1 -> 0 strong transition.
    unsafe fn destroy_object(&mut self);

    /// Releases the block's own storage, and the pointee's for the combined
    /// form. `self` is dangling once this returns.
    ///
    /// # Safety
    ///
    /// The weak count must have reached zero, which implies the strong
    /// count is zero and `destroy_object` has already returned: the strong
    /// handles jointly hold one weak reference that is released only after
    /// destruction.
    unsafe fn deallocate_self(&mut self);

    /// Untyped address of the managed object.
    fn object_ptr(&self) -> NonNull<u8>;
}

/// Control block for a pointee that was allocated separately.
///
/// Deleter and allocator are consumed by the transitions that need them, so
/// they sit in `ManuallyDrop` and are taken out exactly once.
pub(crate) struct RegularBlock<T: ?Sized + 'static, D: Deleter<T>, A: BlockAlloc>
{
    strong: Count,
    weak: Count,
    ptr: *mut T,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T, D, A> RegularBlock<T, D, A>
where
    T: ?Sized + 'static,
    D: Deleter<T> + 'static,
    A: BlockAlloc + 'static,
{
    /// Allocates a fresh block over `ptr` with one strong owner. The weak
    /// counter starts at one: the collective reference of the strong group.
    ///
    /// On allocation failure the deleter is run on `ptr` before the error
    /// propagates, so the pointee is never leaked.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, valid, and not owned by any other block.
    pub(crate) unsafe fn create(
        ptr: *mut T,
        mut deleter: D,
        alloc: A,
    ) -> Result<BlockRef, AllocError>
    {
        let layout = Layout::new::<Self>();
        let mem = match alloc.allocate(layout) {
            Ok(mem) => mem,
            Err(err) => {
                deleter.delete(ptr);
                return Err(err);
            }
        };
        let block: NonNull<Self> = mem.cast();
        block.as_ptr().write(RegularBlock {
            strong: Count::new(1),
            weak: Count::new(1),
            ptr,
            deleter: ManuallyDrop::new(deleter),
            alloc: ManuallyDrop::new(alloc),
        });
        #[cfg(feature = "ledger")]
        crate::ledger::block_created();
        let erased: NonNull<dyn Block> = block;
        Ok(BlockRef(erased))
    }
}

impl<T, D, A> Block for RegularBlock<T, D, A>
where
    T: ?Sized + 'static,
    D: Deleter<T> + 'static,
    A: BlockAlloc + 'static,
{
    fn strong(&self) -> &Count { &self.strong }

    fn weak(&self) -> &Count { &self.weak }

    unsafe fn destroy_object(&mut self)
    {
        let mut deleter = ManuallyDrop::take(&mut self.deleter);
        deleter.delete(self.ptr);
    }

    unsafe fn deallocate_self(&mut self)
    {
        let alloc = ManuallyDrop::take(&mut self.alloc);
        let storage = NonNull::from(self).cast::<u8>();
        alloc.deallocate(storage, Layout::new::<Self>());
    }

    fn object_ptr(&self) -> NonNull<u8>
    {
        // Non-null per the `create` contract.
        unsafe { NonNull::new_unchecked(self.ptr as *mut u8) }
    }
}

/// Control block with the pointee embedded inline: one allocation holds both
/// the counters and the object.
pub(crate) struct InlineBlock<T: 'static, A: BlockAlloc>
{
    strong: Count,
    weak: Count,
    value: ManuallyDrop<T>,
    alloc: ManuallyDrop<A>,
}

impl<T: 'static, A: BlockAlloc + 'static> InlineBlock<T, A>
{
    /// Allocates a combined block around `value` with one strong owner and
    /// the strong group's collective weak reference.
    ///
    /// On allocation failure nothing was constructed in place and `value`
    /// is dropped here, unwinding whatever the caller had built.
    pub(crate) fn create(value: T, alloc: A) -> Result<BlockRef, AllocError>
    {
        let layout = Layout::new::<Self>();
        let mem = alloc.allocate(layout)?;
        let block: NonNull<Self> = mem.cast();
        unsafe {
            block.as_ptr().write(InlineBlock {
                strong: Count::new(1),
                weak: Count::new(1),
                value: ManuallyDrop::new(value),
                alloc: ManuallyDrop::new(alloc),
            });
        }
        #[cfg(feature = "ledger")]
        crate::ledger::block_created();
        let erased: NonNull<dyn Block> = block;
        Ok(BlockRef(erased))
    }
}

impl<T: 'static, A: BlockAlloc + 'static> Block for InlineBlock<T, A>
{
    fn strong(&self) -> &Count { &self.strong }

    fn weak(&self) -> &Count { &self.weak }

    unsafe fn destroy_object(&mut self) { ManuallyDrop::drop(&mut self.value); }

    unsafe fn deallocate_self(&mut self)
    {
        let alloc = ManuallyDrop::take(&mut self.alloc);
        let storage = NonNull::from(self).cast::<u8>();
        alloc.deallocate(storage, Layout::new::<Self>());
    }

    fn object_ptr(&self) -> NonNull<u8> { NonNull::from(&self.value).cast() }
}

/// Copyable erased reference to a control block.
///
/// All counter traffic and both lifecycle transitions go through here, so
/// the ordering rules live in one place rather than in every handle.
#[derive(Clone, Copy)]
pub(crate) struct BlockRef(NonNull<dyn Block>);

impl BlockRef
{
    fn block(&self) -> &dyn Block { unsafe { self.0.as_ref() } }

    pub(crate) fn strong_count(&self) -> usize { self.block().strong().get() }

    /// Number of weak observers. The strong group's collective weak
    /// reference is bookkeeping, not an observer, so it is not reported.
    pub(crate) fn weak_count(&self) -> usize
    {
        let raw = self.block().weak().get();
        if self.block().strong().get() > 0 {
            raw - 1
        } else {
            raw
        }
    }

    pub(crate) fn object_ptr(&self) -> NonNull<u8> { self.block().object_ptr() }

    /// Whether two references name the same control block.
    pub(crate) fn same_block(&self, other: &BlockRef) -> bool
    {
        self.0.cast::<u8>() == other.0.cast::<u8>()
    }

    pub(crate) fn acquire_strong(&self) { self.block().strong().increment() }

    pub(crate) fn acquire_weak(&self) { self.block().weak().increment() }

    /// The upgrade step: increments the strong count unless it is zero.
    pub(crate) fn try_acquire_strong(&self) -> bool
    {
        self.block().strong().try_increment_nonzero()
    }

    /// Drops one strong reference. Destroys the pointee on the last one,
    /// then releases the strong group's collective weak reference.
    ///
    /// Deallocation can only ride on that final weak release, which happens
    /// strictly after `destroy_object` has returned. A destructor that drops
    /// weak handles onto its own block (the self-reference slot) therefore
    /// never frees the storage out from under itself: those releases leave
    /// the collective reference still standing.
    ///
    /// # Safety
    ///
    /// `self` must stand for a live strong reference, relinquished here.
    pub(crate) unsafe fn release_strong(self)
    {
        let block = self.0.as_ptr();
        if (*block).strong().decrement() == 0 {
            (*block).destroy_object();
            #[cfg(feature = "ledger")]
            crate::ledger::object_destroyed();
            self.release_weak();
        }
    }

    /// Drops one weak reference; the last one out frees the block.
    ///
    /// The collective reference held by the strong group guarantees the
    /// count cannot reach zero before the pointee is destroyed.
    ///
    /// # Safety
    ///
    /// `self` must stand for a live weak reference, relinquished here.
    pub(crate) unsafe fn release_weak(self)
    {
        let block = self.0.as_ptr();
        if (*block).weak().decrement() == 0 {
            (*block).deallocate_self();
            #[cfg(feature = "ledger")]
            crate::ledger::block_freed();
        }
    }
}

impl fmt::Debug for BlockRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BlockRef")
            .field("addr", &self.0.cast::<u8>())
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}
