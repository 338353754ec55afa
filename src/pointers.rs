use std::{
    fmt,
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
};

use crate::alloc::{AllocError, BlockAlloc, BoxDelete, Deleter, Heap};
use crate::block::{BlockRef, InlineBlock, RegularBlock};

/// Owning reference-counted handle.
///
/// Every `Strong` holds two pointers: the erased control block that governs
/// a pointee's lifetime, and the typed view returned by dereferencing. For
/// a plainly constructed handle the view is the block's own object; an
/// aliasing or covariant handle made through [`Strong::project`] views
/// something else while still keeping the whole owned object alive.
///
/// Inspection and conversion are associated functions (`Strong::use_count(&h)`
/// rather than `h.use_count()`) so the handle surface can never shadow a
/// method of the pointee.
///
/// Handles are not `Send` or `Sync`: the counters are plain cells in the
/// default build, and the erased deleter and allocator carry no thread
/// bound even with the `atomic` feature enabled.
pub struct Strong<T: ?Sized + 'static>
{
    target: NonNull<T>,
    block: BlockRef,
    _owns: PhantomData<T>,
}

impl<T: 'static> Strong<T>
{
    /// Moves `value` into a combined allocation: one block holds both the
    /// counters and the object. Preferred over [`Strong::from_raw`] when no
    /// custom deleter is needed, since it halves the allocation count.
    ///
    /// Aborts via `handle_alloc_error` if the heap is exhausted.
    pub fn new(value: T) -> Self
    {
        Self::try_new(value).unwrap_or_else(|err| err.handle())
    }

    /// Fallible form of [`Strong::new`].
    pub fn try_new(value: T) -> Result<Self, AllocError> { Self::try_new_in(value, Heap) }

    /// Combined allocation in a caller-supplied allocator.
    pub fn new_in<A: BlockAlloc + 'static>(value: T, alloc: A) -> Self
    {
        Self::try_new_in(value, alloc).unwrap_or_else(|err| err.handle())
    }

    /// Fallible form of [`Strong::new_in`]. On failure `value` is dropped,
    /// not leaked.
    pub fn try_new_in<A: BlockAlloc + 'static>(value: T, alloc: A) -> Result<Self, AllocError>
    {
        let block = InlineBlock::create(value, alloc)?;
        Ok(Strong {
            target: block.object_ptr().cast(),
            block,
            _owns: PhantomData,
        })
    }
}

impl<T: ?Sized + 'static> Strong<T>
{
    /// Takes ownership of `ptr`, to be freed with the default box deleter.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, come from `Box::into_raw`, and must not be
    /// owned by any other control block. Double management is not detected.
    pub unsafe fn from_raw(ptr: *mut T) -> Self { Self::from_raw_in(ptr, BoxDelete, Heap) }

    /// Takes ownership of `ptr` with a custom deleter.
    ///
    /// # Safety
    ///
    /// As [`Strong::from_raw`], except the pointee may come from anywhere
    /// the deleter knows how to release.
    pub unsafe fn from_raw_with<D: Deleter<T> + 'static>(ptr: *mut T, deleter: D) -> Self
    {
        Self::from_raw_in(ptr, deleter, Heap)
    }

    /// Takes ownership of `ptr` with a custom deleter, allocating the
    /// control block from `alloc`.
    ///
    /// # Safety
    ///
    /// As [`Strong::from_raw_with`].
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where
        D: Deleter<T> + 'static,
        A: BlockAlloc + 'static,
    {
        Self::try_from_raw_in(ptr, deleter, alloc).unwrap_or_else(|err| err.handle())
    }

    /// Fallible form of [`Strong::from_raw_in`]. On allocation failure the
    /// deleter is run on `ptr` before the error is returned, so the pointee
    /// is not leaked.
    ///
    /// # Safety
    ///
    /// As [`Strong::from_raw_with`].
    pub unsafe fn try_from_raw_in<D, A>(
        ptr: *mut T,
        deleter: D,
        alloc: A,
    ) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'static,
        A: BlockAlloc + 'static,
    {
        let block = RegularBlock::create(ptr, deleter, alloc)?;
        Ok(Strong {
            target: NonNull::new_unchecked(ptr),
            block,
            _owns: PhantomData,
        })
    }

    /// Aliasing construction: a new handle sharing `this`'s control block
    /// whose view is substituted through `f`. The usual uses are handing
    /// out a handle to a field while the whole object stays alive, and the
    /// upward conversion to a trait object (`|t| t as &dyn Trait`).
    ///
    /// The closure is higher-ranked, so the view it returns must be derived
    /// from the pointee itself; a reference captured from some other
    /// allocation does not borrow-check:
    ///
    /// ```compile_fail
    /// use dualref::Strong;
    ///
    /// let a = Strong::new(1u8);
    /// let b = Strong::new(5u32);
    /// let smuggled = Strong::project(&a, |_| &*b);
    /// ```
    pub fn project<U: ?Sized + 'static>(
        this: &Self,
        f: impl for<'x> FnOnce(&'x T) -> &'x U,
    ) -> Strong<U>
    {
        let view = f(unsafe { this.target.as_ref() });
        this.block.acquire_strong();
        Strong {
            target: NonNull::from(view),
            block: this.block,
            _owns: PhantomData,
        }
    }

    /// Produces a non-owning observer of the same control block.
    pub fn downgrade(this: &Self) -> Weak<T>
    {
        this.block.acquire_weak();
        Weak {
            target: this.target,
            block: Some(this.block),
        }
    }

    /// Number of strong handles sharing `this`'s control block.
    pub fn use_count(this: &Self) -> usize { this.block.strong_count() }

    /// Number of weak observers of `this`'s control block.
    pub fn weak_count(this: &Self) -> usize { this.block.weak_count() }

    /// Address of the viewed object. Stays valid while any strong handle
    /// on the block lives; the counters are unaffected.
    pub fn as_ptr(this: &Self) -> *const T { this.target.as_ptr() }

    /// Whether two handles share one control block, regardless of what
    /// each of them views.
    pub fn same_block<U: ?Sized + 'static>(this: &Self, other: &Strong<U>) -> bool
    {
        this.block.same_block(&other.block)
    }

    /// Releases the current ownership and begins owning `ptr` under a
    /// fresh regular control block with the default deleter.
    ///
    /// Releasing without a replacement is plain `drop`.
    ///
    /// # Safety
    ///
    /// As [`Strong::from_raw`].
    pub unsafe fn reset(this: &mut Self, ptr: *mut T) { *this = Strong::from_raw(ptr); }
}

impl<T: ?Sized + 'static> Clone for Strong<T>
{
    fn clone(&self) -> Self
    {
        self.block.acquire_strong();
        Strong {
            target: self.target,
            block: self.block,
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized + 'static> Deref for Strong<T>
{
    type Target = T;

    fn deref(&self) -> &T { unsafe { self.target.as_ref() } }
}

impl<T: ?Sized + 'static> Drop for Strong<T>
{
    fn drop(&mut self)
    {
        unsafe {
            self.block.release_strong();
        }
    }
}

impl<T: ?Sized + fmt::Debug + 'static> fmt::Debug for Strong<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { (**self).fmt(f) }
}

impl<T: ?Sized + fmt::Display + 'static> fmt::Display for Strong<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { (**self).fmt(f) }
}

/// Non-owning observer of a control block.
///
/// Shares the weak counter; never keeps the pointee alive. A `Weak` can
/// also be detached (made by [`Weak::new`] or left behind in a
/// [`SelfRef`](crate::SelfRef) slot before adoption), in which case it
/// upgrades to nothing and reports itself expired.
pub struct Weak<T: ?Sized + 'static>
{
    // Dangling whenever `block` is `None`; only read back through `upgrade`.
    target: NonNull<T>,
    block: Option<BlockRef>,
}

impl<T: 'static> Weak<T>
{
    /// A detached observer: expired from birth, upgrades to `None`.
    pub fn new() -> Self
    {
        Weak {
            target: NonNull::dangling(),
            block: None,
        }
    }
}

impl<T: ?Sized + 'static> Weak<T>
{
    /// Attempts to produce an owning handle.
    ///
    /// The check and the increment are one step as far as callers can
    /// observe; under the `atomic` feature they are a single
    /// compare-and-increment loop.
    pub fn upgrade(&self) -> Option<Strong<T>>
    {
        let block = self.block?;
        if block.try_acquire_strong() {
            Some(Strong {
                target: self.target,
                block,
                _owns: PhantomData,
            })
        } else {
            None
        }
    }

    /// True iff the pointee is gone or this observer was never attached.
    pub fn expired(&self) -> bool
    {
        match self.block {
            Some(block) => block.strong_count() == 0,
            None => true,
        }
    }

    /// Number of strong handles still owning the pointee; 0 when expired.
    pub fn use_count(&self) -> usize
    {
        self.block.map_or(0, |block| block.strong_count())
    }

    /// Covariant conversion of the static type without touching the
    /// counters' meaning: the new observer shares the same block.
    ///
    /// # Safety
    ///
    /// `f` receives a raw pointer that may already dangle and must not
    /// dereference it; the address it returns must stay within the owned
    /// allocation (typically a raw unsizing cast, `|p| p as *const U`).
    pub unsafe fn project_raw<U: ?Sized + 'static>(
        &self,
        f: impl FnOnce(*const T) -> *const U,
    ) -> Weak<U>
    {
        if let Some(block) = self.block {
            block.acquire_weak();
        }
        Weak {
            target: NonNull::new_unchecked(f(self.target.as_ptr()) as *mut U),
            block: self.block,
        }
    }
}

impl<T: 'static> Default for Weak<T>
{
    fn default() -> Self { Weak::new() }
}

impl<T: ?Sized + 'static> Clone for Weak<T>
{
    fn clone(&self) -> Self
    {
        if let Some(block) = self.block {
            block.acquire_weak();
        }
        Weak {
            target: self.target,
            block: self.block,
        }
    }
}

impl<T: ?Sized + 'static> Drop for Weak<T>
{
    fn drop(&mut self)
    {
        if let Some(block) = self.block {
            unsafe {
                block.release_weak();
            }
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Weak<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "(Weak)") }
}
