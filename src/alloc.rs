use std::{
    alloc::{self, Layout},
    error::Error,
    fmt,
    ptr::NonNull,
};

/// Failure to obtain control-block storage from a [`BlockAlloc`].
///
/// Carries the layout that could not be satisfied. Returned by the `try_*`
/// construction entry points; the infallible entry points funnel it into
/// [`std::alloc::handle_alloc_error`] instead.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AllocError
{
    layout: Layout,
}

impl AllocError
{
    pub(crate) fn new(layout: Layout) -> Self { AllocError { layout } }

    /// The layout the allocator failed to provide.
    pub fn layout(&self) -> Layout { self.layout }

    pub(crate) fn handle(self) -> ! { alloc::handle_alloc_error(self.layout) }
}

impl fmt::Debug for AllocError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("AllocError")
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

impl fmt::Display for AllocError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "control block allocation of {} bytes (align {}) failed",
            self.layout.size(),
            self.layout.align()
        )
    }
}

impl Error for AllocError {}

/// Allocation capability for control-block storage.
///
/// Mirrors the raw global-allocator entry points: implementors hand out
/// uninitialized memory fitting `layout` and take the same pointer back.
/// The allocator value is moved into the block it allocates and is the one
/// that frees it, so a handle never needs the allocator spelled out again.
pub trait BlockAlloc
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator with
    /// this `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-global heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Heap;

impl BlockAlloc for Heap
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>
    {
        // Control blocks hold at least the two counters, never zero-sized.
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout)
    {
        alloc::dealloc(ptr.as_ptr(), layout)
    }
}

/// Destruction capability for a separately allocated pointee.
///
/// Any `FnMut(*mut T)` closure qualifies; [`BoxDelete`] is the default used
/// by [`Strong::from_raw`](crate::Strong::from_raw).
pub trait Deleter<T: ?Sized>
{
    /// # Safety
    ///
    /// Called at most once, with the pointer the owning handle took over.
    unsafe fn delete(&mut self, ptr: *mut T);
}

impl<T: ?Sized, F: FnMut(*mut T)> Deleter<T> for F
{
    unsafe fn delete(&mut self, ptr: *mut T) { self(ptr) }
}

/// Default deleter: assumes the pointee came from `Box::into_raw`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoxDelete;

impl<T: ?Sized> Deleter<T> for BoxDelete
{
    unsafe fn delete(&mut self, ptr: *mut T) { drop(Box::from_raw(ptr)); }
}
