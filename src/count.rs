#[cfg(not(feature = "atomic"))]
use std::cell::Cell;
#[cfg(feature = "atomic")]
use std::sync::atomic::{AtomicUsize, Ordering};

/// Interior-mutable reference counter.
///
/// The baseline is a plain `Cell`, which is only sound while every handle
/// onto one control block stays on a single thread. The `atomic` feature
/// swaps in `AtomicUsize`, and turns `try_increment_nonzero` into a
/// compare-and-increment loop so an upgrade can never resurrect an object
/// between the zero check and the increment.
#[cfg(not(feature = "atomic"))]
#[repr(transparent)]
pub(crate) struct Count(Cell<usize>);

#[cfg(not(feature = "atomic"))]
impl Count
{
    pub(crate) fn new(n: usize) -> Self { Count(Cell::new(n)) }

    pub(crate) fn get(&self) -> usize { self.0.get() }

    pub(crate) fn increment(&self) { self.0.set(self.0.get() + 1); }

    /// Decrements and returns the new value. Must never be called at zero.
    pub(crate) fn decrement(&self) -> usize
    {
        let n = self.0.get() - 1;
        self.0.set(n);
        n
    }

    /// Increments unless the counter is zero. Returns whether it did.
    pub(crate) fn try_increment_nonzero(&self) -> bool
    {
        if self.0.get() == 0 {
            false
        } else {
            self.increment();
            true
        }
    }
}

#[cfg(feature = "atomic")]
#[repr(transparent)]
pub(crate) struct Count(AtomicUsize);

#[cfg(feature = "atomic")]
impl Count
{
    pub(crate) fn new(n: usize) -> Self { Count(AtomicUsize::new(n)) }

    pub(crate) fn get(&self) -> usize { self.0.load(Ordering::Acquire) }

    pub(crate) fn increment(&self) { self.0.fetch_add(1, Ordering::Relaxed); }

    /// Decrements and returns the new value. Must never be called at zero.
    ///
    /// `AcqRel` so the thread that observes zero also observes every write
    /// made to the pointee before the other handles released it.
    pub(crate) fn decrement(&self) -> usize { self.0.fetch_sub(1, Ordering::AcqRel) - 1 }

    /// Increments unless the counter is zero. Returns whether it did.
    pub(crate) fn try_increment_nonzero(&self) -> bool
    {
        let mut n = self.0.load(Ordering::Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            match self
                .0
                .compare_exchange_weak(n, n + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => n = actual,
            }
        }
    }
}
