//! Strong/weak dual-counted shared ownership handles.
//!
//! A [`Strong`] handle owns its pointee through a type-erased control block
//! carrying two counters: the strong count decides when the object is
//! destroyed, the weak count decides when the block's own storage goes. The
//! two events are deliberately distinct, so a [`Weak`] observer can outlive
//! the object and still answer `expired()` truthfully before the block is
//! reclaimed.
//!
//! Construction either embeds the object inside the block ([`Strong::new`],
//! one allocation) or wraps a raw pointer with a deleter and allocator of
//! the caller's choosing ([`Strong::from_raw`] and friends). Aliasing and
//! covariant handles come from [`Strong::project`]. A type that wants to
//! hand out handles to itself embeds a [`SelfRef`] slot and implements
//! [`EnableSelfRef`].
//!
//! Handles are thread-confined. The `atomic` feature upgrades the counters
//! themselves for callers who arrange cross-thread use by other means; the
//! default `ledger` feature keeps per-thread and process-wide allocation
//! tallies for leak diagnosis.

pub(crate) mod block;
pub(crate) mod count;

pub mod alloc;
#[cfg(feature = "ledger")]
pub mod ledger;
pub mod pointers;
pub mod selfref;

#[cfg(test)]
mod tests;

pub use alloc::{AllocError, BlockAlloc, BoxDelete, Deleter, Heap};
pub use pointers::{Strong, Weak};
pub use selfref::{EnableSelfRef, SelfRef};
