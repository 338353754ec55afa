use std::{cell::RefCell, fmt};

use crate::pointers::{Strong, Weak};

/// Embedded self-reference slot.
///
/// A managed type opts into producing strong handles to itself by owning
/// one of these and exposing it through [`EnableSelfRef`]. The slot starts
/// detached and is seeded by [`Strong::adopt`]; it is deliberately *not*
/// seeded by the other constructors, so a freshly built value answers
/// `None` until a handle has adopted it.
pub struct SelfRef<T: 'static>
{
    slot: RefCell<Weak<T>>,
}

impl<T: 'static> SelfRef<T>
{
    pub fn new() -> Self
    {
        SelfRef {
            slot: RefCell::new(Weak::new()),
        }
    }

    fn seed(&self, weak: Weak<T>) { *self.slot.borrow_mut() = weak; }

    fn upgrade(&self) -> Option<Strong<T>> { self.slot.borrow().upgrade() }
}

impl<T: 'static> Default for SelfRef<T>
{
    fn default() -> Self { SelfRef::new() }
}

impl<T: 'static> fmt::Debug for SelfRef<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SelfRef")
            .field("bound", &!self.slot.borrow().expired())
            .finish()
    }
}

/// Capability to obtain, from inside the pointee's own methods, a strong
/// handle participating in the same control block as the handle that
/// adopted it.
///
/// ```
/// use dualref::{EnableSelfRef, SelfRef, Strong};
///
/// struct Node
/// {
///     label: &'static str,
///     me: SelfRef<Node>,
/// }
///
/// impl EnableSelfRef for Node
/// {
///     fn self_ref(&self) -> &SelfRef<Node> { &self.me }
/// }
///
/// let node = Box::new(Node { label: "root", me: SelfRef::new() });
/// let handle = unsafe { Strong::adopt(Box::into_raw(node)) };
/// let again = handle.strong_self().unwrap();
/// assert_eq!(Strong::use_count(&handle), 2);
/// assert!(Strong::same_block(&handle, &again));
/// ```
pub trait EnableSelfRef: Sized + 'static
{
    /// Accessor for the embedded slot.
    fn self_ref(&self) -> &SelfRef<Self>;

    /// Another strong handle to `self`, sharing the adopting handle's
    /// control block. `None` before adoption, or once the last strong
    /// handle is gone and `self` is mid-destruction.
    fn strong_self(&self) -> Option<Strong<Self>> { self.self_ref().upgrade() }
}

impl<T: EnableSelfRef> Strong<T>
{
    /// Takes ownership of `ptr` like [`Strong::from_raw`] and seeds the
    /// pointee's embedded self-reference with the new control block.
    ///
    /// This is the capability check of the design: the bound on
    /// [`EnableSelfRef`] is what decides, at compile time, that seeding
    /// happens. `from_raw` on a capability type compiles but leaves the
    /// slot detached.
    ///
    /// # Safety
    ///
    /// As [`Strong::from_raw`].
    pub unsafe fn adopt(ptr: *mut T) -> Self
    {
        let strong = Strong::from_raw(ptr);
        strong.self_ref().seed(Strong::downgrade(&strong));
        strong
    }
}
