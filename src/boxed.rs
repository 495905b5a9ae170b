// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The owning handle: unique ownership with the deleter erased.

use core::fmt;
use core::marker::{PhantomData, Unsize};
use core::mem::ManuallyDrop;
use core::ops::{CoerceUnsized, Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::deleter::ErasedDeleter;
use crate::{AllocOrInitError, InPlaceInit, Init};

#[cfg(feature = "alloc")]
use alloc::alloc::AllocError;
#[cfg(all(feature = "std", not(feature = "alloc")))]
use std::alloc::AllocError;

#[cfg(all(feature = "alloc", not(feature = "std")))]
use alloc::boxed::Box;

/// Exclusive-ownership pointer to a `T` whose deleter was chosen at
/// construction time and erased from the type.
///
/// Like [`Box<T>`], an `ErasedBox<T>` owns exactly one object and destroys
/// it when dropped. Unlike `Box<T>`, the destruction action is an arbitrary
/// `FnOnce(*mut U)` fixed when the handle is created; two handles built with
/// completely different deleters still share the type `ErasedBox<T>`.
///
/// The pointer captured for destruction is the one given at construction and
/// never changes. The pointer *exposed* by the handle (through [`Deref`],
/// [`ErasedBox::as_ptr`] and friends) starts out the same but may diverge:
/// unsizing coercions attach metadata to it, and [`ErasedBox::map`] moves it
/// to a sub-object. Destruction always goes through the captured pointer, so
/// a coerced or projected handle still destroys the whole original object.
///
/// Handles are move-only. A moved-from handle is statically gone, so there
/// is no empty state to observe; use `Option<ErasedBox<T>>` where a nullable
/// slot is needed (the niche makes that the same size as the handle itself).
///
/// `ErasedBox` is neither [`Send`] nor [`Sync`]: after erasure nothing is
/// known about the deleter's thread affinity.
///
/// # Examples
///
/// ```rust
/// use erased_ptr::ErasedBox;
///
/// let mut handle = ErasedBox::try_new(vec![1_i32, 2, 3]).unwrap();
/// handle.push(4);
/// assert_eq!(handle.len(), 4);
/// ```
///
/// # Invariants
///
/// `view` is valid for reads and writes of a `T` for the whole lifetime of
/// the handle, and invoking `deleter` destroys the owned object and releases
/// everything the handle is responsible for. [`Drop`] invokes it exactly
/// once.
pub struct ErasedBox<T: ?Sized> {
    view: NonNull<T>,
    deleter: ErasedDeleter,
    _owns: PhantomData<T>,
}

// `ErasedBox<Concrete>` coerces to `ErasedBox<dyn Trait>` (and arrays to
// slices) like `Box` does. Only the view gains metadata; the captured
// destruction pointer stays what it was at construction.
impl<T: ?Sized + Unsize<U>, U: ?Sized> CoerceUnsized<ErasedBox<U>> for ErasedBox<T> {}

impl<T: ?Sized> ErasedBox<T> {
    /// Takes ownership of `ptr`, destroying it with `deleter` on drop.
    ///
    /// The pointer captured for destruction is `ptr` exactly as passed here;
    /// later coercions and [`ErasedBox::map`] projections change only the
    /// exposed view. Zero-sized deleters (plain `fn` items, capture-less
    /// closures) are stored inline; a deleter with captured state, or a fat
    /// `ptr`, allocates one destruction record.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when a destruction record is needed but cannot
    /// be allocated. Ownership of `ptr` is *not* taken in that case; the
    /// deleter is dropped without running.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live object that stays valid for reads and
    /// writes until the handle is dropped, nothing else may access or free
    /// it while the handle exists, and calling `deleter(ptr)` exactly once
    /// must be sound.
    pub unsafe fn from_raw_with<F>(ptr: *mut T, deleter: F) -> Result<Self, AllocError>
    where
        F: FnOnce(*mut T),
    {
        debug_assert!(!ptr.is_null());
        Ok(Self {
            // SAFETY: non-null per the function contract.
            view: unsafe { NonNull::new_unchecked(ptr) },
            deleter: ErasedDeleter::try_new(ptr, deleter)?,
            _owns: PhantomData,
        })
    }

    /// Takes ownership of `ptr`, destroying it the way [`Box`] would.
    ///
    /// Thin pointers pack inline and never allocate; fat pointers (slices,
    /// trait objects) need a destruction record to remember their metadata.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when a destruction record is needed but cannot
    /// be allocated; ownership of `ptr` is not taken in that case.
    ///
    /// # Safety
    ///
    /// `ptr` must have come out of [`Box::into_raw`] (global allocator), and
    /// the handle becomes its only owner.
    pub unsafe fn from_raw(ptr: *mut T) -> Result<Self, AllocError> {
        // SAFETY: forwarded to the caller.
        unsafe {
            Self::from_raw_with(ptr, |ptr| {
                // SAFETY: `ptr` came out of `Box::into_raw` per the contract
                // of `from_raw`, and the dispatch runs at most once.
                drop(unsafe { Box::from_raw(ptr) });
            })
        }
    }

    /// Converts a [`Box`], keeping its pointee and its way of dying.
    ///
    /// Works for unsized pointees (`Box<dyn Trait>`, `Box<[T]>`); those carry
    /// a fat pointer and therefore allocate a destruction record. For sized
    /// pointees, prefer the infallible, allocation-free `From<Box<T>>` impl.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when the destruction record cannot be
    /// allocated. The box is dropped in that case, destroying the pointee as
    /// usual; nothing leaks and nothing is half-built.
    pub fn try_from_boxed(boxed: Box<T>) -> Result<Self, AllocError> {
        let ptr = Box::into_raw(boxed);
        // SAFETY: `ptr` came out of `Box::into_raw` just above and is
        // uniquely owned here.
        match unsafe { Self::from_raw(ptr) } {
            Ok(handle) => Ok(handle),
            Err(err) => {
                // SAFETY: ownership was not taken over on the error path, so
                // the box can be rebuilt and disposed of normally.
                drop(unsafe { Box::from_raw(ptr) });
                Err(err)
            }
        }
    }

    /// The view pointer: the address this handle exposes.
    ///
    /// The pointer is valid as long as the handle is alive. After an
    /// unsizing coercion or a [`ErasedBox::map`] projection it may differ
    /// from the pointer that destruction will act on.
    pub fn as_ptr(&self) -> *mut T {
        self.view.as_ptr()
    }

    /// Transfers ownership into a new handle that exposes `view` instead.
    ///
    /// The returned handle destroys the object `this` owned; nothing is ever
    /// destroyed at `view` itself. `this` is consumed without running its
    /// deleter. This is the raw mechanism beneath [`ErasedBox::map`], which
    /// is the safe way to get a projected handle.
    ///
    /// # Safety
    ///
    /// `view` must be valid for reads and writes until the returned handle
    /// is dropped. In practice it points at the owned object or into it.
    pub unsafe fn alias<U: ?Sized>(this: Self, view: NonNull<U>) -> ErasedBox<U> {
        let this = ManuallyDrop::new(this);
        ErasedBox {
            view,
            // SAFETY: `this` is never dropped, so the dispatch moves into
            // the new handle without being duplicated or invoked here.
            deleter: unsafe { ptr::read(&this.deleter) },
            _owns: PhantomData,
        }
    }

    /// Projects the handle onto a sub-object, keeping ownership of the
    /// whole.
    ///
    /// The closure receives the owned object and picks a location inside it,
    /// typically a field. The returned handle exposes that location while
    /// still destroying the original object, all of it, when dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use erased_ptr::ErasedBox;
    ///
    /// struct Response {
    ///     status: u16,
    ///     body: String,
    /// }
    ///
    /// let response = ErasedBox::try_new(Response { status: 200, body: "ok".into() }).unwrap();
    /// let body = ErasedBox::map(response, |r| &mut r.body);
    /// assert_eq!(&*body, "ok");
    /// // dropping `body` destroys the whole `Response`
    /// ```
    pub fn map<U: ?Sized, F>(mut this: Self, project: F) -> ErasedBox<U>
    where
        F: for<'a> FnOnce(&'a mut T) -> &'a mut U,
    {
        let view = NonNull::from(project(&mut *this));
        // SAFETY: `view` was just derived from the owned object, which stays
        // alive at a stable address until the returned handle drops it.
        unsafe { Self::alias(this, view) }
    }
}

impl<T> ErasedBox<T> {
    /// Allocates `value` on the heap and takes ownership of it.
    ///
    /// Exactly one allocation happens, the object's own. The deleter (plain
    /// `Box` reclamation) packs inline.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when the allocation fails; `value` is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use erased_ptr::ErasedBox;
    ///
    /// let answer = ErasedBox::try_new(42_u32).unwrap();
    /// assert_eq!(*answer, 42);
    /// ```
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        Ok(Self::from(Box::try_new(value)?))
    }

    /// Constructs the pointee in place, inside its final allocation.
    ///
    /// The initializer writes directly into the uninitialized slot, with no
    /// copy from the stack, which matters for large values. Combine with
    /// [`init!`](crate::init) for field-by-field construction or
    /// [`zeroed`](crate::zeroed) for blank buffers.
    ///
    /// # Errors
    ///
    /// [`AllocOrInitError::AllocError`] when the allocation fails, or
    /// [`AllocOrInitError::Init`] when the initializer reports an error; the
    /// slot is deallocated in the latter case and nothing is constructed.
    pub fn try_init<E>(init: impl Init<T, E>) -> Result<Self, AllocOrInitError<E>> {
        let mut slot = Box::try_new_uninit()?;
        // SAFETY: the slot is valid for writes; on `Err` the initializer has
        // cleaned up after itself and the slot is merely deallocated.
        unsafe { init.__init(slot.as_mut_ptr()).map_err(AllocOrInitError::Init)? };
        // SAFETY: fully initialized by the call above.
        let boxed = unsafe { slot.assume_init() };
        Ok(Self::from(boxed))
    }
}

impl<T> From<Box<T>> for ErasedBox<T> {
    /// Converts a [`Box`] with a sized pointee.
    ///
    /// Infallible and allocation-free: the thin pointer and the zero-sized
    /// deleter pack into the dispatch word.
    fn from(boxed: Box<T>) -> Self {
        let ptr = Box::into_raw(boxed);
        Self {
            // SAFETY: `Box::into_raw` never returns null.
            view: unsafe { NonNull::new_unchecked(ptr) },
            deleter: ErasedDeleter::new_inline(ptr, |ptr: *mut T| {
                // SAFETY: `ptr` came out of `Box::into_raw` above, and the
                // dispatch runs at most once.
                drop(unsafe { Box::from_raw(ptr) });
            }),
            _owns: PhantomData,
        }
    }
}

impl<T> InPlaceInit<T> for ErasedBox<T> {
    type Error<E> = AllocOrInitError<E>;

    fn try_init<E>(init: impl Init<T, E>) -> Result<Self, Self::Error<E>> {
        ErasedBox::try_init(init)
    }
}

impl<T: ?Sized> Deref for ErasedBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the view is valid for the handle's lifetime per the type
        // invariant.
        unsafe { self.view.as_ref() }
    }
}

impl<T: ?Sized> DerefMut for ErasedBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the view is valid for the handle's lifetime per the type
        // invariant, and `&mut self` guarantees exclusivity.
        unsafe { self.view.as_mut() }
    }
}

impl<T: ?Sized> AsRef<T> for ErasedBox<T> {
    fn as_ref(&self) -> &T {
        &**self
    }
}

impl<T: ?Sized> AsMut<T> for ErasedBox<T> {
    fn as_mut(&mut self) -> &mut T {
        &mut **self
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ErasedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for ErasedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: ?Sized> fmt::Pointer for ErasedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.view, f)
    }
}

impl<T: ?Sized> Unpin for ErasedBox<T> {}

impl<T: ?Sized> Drop for ErasedBox<T> {
    fn drop(&mut self) {
        // SAFETY: drop runs once, and every path that moves the dispatch out
        // of a handle (`alias`) suppresses the handle's drop.
        unsafe { self.deleter.invoke() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_survives_moves() {
        let handle = ErasedBox::try_new(11_u64).unwrap();
        let before = handle.as_ptr();
        let moved = handle;
        assert_eq!(moved.as_ptr(), before);
    }

    #[cfg(feature = "std")]
    #[test]
    fn formatting_forwards_to_the_pointee() {
        let handle = ErasedBox::try_new(3_i32).unwrap();
        assert_eq!(format!("{handle:?}"), "3");
        assert_eq!(format!("{handle}"), "3");
        assert_eq!(format!("{handle:p}"), format!("{:p}", handle.as_ptr()));
    }

    #[test]
    fn option_of_handle_costs_nothing_extra() {
        use core::mem::size_of;
        assert_eq!(
            size_of::<Option<ErasedBox<u8>>>(),
            size_of::<ErasedBox<u8>>(),
        );
    }
}
