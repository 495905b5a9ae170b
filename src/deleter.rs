// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Storage and dispatch for type-erased deleters.
//!
//! The owning handle ([`ErasedBox`]) does not know the concrete type of its
//! deleter. What it holds instead is an [`ErasedDeleter`]: one dispatch
//! function and one word of opaque payload. This module decides how the
//! captured pointer and the deleter value get packed into that payload.
//!
//! Two representations exist:
//!
//! - **inline**: the deleter is zero-sized and the captured pointer is thin,
//!   so the payload word *is* the holder. Nothing is allocated and the
//!   dispatch has nothing to release.
//! - **boxed**: the deleter captured state, or the pointer carries metadata.
//!   The payload points at a heap record owning both; the dispatch releases
//!   the record as part of running.
//!
//! The choice is a size/alignment query on the monomorphized holder type, so
//! it constant-folds and each instantiation compiles down to exactly one of
//! the two dispatch functions.
//!
//! [`ErasedBox`]: crate::ErasedBox

use core::fmt;
use core::mem;

#[cfg(feature = "alloc")]
use alloc::alloc::AllocError;
#[cfg(all(feature = "std", not(feature = "alloc")))]
use std::alloc::AllocError;

#[cfg(all(feature = "alloc", not(feature = "std")))]
use alloc::boxed::Box;

/// Captured pointer and zero-sized deleter, viable as a payload word.
///
/// # Invariants
///
/// A value of this type is only ever materialized when
/// [`Self::FITS_IN_WORD`] holds, i.e. `ptr` is thin and `deleter` has no
/// size or over-alignment.
#[repr(C)]
struct InlineHolder<U: ?Sized, F> {
    ptr: *mut U,
    deleter: F,
}

impl<U: ?Sized, F> InlineHolder<U, F> {
    /// Whether this instantiation is bit-compatible with one payload word.
    ///
    /// True exactly when the pointer is thin and the deleter is a zero-sized,
    /// not over-aligned type.
    const FITS_IN_WORD: bool = mem::size_of::<Self>() == mem::size_of::<*mut ()>()
        && mem::align_of::<Self>() <= mem::align_of::<*mut ()>();
}

/// Captured pointer and deleter, owned by a heap record.
struct BoxedHolder<U: ?Sized, F> {
    ptr: *mut U,
    deleter: F,
}

/// Dispatch function for the inline representation.
///
/// # Safety
///
/// `data` must be the payload produced by packing an `InlineHolder<U, F>`
/// with these exact type parameters, and must not be used again afterwards.
unsafe fn invoke_inline<U: ?Sized, F: FnOnce(*mut U)>(data: *mut ()) {
    // SAFETY: per the function contract `data` is the bit-image of an
    // `InlineHolder<U, F>`, whose size equals the word's for every
    // instantiation that reaches this point.
    let InlineHolder { ptr, deleter } =
        unsafe { mem::transmute_copy::<*mut (), InlineHolder<U, F>>(&data) };
    deleter(ptr);
}

/// Dispatch function for the boxed representation.
///
/// Releases the record before running the deleter, so a panicking deleter
/// cannot leak it.
///
/// # Safety
///
/// `data` must have come out of `Box::into_raw` for a `BoxedHolder<U, F>`
/// with these exact type parameters, and must not be used again afterwards.
unsafe fn invoke_boxed<U: ?Sized, F: FnOnce(*mut U)>(data: *mut ()) {
    // SAFETY: per the function contract, ownership of the record transfers
    // back to us here and nobody else will see `data` again.
    let record = unsafe { Box::from_raw(data.cast::<BoxedHolder<U, F>>()) };
    let BoxedHolder { ptr, deleter } = *record;
    deleter(ptr);
}

/// The erased dispatch pair: everything an owning handle needs in order to
/// destroy the object it was constructed with.
///
/// A deleter starts out as any `F: FnOnce(*mut U)` plus the pointer it is
/// meant to act on. [`ErasedDeleter::try_new`] forgets both types, leaving a
/// dispatch function and one word of payload. Invoking the dispatch runs the
/// deleter on the captured pointer: always the pointer given at
/// construction, no matter what view the handle exposes by then.
///
/// # Invariants
///
/// The dispatch function and its payload are created together and stay
/// together; the dispatch is invoked at most once.
pub struct ErasedDeleter {
    invoke: unsafe fn(*mut ()),
    data: *mut (),
}

impl ErasedDeleter {
    /// Packs `ptr` and a zero-sized `deleter` into the payload word itself.
    ///
    /// No allocation takes place. An instantiation whose holder does not fit
    /// the word (a deleter with captured state, or a fat `ptr`) fails to
    /// compile; use [`ErasedDeleter::try_new`] when the deleter's shape is
    /// not statically known to be empty.
    pub fn new_inline<U: ?Sized, F: FnOnce(*mut U)>(ptr: *mut U, deleter: F) -> Self {
        const {
            assert!(
                InlineHolder::<U, F>::FITS_IN_WORD,
                "deleter and pointer must pack into one machine word",
            );
        }
        let holder = InlineHolder { ptr, deleter };
        // SAFETY: the sizes match per the assertion above, and a holder whose
        // only non-zero-sized field is a thin pointer is a valid word image.
        let data = unsafe { mem::transmute_copy::<InlineHolder<U, F>, *mut ()>(&holder) };
        mem::forget(holder);
        Self {
            invoke: invoke_inline::<U, F>,
            data,
        }
    }

    /// Captures `ptr` and `deleter`, choosing the cheapest representation.
    ///
    /// When the pair packs into the payload word (thin pointer, zero-sized
    /// deleter) this is [`ErasedDeleter::new_inline`] and never fails nor
    /// allocates. Otherwise a record holding the pair is allocated on the
    /// heap and released again inside the dispatch invocation.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] when the record cannot be allocated. Nothing is
    /// constructed in that case; `deleter` is dropped without running.
    pub fn try_new<U: ?Sized, F: FnOnce(*mut U)>(
        ptr: *mut U,
        deleter: F,
    ) -> Result<Self, AllocError> {
        if InlineHolder::<U, F>::FITS_IN_WORD {
            let holder = InlineHolder { ptr, deleter };
            // SAFETY: this branch is only taken when the holder is exactly
            // one word, making the copy below a plain pointer-bits move.
            let data = unsafe { mem::transmute_copy::<InlineHolder<U, F>, *mut ()>(&holder) };
            mem::forget(holder);
            Ok(Self {
                invoke: invoke_inline::<U, F>,
                data,
            })
        } else {
            let record = Box::try_new(BoxedHolder { ptr, deleter })?;
            Ok(Self {
                invoke: invoke_boxed::<U, F>,
                data: Box::into_raw(record).cast::<()>(),
            })
        }
    }

    /// Runs the dispatch: the deleter fires on the captured pointer, and any
    /// heap record backing the pair is released.
    ///
    /// # Safety
    ///
    /// Must be called at most once per [`ErasedDeleter`] value, counting
    /// every copy made of it along the way.
    pub unsafe fn invoke(&self) {
        // SAFETY: `self.data` was produced together with `self.invoke`, and
        // the at-most-once requirement is forwarded to the caller.
        unsafe { (self.invoke)(self.data) }
    }
}

impl fmt::Debug for ErasedDeleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedDeleter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    fn packs_inline<U: ?Sized, F: FnOnce(*mut U)>(_deleter: &F) -> bool {
        InlineHolder::<U, F>::FITS_IN_WORD
    }

    #[test]
    fn zero_sized_deleters_pack_inline() {
        fn free_u32(_ptr: *mut u32) {}
        assert!(packs_inline::<u32, _>(&free_u32));
        assert!(packs_inline::<u32, _>(&|_ptr: *mut u32| {}));
    }

    #[test]
    fn captured_state_spills() {
        let observed = Cell::new(false);
        let deleter = |_ptr: *mut u32| observed.set(true);
        assert!(!packs_inline::<u32, _>(&deleter));
        // a function pointer variable is one word of state, not zero
        let as_value: fn(*mut u32) = |_ptr| {};
        assert!(!packs_inline::<u32, _>(&as_value));
    }

    #[test]
    fn fat_pointers_spill() {
        fn free_slice(_ptr: *mut [u8]) {}
        assert!(!packs_inline::<[u8], _>(&free_slice));
        fn free_str(_ptr: *mut str) {}
        assert!(!packs_inline::<str, _>(&free_str));
    }

    #[test]
    fn inline_dispatch_reaches_the_captured_pointer() {
        let mut slot = 7_u8;
        let deleter = ErasedDeleter::new_inline(&mut slot as *mut u8, |ptr: *mut u8| {
            // SAFETY: `ptr` is the live `slot` above, written exactly once.
            unsafe { *ptr = 9 };
        });
        // SAFETY: invoked exactly once.
        unsafe { deleter.invoke() };
        assert_eq!(slot, 9);
    }

    #[test]
    fn boxed_dispatch_owns_its_record() {
        let hits = Cell::new(0_u32);
        let mut slot = 1_u8;
        let deleter = ErasedDeleter::try_new(&mut slot as *mut u8, |ptr: *mut u8| {
            hits.set(hits.get() + 1);
            // SAFETY: `ptr` is the live `slot` above, written exactly once.
            unsafe { *ptr = 2 };
        })
        .unwrap();
        // SAFETY: invoked exactly once.
        unsafe { deleter.invoke() };
        assert_eq!(hits.get(), 1);
        assert_eq!(slot, 2);
    }
}
