// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Library-internal items backing the [`init!`](crate::init) macro.
//!
//! Everything here is an implementation detail. It has to be `pub` so the
//! macro can reach it from the expansion site, but none of it is part of the
//! public API.

use core::cell::Cell;
use core::convert::Infallible;
use core::ptr;

use crate::Init;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::ByValue {}
    impl Sealed for super::ByInit {}
}

/// Compile-time selector between the two ways a field can be initialized.
/// Workaround for the lack of specialization: inference picks the only
/// applicable way per field expression.
pub trait InitWay: sealed::Sealed {}

/// The field expression is a plain value of the field's type.
pub struct ByValue;

/// The field expression is itself an in-place initializer.
pub struct ByInit;

impl InitWay for ByValue {}
impl InitWay for ByInit {}

/// Initializes one field slot, either from a value or from a nested
/// initializer; which one is decided statically through `W`.
///
/// # Safety
///
/// Implementations must fully initialize `slot` on `Ok` and leave it
/// untouched (or cleaned) on `Err`.
pub unsafe trait __InitImpl<T, E, W: InitWay> {
    /// Initializes `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes of a `T` and may be uninitialized.
    unsafe fn __init(self, slot: *mut T) -> Result<(), E>;
}

// SAFETY: writing the value initializes the slot completely.
unsafe impl<T> __InitImpl<T, Infallible, ByValue> for T {
    unsafe fn __init(self, slot: *mut T) -> Result<(), Infallible> {
        // SAFETY: `slot` is valid for writes per the function contract.
        unsafe { slot.write(self) };
        Ok(())
    }
}

// SAFETY: forwards to `Init`, which carries the same contract.
unsafe impl<I, T, E> __InitImpl<T, E, ByInit> for I
where
    I: Init<T, E>,
{
    unsafe fn __init(self, slot: *mut T) -> Result<(), E> {
        // SAFETY: the function contract matches `Init::__init`'s.
        unsafe { Init::__init(self, slot) }
    }
}

/// Drops the pointee when dropped, unless defused.
///
/// The [`init!`](crate::init) macro arms one guard per initialized field, so
/// an error in a later field unwinds the earlier ones, and defuses them all
/// once the whole struct made it.
pub struct DropGuard<T: ?Sized>(*mut T, Cell<bool>);

impl<T: ?Sized> DropGuard<T> {
    /// Creates a guard that will [`ptr::drop_in_place`] `ptr` when dropped.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized `T`, and the caller must ensure
    /// the guard only gets dropped while the pointee
    /// - has not been dropped,
    /// - is not accessible by any other means,
    /// - will not be dropped by any other means.
    pub unsafe fn new(ptr: *mut T) -> Self {
        Self(ptr, Cell::new(true))
    }

    /// Defuses the guard: the pointee will not be dropped.
    ///
    /// # Safety
    ///
    /// Unsafe so that safe code cannot silence a guard; only the macros in
    /// this crate call it, after every field initialized successfully.
    pub unsafe fn forget(&self) {
        self.1.set(false);
    }
}

impl<T: ?Sized> Drop for DropGuard<T> {
    fn drop(&mut self) {
        if self.1.get() {
            // SAFETY: a `DropGuard` is only created through the unsafe `new`,
            // whose contract makes this drop sound.
            unsafe { ptr::drop_in_place(self.0) }
        }
    }
}
