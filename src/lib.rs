// SPDX-License-Identifier: Apache-2.0 OR MIT

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]
//
#![feature(allocator_api)]
#![feature(unsize, coerce_unsized)]

//! Unique ownership with the deleter erased from the type.
//!
//! [`ErasedBox<T>`] owns one heap object the way [`Box<T>`] does, except
//! that the action destroying the object is chosen when the handle is
//! created and then forgotten by the type system. Handles over the same
//! pointee move through one type no matter how the object will eventually
//! die: ordinary deallocation, a C library's release routine, a closure
//! handing the object back to a pool.
//!
//! Erasure is *allocation-optional*. A deleter without captured state (a
//! plain `fn` item or a capture-less closure) is packed, together with the
//! pointer it will act on, into the handle itself; only a deleter with
//! captured state (or a fat pointer) spills into a single small heap
//! record. [`ErasedDeleter`] spells out the exact rules.
//!
//! # Examples
//!
//! Owning a value with its natural destruction costs one allocation, the
//! object's own:
//!
//! ```rust
//! use erased_ptr::ErasedBox;
//!
//! let handle = ErasedBox::try_new([1_u32, 2, 3]).unwrap();
//! assert_eq!(handle[1], 2);
//! // dropping `handle` frees the array; nothing else was ever allocated
//! ```
//!
//! A foreign allocation destroyed by a named function; the function item is
//! zero-sized, so the handle stays allocation-free:
//!
//! ```rust
//! use erased_ptr::ErasedBox;
//!
//! fn dispose(ptr: *mut u8) {
//!     // SAFETY: only ever called on the allocation leaked below.
//!     drop(unsafe { Box::from_raw(ptr) });
//! }
//!
//! let raw = Box::into_raw(Box::new(7_u8));
//! // SAFETY: `raw` is live, uniquely owned, and `dispose` frees it once.
//! let handle = unsafe { ErasedBox::from_raw_with(raw, dispose) }.unwrap();
//! assert_eq!(*handle, 7);
//! ```
//!
//! Handles unsize like `Box` does; destruction still runs the concrete
//! type's destructor through the pointer captured at construction:
//!
//! ```rust
//! use core::fmt::Display;
//! use erased_ptr::ErasedBox;
//!
//! let shown: ErasedBox<dyn Display> = ErasedBox::try_new(1.25_f64).unwrap();
//! assert_eq!(shown.to_string(), "1.25");
//! ```
//!
//! A handle can expose a sub-object while owning the whole; see
//! [`ErasedBox::map`].
//!
//! # In-place construction
//!
//! [`ErasedBox::try_init`] writes a value directly into its final
//! allocation, guided by an [`Init`] initializer; the [`init!`] macro builds
//! one field by field and [`zeroed`] produces blank buffers. The same
//! initializers drive plain [`Box`]es through [`InPlaceInit`].
//!
//! # Feature flags
//!
//! - `std` (default): use the standard library.
//! - `alloc` (default): the smart-pointer surface ([`ErasedBox`],
//!   [`ErasedDeleter`]); without it only the [`Init`] layer remains, for
//!   `no_std` environments without an allocator.
//!
//! This crate uses the unstable `allocator_api`, `unsize` and
//! `coerce_unsized` features and therefore requires a nightly compiler.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::alloc::AllocError;
#[cfg(all(feature = "std", not(feature = "alloc")))]
use std::alloc::AllocError;

#[cfg(all(feature = "alloc", not(feature = "std")))]
use alloc::boxed::Box;

use core::convert::Infallible;
use core::marker::PhantomData;

#[doc(hidden)]
pub mod __internal;
mod macros;

#[cfg(any(feature = "alloc", feature = "std"))]
mod boxed;
#[cfg(any(feature = "alloc", feature = "std"))]
mod deleter;

#[cfg(any(feature = "alloc", feature = "std"))]
pub use boxed::ErasedBox;
#[cfg(any(feature = "alloc", feature = "std"))]
pub use deleter::ErasedDeleter;

/// An in-place initializer for `T`.
///
/// To use an initializer you need a memory location that can hold a `T`,
/// usually a fresh allocation: see [`ErasedBox::try_init`] and
/// [`InPlaceInit`]. Initializers are built with [`from_value`], [`zeroed`],
/// the [`init!`] macro, or, for the rare manual case, the raw
/// [`init_from_closure`].
///
/// # Safety
///
/// The [`Init::__init`] implementation
/// - returns `Ok(())` iff it initialized every byte that needs initializing
///   in `slot`,
/// - returns `Err(err)` iff it encountered an error and then cleaned `slot`,
///   meaning: `slot` can be deallocated without anything being dropped first
///   and is not partially initialized.
#[must_use = "An initializer must be used in order to create its value."]
pub unsafe trait Init<T, E = Infallible>: Sized {
    /// Initializes `slot`.
    ///
    /// # Safety
    ///
    /// `slot` is a valid pointer to uninitialized memory. The caller does
    /// not touch `slot` when `Err` is returned; they are only permitted to
    /// deallocate it.
    unsafe fn __init(self, slot: *mut T) -> Result<(), E>;
}

type Invariant<T> = PhantomData<fn(T) -> T>;

struct InitClosure<F, T, E>(F, Invariant<(T, E)>);

// SAFETY: `init_from_closure` forwards the contract to its caller.
unsafe impl<T, F, E> Init<T, E> for InitClosure<F, T, E>
where
    F: FnOnce(*mut T) -> Result<(), E>,
{
    unsafe fn __init(self, slot: *mut T) -> Result<(), E> {
        (self.0)(slot)
    }
}

/// Creates an [`Init<T, E>`] from a closure.
///
/// # Safety
///
/// The closure
/// - returns `Ok(())` iff it initialized every byte that needs initializing
///   in `slot`,
/// - returns `Err(err)` iff it encountered an error and then cleaned `slot`
///   (nothing left to drop, nothing partially initialized).
pub const unsafe fn init_from_closure<T, E>(
    f: impl FnOnce(*mut T) -> Result<(), E>,
) -> impl Init<T, E> {
    InitClosure(f, PhantomData)
}

/// Converts a value into an initializer that moves it into the slot.
pub fn from_value<T>(value: T) -> impl Init<T> {
    // SAFETY: writing the value initializes the slot.
    unsafe {
        init_from_closure(move |slot: *mut T| {
            slot.write(value);
            Ok(())
        })
    }
}

/// Creates an initializer that writes `0x00` over every byte of the slot.
pub fn zeroed<T: Zeroable>() -> impl Init<T> {
    // SAFETY: `T: Zeroable` makes the all-zeroes pattern a valid `T`, and
    // the write below initializes every byte of the slot.
    unsafe {
        init_from_closure(|slot: *mut T| {
            slot.write_bytes(0, 1);
            Ok(())
        })
    }
}

/// Marker for types whose all-zeroes bit pattern is a valid value.
///
/// # Safety
///
/// The bit pattern consisting of only zeroes must be a valid bit pattern for
/// the implementing type.
pub unsafe trait Zeroable {}

macro_rules! impl_zeroable {
    ($($t:ty),* $(,)?) => {
        // SAFETY: all-zeroes is a valid value of each listed type.
        $(unsafe impl Zeroable for $t {})*
    };
}

impl_zeroable!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, ()
);

// SAFETY: zeroing every element zeroes the array, and arrays have no padding.
unsafe impl<const N: usize, T: Zeroable> Zeroable for [T; N] {}

// SAFETY: a marker type has no bytes.
unsafe impl<T: ?Sized> Zeroable for PhantomData<T> {}

// SAFETY: the null pointer is a valid raw pointer value.
unsafe impl<T: ?Sized> Zeroable for *mut T {}
// SAFETY: the null pointer is a valid raw pointer value.
unsafe impl<T: ?Sized> Zeroable for *const T {}

/// Allocation error, or initialization error.
#[derive(Debug)]
pub enum AllocOrInitError<E> {
    /// Allocation failed.
    AllocError,
    /// Initialization failed.
    Init(E),
}

#[cfg(any(feature = "alloc", feature = "std"))]
impl<E> From<AllocError> for AllocOrInitError<E> {
    fn from(_: AllocError) -> Self {
        Self::AllocError
    }
}

impl<E> From<Infallible> for AllocOrInitError<E> {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// Smart pointers that can have their pointee constructed in place.
pub trait InPlaceInit<T>: Sized {
    /// The error produced when construction fails.
    type Error<E>;

    /// Initializes the pointee inside a fresh allocation, using `init`.
    fn try_init<E>(init: impl Init<T, E>) -> Result<Self, Self::Error<E>>;
}

#[cfg(any(feature = "alloc", feature = "std"))]
impl<T> InPlaceInit<T> for Box<T> {
    type Error<E> = AllocOrInitError<E>;

    fn try_init<E>(init: impl Init<T, E>) -> Result<Self, Self::Error<E>> {
        let mut this = Box::try_new_uninit()?;
        let slot = this.as_mut_ptr();
        // SAFETY: when `init` errors, the slot gets deallocated but not
        // dropped; the slot is valid.
        unsafe { init.__init(slot).map_err(AllocOrInitError::Init)? };
        // SAFETY: every byte that needed initializing has been initialized.
        Ok(unsafe { this.assume_init() })
    }
}
