// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The [`init!`] macro: field-by-field in-place construction.

/// Constructs an in-place initializer for a struct.
///
/// The syntax is the ordinary struct-literal syntax, and every field of the
/// struct must appear. A field expression that is a plain value is written
/// straight into its slot; a field expression that is itself an initializer
/// (for example [`zeroed()`](crate::zeroed) or a nested `init!`) runs in
/// place. The choice happens per field at compile time, by inference.
///
/// If a field's initializer fails, every field initialized before it is
/// dropped and the error is returned; the memory slot is left to the caller
/// to deallocate, which [`ErasedBox::try_init`](crate::ErasedBox::try_init)
/// and [`InPlaceInit::try_init`](crate::InPlaceInit::try_init) do.
///
/// # Examples
///
/// ```rust
/// use core::convert::Infallible;
/// use erased_ptr::{init, zeroed, ErasedBox};
///
/// struct Scratch {
///     buf: [u8; 4096],
///     used: usize,
/// }
///
/// let scratch = ErasedBox::try_init::<Infallible>(init!(Scratch {
///     buf: zeroed(),
///     used: 0,
/// }))
/// .unwrap();
/// assert_eq!(scratch.buf[17], 0);
/// assert_eq!(scratch.used, 0);
/// ```
///
/// Fields written as plain values and fields written as initializers can be
/// mixed as long as their error types line up. The error type usually needs
/// naming at the consumption site, as above with
/// [`Infallible`](core::convert::Infallible): the `?` conversions inside the
/// expansion leave it otherwise unconstrained.
#[macro_export]
macro_rules! init {
    ($t:ident $(<$($generics:ty),* $(,)?>)? {
        $($field:ident $(: $val:expr)?),*
        $(,)?
    }) => {{
        // do not allow arbitrary returns from field expressions
        struct __InitOk;
        let init = move |slot: *mut $t $(<$($generics),*>)?| -> ::core::result::Result<__InitOk, _> {
            {
                // shadow the marker so field expressions cannot forge it
                struct __InitOk;
                $(
                    $(let $field = $val;)?
                    // SAFETY: `slot` is valid for writes while inside the
                    // initializer closure; on error we return right away and
                    // the guards below clean up.
                    unsafe {
                        $crate::__internal::__InitImpl::__init(
                            $field,
                            ::core::ptr::addr_of_mut!((*slot).$field),
                        )?
                    };
                    // SAFETY: the field was initialized right above and is
                    // reachable through `slot` only.
                    let $field = unsafe {
                        $crate::__internal::DropGuard::new(
                            ::core::ptr::addr_of_mut!((*slot).$field),
                        )
                    };
                    // only expose `&DropGuard`, so it cannot be forgotten
                    let $field = &$field;
                )*
                #[allow(unreachable_code, clippy::diverging_sub_expression)]
                if false {
                    let _: $t $(<$($generics),*>)? = $t {
                        $($field: ::core::todo!()),*
                    };
                }
                $(
                    // SAFETY: every field initialized, nothing must be dropped.
                    unsafe { $crate::__internal::DropGuard::forget($field) };
                )*
            }
            ::core::result::Result::Ok(__InitOk)
        };
        let init = move |slot: *mut $t $(<$($generics),*>)?| -> ::core::result::Result<(), _> {
            init(slot).map(|__InitOk| ())
        };
        // SAFETY: the closure initializes every field or cleans up and errors.
        unsafe { $crate::init_from_closure(init) }
    }};
}
