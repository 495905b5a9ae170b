// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end ownership: every constructor form destroys exactly once, at
//! the right time, through the right action.

use std::cell::Cell;
use std::convert::Infallible;
use std::rc::Rc;

use erased_ptr::{init, init_from_closure, AllocOrInitError, ErasedBox};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Untouched,
    Alive,
    Dropped,
    Reclaimed,
}

fn state() -> Rc<Cell<State>> {
    Rc::new(Cell::new(State::Untouched))
}

struct Probe {
    state: Rc<Cell<State>>,
    payload: u64,
}

impl Probe {
    fn new(state: &Rc<Cell<State>>) -> Self {
        state.set(State::Alive);
        Self {
            state: Rc::clone(state),
            payload: 0,
        }
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        assert_eq!(self.state.get(), State::Alive, "dropped twice");
        self.state.set(State::Dropped);
    }
}

#[test]
fn try_new_drops_exactly_once() {
    let state = state();
    {
        let handle = ErasedBox::try_new(Probe::new(&state)).unwrap();
        assert_eq!(state.get(), State::Alive);
        assert_eq!(handle.payload, 0);
    }
    assert_eq!(state.get(), State::Dropped);
}

#[test]
fn from_box_drops_exactly_once() {
    let state = state();
    {
        let handle = ErasedBox::from(Box::new(Probe::new(&state)));
        assert_eq!(state.get(), State::Alive);
        drop(handle);
        assert_eq!(state.get(), State::Dropped);
    }
}

#[test]
fn raw_pointer_with_default_deleter_drops_exactly_once() {
    let state = state();
    let raw = Box::into_raw(Box::new(Probe::new(&state)));
    // SAFETY: `raw` came out of `Box::into_raw` and is uniquely owned.
    let handle = unsafe { ErasedBox::from_raw(raw) }.unwrap();
    assert_eq!(state.get(), State::Alive);
    drop(handle);
    assert_eq!(state.get(), State::Dropped);
}

#[test]
fn custom_deleter_observes_the_dropped_object() {
    let state = state();
    {
        let raw = Box::into_raw(Box::new(Probe::new(&state)));
        let observer = Rc::clone(&state);
        // SAFETY: `raw` is live and uniquely owned; the closure frees it once.
        let handle = unsafe {
            ErasedBox::from_raw_with(raw, move |ptr| {
                // SAFETY: `ptr` came out of `Box::into_raw` above.
                drop(unsafe { Box::from_raw(ptr) });
                // the destructor has already run by the time we get here
                assert_eq!(observer.get(), State::Dropped);
                observer.set(State::Reclaimed);
            })
        }
        .unwrap();
        assert_eq!(state.get(), State::Alive);
        drop(handle);
    }
    assert_eq!(state.get(), State::Reclaimed);
}

#[test]
fn self_destroying_objects_are_safe() {
    struct SelfDestroyer {
        state: Rc<Cell<State>>,
    }

    impl SelfDestroyer {
        /// # Safety
        ///
        /// `ptr` must come out of `Box::into_raw` and must not be used again.
        unsafe fn destroy(ptr: *mut Self) {
            // SAFETY: forwarded to the caller.
            drop(unsafe { Box::from_raw(ptr) });
        }
    }

    impl Drop for SelfDestroyer {
        fn drop(&mut self) {
            assert_eq!(self.state.get(), State::Alive, "dropped twice");
            self.state.set(State::Dropped);
        }
    }

    let state = state();
    state.set(State::Alive);
    let raw = Box::into_raw(Box::new(SelfDestroyer {
        state: Rc::clone(&state),
    }));
    // SAFETY: `raw` is live and uniquely owned; the deleter consumes it once.
    let handle = unsafe {
        ErasedBox::from_raw_with(raw, |ptr| {
            // SAFETY: `ptr` is the pointer boxed above, destroyed only here.
            unsafe { SelfDestroyer::destroy(ptr) }
        })
    }
    .unwrap();
    assert_eq!(state.get(), State::Alive);
    drop(handle);
    assert_eq!(state.get(), State::Dropped);
}

#[test]
fn moves_transfer_ownership() {
    let state = state();
    let handle = ErasedBox::try_new(Probe::new(&state)).unwrap();
    let moved = handle;
    let mut slot = Some(moved);
    let taken = slot.take().unwrap();
    assert!(slot.is_none());
    assert_eq!(state.get(), State::Alive);
    drop(taken);
    assert_eq!(state.get(), State::Dropped);
}

#[test]
fn displaced_values_die_with_their_new_owner() {
    let first = state();
    let second = state();
    let mut slot = Some(ErasedBox::try_new(Probe::new(&first)).unwrap());
    let displaced = slot.replace(ErasedBox::try_new(Probe::new(&second)).unwrap());
    // replacing is a move, not a destruction
    assert_eq!(first.get(), State::Alive);
    drop(displaced);
    assert_eq!(first.get(), State::Dropped);
    assert_eq!(second.get(), State::Alive);
    drop(slot);
    assert_eq!(second.get(), State::Dropped);
}

#[test]
fn pointee_is_mutable_through_the_handle() {
    let state = state();
    let mut handle = ErasedBox::try_new(Probe::new(&state)).unwrap();
    handle.payload = 7;
    assert_eq!(handle.payload, 7);
}

#[test]
fn failing_field_initializer_drops_earlier_fields() {
    struct TwoStage {
        _first: Probe,
        _second: Probe,
    }

    #[derive(Debug, PartialEq)]
    struct Boom;

    impl From<Infallible> for Boom {
        fn from(e: Infallible) -> Self {
            match e {}
        }
    }

    let first = state();
    let probe = Probe::new(&first);
    let result = ErasedBox::try_init::<Boom>(init!(TwoStage {
        _first: probe,
        _second: {
            // SAFETY: the closure writes nothing and reports failure.
            unsafe { init_from_closure(|_slot: *mut Probe| Err(Boom)) }
        },
    }));
    match result {
        Err(AllocOrInitError::Init(error)) => assert_eq!(error, Boom),
        _ => panic!("initialization should have failed"),
    }
    // the already-initialized field was unwound
    assert_eq!(first.get(), State::Dropped);
}

#[test]
fn all_value_initializers_succeed() {
    let state = state();
    struct Pairing {
        _probe: Probe,
        tag: u32,
    }

    let probe = Probe::new(&state);
    let handle =
        ErasedBox::try_init::<Infallible>(init!(Pairing { _probe: probe, tag: 9 })).unwrap();
    assert_eq!(handle.tag, 9);
    assert_eq!(state.get(), State::Alive);
    drop(handle);
    assert_eq!(state.get(), State::Dropped);
}

#[test]
fn from_value_moves_into_the_allocation() {
    let state = state();
    let probe = Probe::new(&state);
    let handle = ErasedBox::try_init(erased_ptr::from_value(probe)).unwrap();
    assert_eq!(state.get(), State::Alive);
    drop(handle);
    assert_eq!(state.get(), State::Dropped);
}
