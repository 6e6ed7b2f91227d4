// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The user-facing coroutine contract.
//!
//! A coroutine is any type implementing [`Coroutine`]: a step dispatcher
//! plus an optional error interceptor. It never holds its own stack frame
//! across an `.await`-like suspension the way an OS thread would — all of
//! its state lives in `self`, and each call to `step()` runs exactly one
//! synchronous slice before returning an [`Action`] describing what should
//! happen next.

use crate::action::{Action, CoroutineStarter, StepId, ENTRY_STEP};
use crate::error::Error;

/// A single coroutine type. `step` is called once per iteration with the
/// id of the step to run; implementations typically `match` on it.
pub trait Coroutine: Send + 'static {
    /// Run one step. Called first with [`ENTRY_STEP`].
    fn step(&mut self, step: StepId) -> Action;

    /// Intercept an error unwinding through this frame. The default simply
    /// re-raises it, continuing the unwind into the parent frame.
    fn handle_error(&mut self, error: Error) -> Action {
        Action::Error(error)
    }
}

/// Object-safe counterpart of [`Coroutine`], blanket-implemented for every
/// `T: Coroutine`. The handle's frame stack stores `Box<dyn CoroutineObj>`
/// since frames of different concrete types are chained together.
pub trait CoroutineObj: Send {
    fn step(&mut self, step: StepId) -> Action;
    fn handle_error(&mut self, error: Error) -> Action;
}

impl<T: Coroutine> CoroutineObj for T {
    fn step(&mut self, step: StepId) -> Action {
        Coroutine::step(self, step)
    }

    fn handle_error(&mut self, error: Error) -> Action {
        Coroutine::handle_error(self, error)
    }
}

/// Begin a [`CoroutineStarter`] chain from one coroutine value.
pub fn start<T: Coroutine>(coroutine: T) -> CoroutineStarter {
    CoroutineStarter::new(Box::new(coroutine))
}

/// A coroutine that produces a `T` via [`ResultSlot::set`] before
/// finishing, and whose caller retrieves it through the same slot.
///
/// This is the Rust analogue of oatpp's `AbstractCoroutineWithResult` /
/// `_return(args...)` pattern: rather than a typed callback stored in the
/// parent frame, the result travels through a small shared cell the parent
/// owns and the child is handed a clone of.
pub mod with_result {
    use std::sync::{Arc, Mutex};

    /// Shared slot a result-returning coroutine's `_return` writes into.
    /// Built on `Arc<Mutex<..>>` rather than `Rc<RefCell<..>>` because a
    /// handle, and any child frame holding one of these, may be handed off
    /// across processor/worker threads by the submission funnel.
    pub struct ResultSlot<T>(Arc<Mutex<Option<T>>>);

    impl<T> Clone for ResultSlot<T> {
        fn clone(&self) -> Self {
            ResultSlot(self.0.clone())
        }
    }

    impl<T> ResultSlot<T> {
        pub fn new() -> ResultSlot<T> {
            ResultSlot(Arc::new(Mutex::new(None)))
        }

        pub fn set(&self, value: T) {
            *self.0.lock().unwrap() = Some(value);
        }

        pub fn take(&self) -> Option<T> {
            self.0.lock().unwrap().take()
        }
    }
}

/// Convenience: a no-argument entry step id alias, re-exported for callers
/// who only ever implement a single-step coroutine.
pub const ACT: StepId = ENTRY_STEP;
