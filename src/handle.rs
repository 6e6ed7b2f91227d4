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

//! `CoroutineHandle`: the per-task state machine that advances a chain of
//! coroutine frames.
//!
//! The parent/child relationship in the original C++ runtime is an
//! intrusive linked list of heap frames connected by raw back-pointers. In
//! Rust that shape is naturally a stack: a frame is only ever active while
//! its children run and are popped before it resumes, so the frame chain
//! is represented here as a plain `Vec<FrameSlot>` rather than an
//! arena-with-indices or intrusive list — there is no aliasing to manage
//! because at most the top slot is ever touched.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::debug;

use crate::action::{Action, CoroutineStarter, StepId, ENTRY_STEP};
use crate::coroutine::CoroutineObj;
use crate::error::{Error, ErrorKind};

/// Identifies a handle within the Processor that owns it. Scoped per
/// Processor, not globally unique.
pub type HandleId = u64;

/// What a `WaitList` (or anything else holding a handle by id rather than
/// by value) needs in order to wake it back up: a non-owning, thread-safe
/// back-reference to the owning `Processor`.
///
/// Defined here rather than depending on `crate::processor` directly so
/// `handle.rs` and `processor.rs` don't form an import cycle; `Processor`
/// implements this trait.
pub trait ProcessorLink: Send + Sync {
    /// Move the handle identified by `id` out of the owning processor's
    /// sleep set and back onto its ready queue. Used by a `WaitList` the
    /// processor parked a handle on; the caller never has the handle
    /// itself, only its id.
    fn wake(&self, id: HandleId);

    /// Hand a handle the owning processor no longer holds (it was parked
    /// at a `TimerWorker` or I/O backend) back onto the ready queue. Used
    /// by sub-workers, which hold the handle value directly.
    fn resume(&self, handle: CoroutineHandle);
}

/// One active (or suspended) frame on a handle's chain.
struct FrameSlot {
    frame: Box<dyn CoroutineObj>,
    current_step: StepId,
    /// Step to resume in the parent frame once this slot (and any chained
    /// siblings) has finished.
    parent_return_step: StepId,
    /// Action delivered to the parent once this slot's sibling chain is
    /// exhausted.
    terminal_action: Action,
    /// Remaining chained coroutines sharing this slot's `parent_return_step`
    /// / `terminal_action` (see `CoroutineStarter`).
    siblings: VecDeque<Box<dyn CoroutineObj>>,
}

/// A runtime-owned shell around a chain of coroutine frames, pinned to one
/// `Processor` for its whole lifetime.
pub struct CoroutineHandle {
    stack: Vec<FrameSlot>,
    /// An Action stashed here while this handle is parked on a sub-worker
    /// (timer / I/O / wait-list) instead of living in a container.
    scheduled_action: Option<Action>,
    id: HandleId,
    owner: Option<Arc<dyn ProcessorLink>>,
}

impl CoroutineHandle {
    pub fn new(root: Box<dyn CoroutineObj>) -> CoroutineHandle {
        let mut stack = Vec::new();
        stack.push(FrameSlot {
            frame: root,
            current_step: ENTRY_STEP,
            parent_return_step: ENTRY_STEP,
            terminal_action: Action::None,
            siblings: VecDeque::new(),
        });
        CoroutineHandle {
            stack: stack,
            scheduled_action: None,
            id: 0,
            owner: None,
        }
    }

    pub fn from_starter(starter: CoroutineStarter) -> CoroutineHandle {
        let mut frames = starter.into_parts();
        let root = frames.pop_front().expect("CoroutineStarter must not be empty");
        let mut handle = CoroutineHandle::new(root);
        handle.stack[0].siblings = frames;
        handle
    }

    /// Bind this handle to the Processor admitting it. Called exactly once,
    /// when the handle leaves the submission funnel; the `processor` field
    /// is immutable after this point, matching the invariant in the data
    /// model.
    pub fn bind(&mut self, id: HandleId, owner: Arc<dyn ProcessorLink>) {
        debug_assert!(self.owner.is_none(), "CoroutineHandle bound twice");
        self.id = id;
        self.owner = Some(owner);
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn owner(&self) -> Arc<dyn ProcessorLink> {
        self.owner
            .clone()
            .expect("CoroutineHandle::owner() called before bind()")
    }

    /// `true` once the frame chain is fully unwound: every push/chain was
    /// eventually matched by a `Finish`/unrecovered `Error`.
    pub fn finished(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn scheduled_action(&self) -> Option<&Action> {
        self.scheduled_action.as_ref()
    }

    pub fn take_scheduled_action(&mut self) -> Option<Action> {
        self.scheduled_action.take()
    }

    pub fn set_scheduled_action(&mut self, action: Action) {
        self.scheduled_action = Some(action);
    }

    /// Call the active frame's current step once, trapping any panic into
    /// an `Action::Error` the same way the original traps a thrown
    /// exception at the iteration boundary.
    fn call_step(&mut self) -> Action {
        let slot = match self.stack.last_mut() {
            Some(s) => s,
            None => return Action::None,
        };
        let step = slot.current_step;
        let frame = &mut slot.frame;
        let result = panic::catch_unwind(AssertUnwindSafe(|| frame.step(step)));
        match result {
            Ok(action) => action,
            Err(payload) => Action::Error(Error::new(
                ErrorKind::StepPanic,
                panic_message(&payload),
            )),
        }
    }

    /// Run the active frame's step once. Does not drive `take_action`; use
    /// `iterate_and_take_action` for the common case.
    pub fn iterate(&mut self) -> Action {
        self.call_step()
    }

    /// Mutate the frame chain until `action` reaches a schedulable kind
    /// (anything other than `StartChildren` / `YieldTo` / `Finish` /
    /// `Error`), returning that action to the caller for scheduling.
    pub fn take_action(&mut self, mut action: Action) -> Action {
        loop {
            action = match action {
                Action::StartChildren(mut children, terminal) => {
                    let child = children
                        .pop_front()
                        .expect("StartChildren action must carry at least one frame");
                    let parent_return_step = self
                        .stack
                        .last()
                        .map(|s| s.current_step)
                        .unwrap_or(ENTRY_STEP);
                    self.stack.push(FrameSlot {
                        frame: child,
                        current_step: ENTRY_STEP,
                        parent_return_step: parent_return_step,
                        terminal_action: *terminal,
                        siblings: children,
                    });
                    Action::None
                }

                Action::YieldTo(step) => {
                    if let Some(slot) = self.stack.last_mut() {
                        slot.current_step = step;
                    }
                    return Action::YieldTo(step);
                }

                Action::Finish => {
                    let slot = match self.stack.pop() {
                        Some(s) => s,
                        None => return Action::None,
                    };
                    let FrameSlot {
                        parent_return_step,
                        terminal_action,
                        mut siblings,
                        ..
                    } = slot;

                    if let Some(next_frame) = siblings.pop_front() {
                        self.stack.push(FrameSlot {
                            frame: next_frame,
                            current_step: ENTRY_STEP,
                            parent_return_step: parent_return_step,
                            terminal_action: terminal_action,
                            siblings: siblings,
                        });
                        Action::None
                    } else {
                        if let Some(parent) = self.stack.last_mut() {
                            parent.current_step = parent_return_step;
                        }
                        terminal_action
                    }
                }

                Action::Error(err) => {
                    let handled = match self.stack.last_mut() {
                        Some(slot) => slot.frame.handle_error(err),
                        None => return Action::None,
                    };
                    match handled {
                        Action::Error(e) => {
                            self.stack.pop();
                            if self.stack.is_empty() {
                                debug!("coroutine finished by unrecovered error: {}", e);
                                return Action::None;
                            }
                            Action::Error(e)
                        }
                        other => other,
                    }
                }

                other => return other,
            };
        }
    }

    /// `take_action(iterate())`, the handle's normal per-round entry point.
    pub fn iterate_and_take_action(&mut self) -> Action {
        let action = self.iterate();
        self.take_action(action)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coroutine::Coroutine;

    struct Finisher;
    impl Coroutine for Finisher {
        fn step(&mut self, _step: StepId) -> Action {
            Action::Finish
        }
    }

    struct Panicker;
    impl Coroutine for Panicker {
        fn step(&mut self, _step: StepId) -> Action {
            panic!("boom");
        }
    }

    struct Counter {
        remaining: u32,
    }
    impl Coroutine for Counter {
        fn step(&mut self, _step: StepId) -> Action {
            if self.remaining == 0 {
                Action::Finish
            } else {
                self.remaining -= 1;
                Action::Repeat
            }
        }
    }

    #[test]
    fn a_single_frame_finishing_empties_the_stack() {
        let mut handle = CoroutineHandle::new(Box::new(Finisher));
        assert!(!handle.finished());
        handle.iterate_and_take_action();
        assert!(handle.finished());
    }

    #[test]
    fn repeat_runs_the_same_step_until_finish() {
        let mut handle = CoroutineHandle::new(Box::new(Counter { remaining: 3 }));
        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 10, "coroutine should have finished by now");
        }
        assert_eq!(rounds, 4);
    }

    #[test]
    fn a_panicking_step_surfaces_as_an_action_error() {
        let mut handle = CoroutineHandle::new(Box::new(Panicker));
        let action = handle.iterate();
        match action {
            Action::Error(e) => assert_eq!(e.message(), "boom"),
            _ => panic!("expected a panic to be trapped into Action::Error"),
        }
    }

    struct Driver;
    impl Coroutine for Driver {
        fn step(&mut self, _step: StepId) -> Action {
            crate::coroutine::start(Finisher).next_action(Action::Finish)
        }
    }

    #[test]
    fn start_children_chain_finishes_the_parent_once_the_terminal_resolves() {
        // The composition `lock.rs::synchronize` relies on: a child chain
        // whose own Finish is the parent's terminal action pops the parent
        // too, rather than leaving it on the stack to be re-entered.
        let mut handle = CoroutineHandle::new(Box::new(Driver));
        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 10, "parent should finish once the child chain resolves");
        }
        assert_eq!(rounds, 2);
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "coroutine step panicked with a non-string payload".to_string()
    }
}
