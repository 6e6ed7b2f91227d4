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

//! The `Action` value: what a coroutine step wants the runtime to do next.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::coroutine::CoroutineObj;
use crate::error::Error;
use crate::sync::wait_list::WaitListHandle;

/// Identifies a step function within a single coroutine frame. A step is a
/// (frame, step id) pair rather than a raw function pointer: the frame's
/// `step()` match dispatches on it.
pub type StepId = u32;

/// Every coroutine's first step.
pub const ENTRY_STEP: StepId = 0;

/// I/O direction a handle is waiting on. Values mirror the composite codes
/// the original C++ runtime ORs into its Action type tag for single-switch
/// dispatch inside I/O workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEventType {
    Read = 256,
    Write = 512,
}

/// Bit tag for `Action::IoWait`/`IoRepeat`, used to build the composite
/// dispatch codes I/O workers switch on.
const TYPE_IO_WAIT: i32 = 1;
const TYPE_IO_REPEAT: i32 = 2;

pub const CODE_IO_WAIT_READ: i32 = TYPE_IO_WAIT | IoEventType::Read as i32;
pub const CODE_IO_WAIT_WRITE: i32 = TYPE_IO_WAIT | IoEventType::Write as i32;
pub const CODE_IO_REPEAT_READ: i32 = TYPE_IO_REPEAT | IoEventType::Read as i32;
pub const CODE_IO_REPEAT_WRITE: i32 = TYPE_IO_REPEAT | IoEventType::Write as i32;

/// A raw, OS-level I/O handle. Opaque to the runtime; callers (protocol
/// layers, out of scope here) supply it.
pub type IoHandle = i32;

/// What a coroutine step wants the runtime to do next.
///
/// Move-only (no `Clone`/`Copy`): owns a child frame on `StartChildren` and
/// an error on `Error`. `None` is the inert/consumed sentinel.
pub enum Action {
    /// Inert; already consumed, or "nothing further to do this step".
    None,
    /// Push one or more chained child frames; the last one's completion
    /// delivers the boxed terminal action to the parent.
    StartChildren(VecDeque<Box<dyn CoroutineObj>>, Box<Action>),
    /// Replace the current step function of the active frame.
    YieldTo(StepId),
    /// Invoke the current step again.
    Repeat,
    /// Sleep until the given deadline, then behave as `Repeat`.
    WaitRepeat(Instant),
    /// Park until `handle` is ready for `event`, then run the current step.
    IoWait(IoHandle, IoEventType),
    /// Same as `IoWait`; signals an I/O op that completed and wants to
    /// continue (as opposed to one that is only now being registered).
    IoRepeat(IoHandle, IoEventType),
    /// Pop the active frame and resume the parent.
    Finish,
    /// Unwind: give `handle_error` a chance to recover.
    Error(Error),
    /// Park on a wait-list; resumed by a notify.
    WaitList(WaitListHandle),
    /// Same, but removed and woken automatically at `deadline` if no
    /// notify arrives first.
    WaitListTimed(WaitListHandle, Instant),
}

impl Action {
    pub fn start_child(child: Box<dyn CoroutineObj>) -> Action {
        let mut q = VecDeque::new();
        q.push_back(child);
        Action::StartChildren(q, Box::new(Action::None))
    }

    pub fn yield_to(step: StepId) -> Action {
        Action::YieldTo(step)
    }

    pub fn repeat() -> Action {
        Action::Repeat
    }

    pub fn finish() -> Action {
        Action::Finish
    }

    pub fn error(err: Error) -> Action {
        Action::Error(err)
    }

    pub fn wait_repeat(timeout: Duration) -> Action {
        Action::WaitRepeat(Instant::now() + timeout)
    }

    pub fn io_wait(handle: IoHandle, event: IoEventType) -> Action {
        Action::IoWait(handle, event)
    }

    pub fn io_repeat(handle: IoHandle, event: IoEventType) -> Action {
        Action::IoRepeat(handle, event)
    }

    pub fn wait_list(list: WaitListHandle) -> Action {
        Action::WaitList(list)
    }

    pub fn wait_list_timed(list: WaitListHandle, deadline: Instant) -> Action {
        Action::WaitListTimed(list, deadline)
    }

    pub fn is_error(&self) -> bool {
        matches!(*self, Action::Error(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(*self, Action::None)
    }

    /// The handle/direction this action parks a coroutine on, for I/O
    /// worker routing. `None` for non-I/O actions.
    pub fn io_handle(&self) -> Option<(IoHandle, IoEventType)> {
        match *self {
            Action::IoWait(h, e) | Action::IoRepeat(h, e) => Some((h, e)),
            _ => None,
        }
    }

    /// Composite `(kind | direction)` code, mirroring the original's
    /// `getIOEventCode()`, used by I/O workers for single-switch dispatch.
    pub fn io_event_code(&self) -> Option<i32> {
        match *self {
            Action::IoWait(_, e) => Some(TYPE_IO_WAIT | e as i32),
            Action::IoRepeat(_, e) => Some(TYPE_IO_REPEAT | e as i32),
            _ => None,
        }
    }
}

/// Accumulates a chain of coroutines to be run in sequence, sharing one
/// parent slot. Consumed by `Executor::execute` or by returning it (via
/// `.into_action(...)`) from a parent step.
pub struct CoroutineStarter {
    frames: VecDeque<Box<dyn CoroutineObj>>,
}

impl CoroutineStarter {
    pub fn new(first: Box<dyn CoroutineObj>) -> CoroutineStarter {
        let mut frames = VecDeque::new();
        frames.push_back(first);
        CoroutineStarter { frames: frames }
    }

    /// Chain another starter's frames after this one's.
    pub fn next_starter(mut self, other: CoroutineStarter) -> CoroutineStarter {
        self.frames.extend(other.frames);
        self
    }

    /// Terminal composition: consume the chain into a single `Action` that
    /// delivers `action` once every chained frame has finished.
    pub fn next_action(self, action: Action) -> Action {
        if self.frames.is_empty() {
            return action;
        }
        Action::StartChildren(self.frames, Box::new(action))
    }

    pub(crate) fn into_parts(self) -> VecDeque<Box<dyn CoroutineObj>> {
        self.frames
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_event_code_combines_type_and_direction() {
        assert_eq!(Action::io_wait(3, IoEventType::Read).io_event_code(), Some(CODE_IO_WAIT_READ));
        assert_eq!(Action::io_wait(3, IoEventType::Write).io_event_code(), Some(CODE_IO_WAIT_WRITE));
        assert_eq!(Action::io_repeat(3, IoEventType::Read).io_event_code(), Some(CODE_IO_REPEAT_READ));
        assert_eq!(Action::io_repeat(3, IoEventType::Write).io_event_code(), Some(CODE_IO_REPEAT_WRITE));
        assert_eq!(Action::Finish.io_event_code(), None);
    }

    #[test]
    fn is_error_and_is_none() {
        assert!(Action::None.is_none());
        assert!(!Action::Finish.is_none());
        assert!(Action::error(crate::error::Error::coroutine("boom")).is_error());
        assert!(!Action::Finish.is_error());
    }

    #[test]
    fn next_action_on_empty_starter_is_a_no_op_passthrough() {
        struct Noop;
        impl CoroutineObj for Noop {
            fn step(&mut self, _step: StepId) -> Action {
                Action::Finish
            }
            fn handle_error(&mut self, error: Error) -> Action {
                Action::Error(error)
            }
        }
        let starter = CoroutineStarter::new(Box::new(Noop));
        let mut frames = starter.into_parts();
        // Draining every frame out first reproduces the "empty starter"
        // case next_action special-cases.
        frames.clear();
        let rebuilt = CoroutineStarter { frames: frames };
        match rebuilt.next_action(Action::Repeat) {
            Action::Repeat => {}
            _ => panic!("expected the terminal action to pass through unchanged"),
        }
    }
}
