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

//! `Future`/`Promise`, grounded on `oatpp::async::CoroutineWaitList`-backed
//! one-shot result cells (the shipping runtime doesn't name this pair
//! `Future`/`Promise` itself, but `Action::WaitList` plus a `notified` flag
//! is exactly the shape this crate's `Lock`/`ConditionVariable` already
//! use, so the same pattern is reused here for an OS-thread-settable,
//! coroutine-awaitable one-shot cell).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar as StdCondvar, Mutex as StdMutex, Weak};
use std::time::Duration;

use crate::action::{Action, CoroutineStarter, StepId};
use crate::coroutine::{self, with_result::ResultSlot, Coroutine};
use crate::error::Error;
use crate::sync::wait_list::{WaitList, WaitListHandle};

enum Slot<T> {
    Empty,
    Value(T),
    Error(Error),
}

struct Shared<T> {
    slot: StdMutex<Slot<T>>,
    ready: AtomicBool,
    thread_cv: StdCondvar,
    waiters: WaitListHandle,
}

/// The producing half of a one-shot value. Exactly one of `set_value` /
/// `set_exception` may be called; calling either a second time is a
/// programmer error (the slot can only be written once, mirroring the
/// "Future-once" invariant).
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// The consuming half. Cloneable: any number of coroutines or threads may
/// wait on the same `Future`.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future { shared: self.shared.clone() }
    }
}

/// Construct a connected `Promise`/`Future` pair backed by one shared cell.
pub fn channel<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let shared = Arc::new_cyclic(|weak: &Weak<Shared<T>>| {
        let weak_for_listener = weak.clone();
        Shared {
            slot: StdMutex::new(Slot::Empty),
            ready: AtomicBool::new(false),
            thread_cv: StdCondvar::new(),
            waiters: WaitList::with_listener(move |_list| {
                if let Some(shared) = weak_for_listener.upgrade() {
                    if shared.ready.load(Ordering::Acquire) {
                        shared.waiters.notify_all();
                    }
                }
            }),
        }
    });
    (
        Promise { shared: shared.clone() },
        Future { shared: shared },
    )
}

impl<T> Promise<T> {
    pub fn set_value(&self, value: T) {
        self.fulfill(Slot::Value(value));
    }

    pub fn set_exception(&self, error: Error) {
        self.fulfill(Slot::Error(error));
    }

    fn fulfill(&self, result: Slot<T>) {
        {
            let mut slot = self.shared.slot.lock().unwrap();
            debug_assert!(
                matches!(*slot, Slot::Empty),
                "Promise fulfilled more than once"
            );
            *slot = result;
        }
        self.shared.ready.store(true, Ordering::Release);
        self.shared.thread_cv.notify_all();
        self.shared.waiters.notify_all();
    }
}

impl<T: Send + 'static> Future<T> {
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Block the calling OS thread until the value is ready.
    pub fn wait(&self) -> Result<T, Error>
        where T: Clone
    {
        let mut slot = self.shared.slot.lock().unwrap();
        while !self.shared.ready.load(Ordering::Acquire) {
            slot = self.shared.thread_cv.wait(slot).unwrap();
        }
        take_result(&mut slot)
    }

    /// Block the calling OS thread until the value is ready or `timeout`
    /// elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        let mut slot = self.shared.slot.lock().unwrap();
        if !self.shared.ready.load(Ordering::Acquire) {
            let (guard, result) = self
                .shared
                .thread_cv
                .wait_timeout_while(slot, timeout, |_| {
                    !self.shared.ready.load(Ordering::Acquire)
                })
                .unwrap();
            slot = guard;
            if result.timed_out() {
                return None;
            }
        }
        Some(take_result(&mut slot))
    }

    /// Coroutine-side wait: park until a `Promise` fulfills this future
    /// (notifying immediately if it already has, via the listener installed
    /// in `channel()`), then hand the result to `result`.
    pub fn wait_async(&self, result: ResultSlot<Result<T, Error>>) -> CoroutineStarter {
        coroutine::start(Park { shared: self.shared.clone(), result: result })
    }
}

fn take_result<T>(slot: &mut Slot<T>) -> Result<T, Error> {
    match std::mem::replace(slot, Slot::Empty) {
        Slot::Value(v) => Ok(v),
        Slot::Error(e) => Err(e),
        Slot::Empty => unreachable!("Future resolved with an empty slot"),
    }
}

struct Park<T> {
    shared: Arc<Shared<T>>,
    result: ResultSlot<Result<T, Error>>,
}

impl<T: Send + 'static> Coroutine for Park<T> {
    fn step(&mut self, _step: StepId) -> Action {
        if self.shared.ready.load(Ordering::Acquire) {
            let mut slot = self.shared.slot.lock().unwrap();
            self.result.set(take_result(&mut slot));
            return Action::Finish;
        }
        Action::WaitList(self.shared.waiters.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handle::CoroutineHandle;
    use std::thread;

    #[test]
    fn set_value_is_observed_by_a_thread_blocking_wait() {
        let (promise, future) = channel::<u32>();
        let t = thread::spawn(move || {
            promise.set_value(42);
        });
        assert_eq!(future.wait().unwrap(), 42);
        t.join().unwrap();
    }

    #[test]
    fn set_exception_is_observed_by_a_thread_blocking_wait() {
        let (promise, future) = channel::<u32>();
        promise.set_exception(Error::coroutine("boom"));
        let err = future.wait().unwrap_err();
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn is_ready_reflects_fulfillment() {
        let (promise, future) = channel::<u32>();
        assert!(!future.is_ready());
        promise.set_value(1);
        assert!(future.is_ready());
    }

    #[test]
    fn wait_timeout_returns_none_before_fulfillment() {
        let (_promise, future) = channel::<u32>();
        assert!(future.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn wait_async_resolves_once_a_value_arrives_already_set() {
        let (promise, future) = channel::<u32>();
        promise.set_value(7);

        let result: ResultSlot<Result<u32, Error>> = ResultSlot::new();
        let starter = future.wait_async(result.clone());
        let mut handle = CoroutineHandle::from_starter(starter);
        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 10);
        }
        assert_eq!(result.take().unwrap().unwrap(), 7);
    }

    #[test]
    fn wait_async_parks_until_a_later_set_value() {
        let (promise, future) = channel::<u32>();
        let result: ResultSlot<Result<u32, Error>> = ResultSlot::new();
        let starter = future.wait_async(result.clone());
        let mut handle = CoroutineHandle::from_starter(starter);

        handle.iterate_and_take_action();
        assert!(!handle.finished(), "nothing is set yet, so the coroutine should park");

        promise.set_value(9);
        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 10);
        }
        assert_eq!(result.take().unwrap().unwrap(), 9);
    }
}
