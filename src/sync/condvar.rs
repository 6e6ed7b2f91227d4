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

//! Coroutine-aware condition variable, grounded on
//! `oatpp::async::ConditionVariable`.
//!
//! `wait`/`wait_for`/`wait_until` are a single coroutine frame with two
//! phases (`Acquiring` the lock, `Holding` it to check the predicate)
//! rather than a chain of pushed child frames: the "loop back to step one
//! on wake" behavior the original gets from re-entering its coroutine is
//! just revisiting the same step with `phase` reset, the state-enum +
//! dispatch shape this crate uses throughout in place of a real stack
//! rewind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::action::{Action, CoroutineStarter, StepId};
use crate::coroutine::{self, with_result::ResultSlot, Coroutine};
use crate::sync::lock::{Lock, LockGuard};
use crate::sync::wait_list::{WaitList, WaitListHandle};

pub struct ConditionVariable {
    notified: AtomicBool,
    waiters: WaitListHandle,
}

impl ConditionVariable {
    pub fn new() -> Arc<ConditionVariable> {
        Arc::new_cyclic(|weak: &std::sync::Weak<ConditionVariable>| {
            let weak_for_listener = weak.clone();
            ConditionVariable {
                notified: AtomicBool::new(false),
                waiters: WaitList::with_listener(move |_list| {
                    if let Some(cv) = weak_for_listener.upgrade() {
                        if cv.notified.load(Ordering::Acquire) {
                            cv.waiters.notify_all();
                        }
                    }
                }),
            }
        })
    }

    /// Wake one parked waiter. The waiter re-checks its predicate after
    /// re-acquiring the lock, so spurious wakes are harmless.
    pub fn notify_first(&self) {
        self.notified.store(true, Ordering::Release);
        self.waiters.notify_first();
    }

    pub fn notify_all(&self) {
        self.notified.store(true, Ordering::Release);
        self.waiters.notify_all();
    }
}

enum Phase {
    /// The guard's lock was released (or never acquired yet, for the
    /// never-actually-reached initial case); retrying `try_lock`.
    Acquiring,
    /// Lock held; safe to evaluate the predicate.
    Holding,
}

/// Body coroutine for `wait`/`wait_for`/`wait_until`. Takes ownership of an
/// already-held `LockGuard` (disarmed via `into_held_lock` so its `Drop`
/// doesn't race this coroutine's own unlock/relock cycles) and hands a
/// fresh one back through `result` once finished.
struct Wait<P: FnMut() -> bool + Send + 'static> {
    lock: Arc<Lock>,
    cv: Arc<ConditionVariable>,
    predicate: P,
    deadline: Option<Instant>,
    phase: Phase,
    result: ResultSlot<LockGuard>,
}

impl<P: FnMut() -> bool + Send + 'static> Coroutine for Wait<P> {
    fn step(&mut self, _step: StepId) -> Action {
        match self.phase {
            Phase::Acquiring => {
                if self.lock.try_lock() {
                    self.phase = Phase::Holding;
                    return Action::Repeat;
                }
                if self.lock.counter() == 0 {
                    return Action::Repeat;
                }
                Action::WaitList(self.lock.waiters())
            }

            Phase::Holding => {
                if (self.predicate)() {
                    self.result.set(LockGuard::from_parts(self.lock.clone(), true));
                    return Action::Finish;
                }

                if let Some(deadline) = self.deadline {
                    if Instant::now() >= deadline {
                        self.lock.unlock();
                        self.result.set(LockGuard::from_parts(self.lock.clone(), false));
                        return Action::Finish;
                    }
                }

                self.cv.notified.store(false, Ordering::Release);
                self.lock.unlock();
                self.phase = Phase::Acquiring;

                match self.deadline {
                    Some(deadline) => Action::WaitListTimed(self.cv.waiters.clone(), deadline),
                    None => Action::WaitList(self.cv.waiters.clone()),
                }
            }
        }
    }
}

/// Park until `predicate` holds, re-acquiring `guard`'s lock on every wake.
/// `result` receives the final guard once the coroutine finishes:
/// `owns_lock() == true` whenever `predicate` is what ended the wait,
/// `false` only when a `wait_for`/`wait_until` deadline elapsed first.
pub fn wait<P>(cv: Arc<ConditionVariable>, guard: LockGuard, predicate: P, result: ResultSlot<LockGuard>) -> CoroutineStarter
    where P: FnMut() -> bool + Send + 'static
{
    wait_impl(cv, guard, predicate, None, result)
}

pub fn wait_for<P>(
    cv: Arc<ConditionVariable>,
    guard: LockGuard,
    predicate: P,
    timeout: Duration,
    result: ResultSlot<LockGuard>,
) -> CoroutineStarter
    where P: FnMut() -> bool + Send + 'static
{
    wait_impl(cv, guard, predicate, Some(Instant::now() + timeout), result)
}

pub fn wait_until<P>(
    cv: Arc<ConditionVariable>,
    guard: LockGuard,
    predicate: P,
    deadline: Instant,
    result: ResultSlot<LockGuard>,
) -> CoroutineStarter
    where P: FnMut() -> bool + Send + 'static
{
    wait_impl(cv, guard, predicate, Some(deadline), result)
}

fn wait_impl<P>(
    cv: Arc<ConditionVariable>,
    guard: LockGuard,
    predicate: P,
    deadline: Option<Instant>,
    result: ResultSlot<LockGuard>,
) -> CoroutineStarter
    where P: FnMut() -> bool + Send + 'static
{
    let lock = guard.into_held_lock();
    coroutine::start(Wait {
        lock: lock,
        cv: cv,
        predicate: predicate,
        deadline: deadline,
        phase: Phase::Holding,
        result: result,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handle::CoroutineHandle;
    use crate::sync::lock::try_guard;

    fn drive(mut handle: CoroutineHandle) -> CoroutineHandle {
        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 1000, "coroutine did not finish in a bounded number of steps");
        }
        handle
    }

    #[test]
    fn wait_returns_immediately_when_the_predicate_already_holds() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        let guard = try_guard(lock.clone()).unwrap();
        let result: ResultSlot<LockGuard> = ResultSlot::new();

        let starter = wait(cv, guard, || true, result.clone());
        drive(CoroutineHandle::from_starter(starter));

        let guard = result.take().expect("wait should have produced a guard");
        assert!(guard.owns_lock());
    }

    #[test]
    fn wait_for_reports_an_unowned_guard_on_timeout() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        let guard = try_guard(lock.clone()).unwrap();
        let result: ResultSlot<LockGuard> = ResultSlot::new();

        // A deadline already in the past times out on the very first
        // predicate check instead of actually parking.
        let starter = wait_until(cv, guard, || false, Instant::now(), result.clone());
        drive(CoroutineHandle::from_starter(starter));

        let guard = result.take().expect("wait_until should have produced a guard");
        assert!(!guard.owns_lock());
        assert!(lock.try_lock(), "a timed-out wait must release the lock");
    }
}
