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

//! A mutex whose waiters are coroutines rather than OS threads.
//!
//! Grounded on the shipping `oatpp::async::Lock` (`LockGuard` + free
//! `synchronize()` helper), generalizing the teacher's thread-oriented
//! `sync::mutex::Mutex`/`LockGuard` shape (`src/sync/mutex.rs`) to the
//! coroutine-stepped world: `try_lock`/`unlock` stay synchronous, but
//! acquisition under contention happens through a returned `Action` rather
//! than a blocking call.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::action::{Action, CoroutineStarter, StepId};
use crate::coroutine::Coroutine;
use crate::sync::wait_list::{WaitList, WaitListHandle};

struct Inner {
    held: bool,
}

/// Cooperative mutex. `counter` tracks holders (0 or 1) plus currently
/// contending parkers, per the data model; going negative is a programmer
/// error.
pub struct Lock {
    counter: AtomicI32,
    state: StdMutex<Inner>,
    waiters: WaitListHandle,
}

impl Lock {
    pub fn new() -> Arc<Lock> {
        Arc::new_cyclic(|weak: &std::sync::Weak<Lock>| {
            let weak_for_listener = weak.clone();
            Lock {
                counter: AtomicI32::new(0),
                state: StdMutex::new(Inner { held: false }),
                waiters: WaitList::with_listener(move |_list| {
                    if let Some(lock) = weak_for_listener.upgrade() {
                        if lock.counter.load(Ordering::Acquire) == 0 {
                            lock.waiters.notify_first();
                        }
                    }
                }),
            }
        })
    }

    /// Attempt the lock without parking. Increments `counter` on success.
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.held {
            false
        } else {
            state.held = true;
            self.counter.fetch_add(1, Ordering::AcqRel);
            true
        }
    }

    /// Release the lock and wake the first waiter, if any.
    pub fn unlock(&self) {
        {
            let mut state = self.state.lock().unwrap();
            debug_assert!(state.held, "Lock::unlock() called while not held");
            state.held = false;
        }
        let prev = self.counter.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "Lock counter went negative");
        self.waiters.notify_first();
    }

    pub(crate) fn counter(&self) -> i32 {
        self.counter.load(Ordering::Acquire)
    }

    pub(crate) fn waiters(&self) -> WaitListHandle {
        self.waiters.clone()
    }
}

/// Coroutine-side RAII wrapper: unlocks on drop if it owns the lock.
pub struct LockGuard {
    lock: Arc<Lock>,
    owns: bool,
}

impl LockGuard {
    fn acquired(lock: Arc<Lock>) -> LockGuard {
        LockGuard { lock: lock, owns: true }
    }

    fn unlocked(lock: Arc<Lock>) -> LockGuard {
        LockGuard { lock: lock, owns: false }
    }

    /// Rebuild a guard around a lock a coroutine already holds (or has just
    /// released), e.g. after a `ConditionVariable::wait` round-trip.
    pub(crate) fn from_parts(lock: Arc<Lock>, owns: bool) -> LockGuard {
        LockGuard { lock: lock, owns: owns }
    }

    pub fn owns_lock(&self) -> bool {
        self.owns
    }

    pub fn lock(&self) -> &Arc<Lock> {
        &self.lock
    }

    /// Release early; subsequent `drop` is then a no-op.
    pub fn unlock(&mut self) {
        if self.owns {
            self.lock.unlock();
            self.owns = false;
        }
    }

    /// Hand the still-held lock to a coroutine that will manage its own
    /// unlock/relock cycles (`ConditionVariable::wait` and friends),
    /// disarming this guard's `Drop` without releasing the lock.
    pub(crate) fn into_held_lock(mut self) -> Arc<Lock> {
        debug_assert!(self.owns, "into_held_lock() called on a guard that doesn't own its lock");
        self.owns = false;
        self.lock.clone()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.owns {
            self.lock.unlock();
        }
    }
}

/// Retry-on-contention coroutine implementing `lock_async_inline`: yields
/// back to `try_lock` until it succeeds, then hands `next` to its parent.
struct LockAcquire {
    lock: Arc<Lock>,
    next: Option<Action>,
}

impl Coroutine for LockAcquire {
    fn step(&mut self, _step: StepId) -> Action {
        if self.lock.try_lock() {
            return self.next.take().unwrap_or(Action::Finish);
        }
        if self.lock.counter() == 0 {
            return Action::Repeat;
        }
        let list = self.lock.waiters.clone();
        Action::WaitList(list)
    }
}

/// Build a starter that retries `try_lock` until it succeeds, then
/// produces `next_action`. This is `lock_async_inline` from the data model:
/// the primitive coroutine composition every blocking acquire is built on.
pub fn lock_async_inline(lock: Arc<Lock>, next_action: Action) -> CoroutineStarter {
    crate::coroutine::start(LockAcquire { lock: lock, next: Some(next_action) })
}

/// Wrap `starter` with an acquire/release pair around it, the Rust
/// analogue of the shipping `oatpp::async::synchronize()` free function.
///
/// The release step is chained as a *sibling* of `starter`'s frames (same
/// parent slot) and the chain's terminal is `Action::Finish`, not the
/// default `Action::None`: once release finishes, that `Finish` pops the
/// `LockAcquire` frame driving this whole call rather than leaving it on
/// the stack to be re-entered (which would just try to re-acquire the lock
/// again from scratch, forever).
pub fn synchronize(lock: Arc<Lock>, starter: CoroutineStarter) -> CoroutineStarter {
    struct Release {
        lock: Arc<Lock>,
    }
    impl Coroutine for Release {
        fn step(&mut self, _step: StepId) -> Action {
            self.lock.unlock();
            Action::Finish
        }
    }

    let release = crate::coroutine::start(Release { lock: lock.clone() });
    let body = starter.next_starter(release).next_action(Action::Finish);
    lock_async_inline(lock, body)
}

/// Retry-on-contention coroutine that, unlike `lock_async_inline`, hands the
/// caller an owned `LockGuard` through `result` rather than an arbitrary
/// `Action` — the composition a `ConditionVariable::wait` call site needs
/// when the lock wasn't already free enough for `try_guard`.
struct LockAsync {
    lock: Arc<Lock>,
    result: crate::coroutine::with_result::ResultSlot<LockGuard>,
}

impl Coroutine for LockAsync {
    fn step(&mut self, _step: StepId) -> Action {
        if self.lock.try_lock() {
            self.result.set(LockGuard::acquired(self.lock.clone()));
            return Action::Finish;
        }
        if self.lock.counter() == 0 {
            return Action::Repeat;
        }
        Action::WaitList(self.lock.waiters.clone())
    }
}

/// Acquire `lock`, parking as needed, and deliver the resulting guard
/// through `result` once finished.
pub fn lock_async(
    lock: Arc<Lock>,
    result: crate::coroutine::with_result::ResultSlot<LockGuard>,
) -> CoroutineStarter {
    crate::coroutine::start(LockAsync { lock: lock, result: result })
}

/// Attempt the lock once without going through the full retry coroutine,
/// returning a guard on success.
pub fn try_guard(lock: Arc<Lock>) -> Option<LockGuard> {
    if lock.try_lock() {
        Some(LockGuard::acquired(lock))
    } else {
        None
    }
}

#[allow(dead_code)]
pub(crate) fn unlocked_guard(lock: Arc<Lock>) -> LockGuard {
    LockGuard::unlocked(lock)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handle::CoroutineHandle;

    #[test]
    fn try_lock_then_unlock_round_trips_the_counter() {
        let lock = Lock::new();
        assert_eq!(lock.counter(), 0);
        assert!(lock.try_lock());
        assert_eq!(lock.counter(), 1);
        assert!(!lock.try_lock(), "a held lock must refuse a second try_lock");
        lock.unlock();
        assert_eq!(lock.counter(), 0);
    }

    #[test]
    fn try_guard_unlocks_on_drop() {
        let lock = Lock::new();
        {
            let guard = try_guard(lock.clone()).expect("lock was free");
            assert!(guard.owns_lock());
            assert!(!lock.try_lock(), "still held by the guard");
        }
        assert!(lock.try_lock(), "guard's Drop should have released it");
    }

    #[test]
    fn lock_async_inline_acquires_once_free() {
        let lock = Lock::new();
        assert!(lock.try_lock());

        let starter = lock_async_inline(lock.clone(), Action::Finish);
        let mut handle = CoroutineHandle::from_starter(starter);

        // The lock is held, so the acquiring coroutine parks rather than
        // finishing on its first step.
        handle.iterate_and_take_action();
        assert!(!handle.finished());

        lock.unlock();
        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 10);
        }
        // `next` was a bare `Action::Finish`, not `synchronize`'s
        // auto-releasing wrapper, so the coroutine finishes still holding
        // the lock it acquired.
        assert!(!lock.try_lock(), "lock_async_inline's caller owns releasing the lock");
        lock.unlock();
    }

    #[test]
    fn synchronize_releases_the_lock_once_the_body_finishes() {
        let lock = Lock::new();
        let body = crate::coroutine::start(NoopBody);
        let starter = synchronize(lock.clone(), body);
        let mut handle = CoroutineHandle::from_starter(starter);

        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 10, "synchronize must not leave a driver frame spinning forever");
        }
        assert!(lock.try_lock(), "synchronize should have released the lock on completion");
    }

    struct NoopBody;
    impl Coroutine for NoopBody {
        fn step(&mut self, _step: StepId) -> Action {
            Action::Finish
        }
    }

    #[test]
    fn lock_async_hands_back_an_owned_guard_once_free() {
        use crate::coroutine::with_result::ResultSlot;

        let lock = Lock::new();
        assert!(lock.try_lock());

        let result: ResultSlot<LockGuard> = ResultSlot::new();
        let starter = lock_async(lock.clone(), result.clone());
        let mut handle = CoroutineHandle::from_starter(starter);

        handle.iterate_and_take_action();
        assert!(!handle.finished(), "lock is held, so the coroutine should park first");
        assert!(result.take().is_none());

        lock.unlock();
        let mut rounds = 0;
        while !handle.finished() {
            handle.iterate_and_take_action();
            rounds += 1;
            assert!(rounds <= 10);
        }

        let guard = result.take().expect("lock_async should have produced a guard");
        assert!(guard.owns_lock());
    }
}
