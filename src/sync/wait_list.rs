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

//! A parked-coroutine set with notifier hooks.
//!
//! Grounded on `oatpp::async::CoroutineWaitList` (the shipping version,
//! `unordered_set`-backed — the older duplicate in `core/async/` uses
//! `std::set` and is not the one this follows). The listener callback is
//! invoked *after* releasing the internal lock, closing the race between
//! "check predicate, release lock, park" and a concurrent "set value,
//! notify": Lock and ConditionVariable both install a listener that
//! notifies immediately if the guarded condition already flipped true
//! before the parking coroutine's `add` call landed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::handle::{HandleId, ProcessorLink};

/// A parked coroutine, identified by id plus a link back to its owning
/// Processor (the handle itself lives in that Processor's sleep set, not
/// here — a wait-list is a non-owning index).
struct Parked {
    id: HandleId,
    owner: Arc<dyn ProcessorLink>,
}

type Listener = dyn Fn(&WaitList) + Send + Sync;

struct Inner {
    parked: VecDeque<Parked>,
}

/// Set of coroutines parked on some condition, FIFO for `notify_first`.
pub struct WaitList {
    inner: Mutex<Inner>,
    listener: Option<Box<Listener>>,
}

/// Shared handle to a `WaitList`; this is what an `Action::WaitList`
/// carries, since the list must outlive any single park/notify call and is
/// typically owned by the Lock/ConditionVariable/Future built on top of it.
pub type WaitListHandle = Arc<WaitList>;

impl WaitList {
    pub fn new() -> WaitListHandle {
        Arc::new(WaitList {
            inner: Mutex::new(Inner { parked: VecDeque::new() }),
            listener: None,
        })
    }

    /// As `new`, but installs a listener invoked (outside the lock)
    /// whenever a coroutine parks.
    pub fn with_listener<F>(listener: F) -> WaitListHandle
        where F: Fn(&WaitList) + Send + Sync + 'static
    {
        Arc::new(WaitList {
            inner: Mutex::new(Inner { parked: VecDeque::new() }),
            listener: Some(Box::new(listener)),
        })
    }

    pub(crate) fn add(&self, id: HandleId, owner: Arc<dyn ProcessorLink>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.parked.push_back(Parked { id: id, owner: owner });
        }
        if let Some(ref listener) = self.listener {
            listener(self);
        }
    }

    /// Remove one parked coroutine, if any, and wake it. Returns whether a
    /// coroutine was woken.
    pub fn notify_first(&self) -> bool {
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            inner.parked.pop_front()
        };
        match entry {
            Some(p) => {
                p.owner.wake(p.id);
                true
            }
            None => false,
        }
    }

    /// Remove and wake every parked coroutine.
    pub fn notify_all(&self) {
        let drained: Vec<Parked> = {
            let mut inner = self.inner.lock().unwrap();
            inner.parked.drain(..).collect()
        };
        for p in drained {
            p.owner.wake(p.id);
        }
    }

    /// Remove a parked coroutine without waking it. Used by the Processor's
    /// sleep-check thread when a timed wait's deadline passes before a
    /// notify arrives; the processor wakes the handle itself afterward.
    pub(crate) fn forget(&self, id: HandleId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.parked.iter().position(|p| p.id == id) {
            inner.parked.remove(pos);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().parked.is_empty()
    }
}

impl Drop for WaitList {
    fn drop(&mut self) {
        self.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingLink {
        woken: StdMutex<Vec<HandleId>>,
    }
    impl ProcessorLink for RecordingLink {
        fn wake(&self, id: HandleId) {
            self.woken.lock().unwrap().push(id);
        }
        fn resume(&self, _handle: crate::handle::CoroutineHandle) {
            unreachable!("wait_list tests never hand back a whole handle");
        }
    }

    #[test]
    fn notify_first_wakes_in_fifo_order() {
        let list = WaitList::new();
        let link: Arc<RecordingLink> = Arc::new(RecordingLink { woken: StdMutex::new(Vec::new()) });
        list.add(1, link.clone());
        list.add(2, link.clone());
        list.add(3, link.clone());

        assert!(list.notify_first());
        assert!(list.notify_first());
        assert_eq!(*link.woken.lock().unwrap(), vec![1, 2]);
        assert!(!list.is_empty());

        assert!(list.notify_first());
        assert!(!list.notify_first());
        assert_eq!(*link.woken.lock().unwrap(), vec![1, 2, 3]);
        assert!(list.is_empty());
    }

    #[test]
    fn notify_all_wakes_every_parked_handle_exactly_once() {
        let list = WaitList::new();
        let link: Arc<RecordingLink> = Arc::new(RecordingLink { woken: StdMutex::new(Vec::new()) });
        for id in 1..=5 {
            list.add(id, link.clone());
        }
        list.notify_all();
        assert_eq!(link.woken.lock().unwrap().len(), 5);
        assert!(list.is_empty());
        // A second notify_all on an already-empty list wakes no one again.
        list.notify_all();
        assert_eq!(link.woken.lock().unwrap().len(), 5);
    }

    #[test]
    fn forget_removes_without_waking() {
        let list = WaitList::new();
        let link: Arc<RecordingLink> = Arc::new(RecordingLink { woken: StdMutex::new(Vec::new()) });
        list.add(1, link.clone());
        list.forget(1);
        assert!(list.is_empty());
        assert!(link.woken.lock().unwrap().is_empty());
    }

    #[test]
    fn listener_runs_on_every_add() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls_for_listener = calls.clone();
        let list = WaitList::with_listener(move |_list| {
            calls_for_listener.fetch_add(1, Ordering::SeqCst);
        });
        let link: Arc<RecordingLink> = Arc::new(RecordingLink { woken: StdMutex::new(Vec::new()) });
        list.add(1, link.clone());
        list.add(2, link);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
