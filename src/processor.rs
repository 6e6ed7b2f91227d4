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

//! `Processor`: the per-thread submission funnel and ready queue that turns
//! `Action`s into scheduling decisions, plus `ProcessorWorker`, the thread
//! loop that drains it.
//!
//! Only the owning `ProcessorWorker` thread ever touches `ProcessorState`
//! (`ready`/`sleep_set`/`sleep_timed`); every other thread -- a waker on a
//! `WaitList`, a `TimerWorker` handing back an elapsed sleep, another
//! `Processor` round-robin-submitting work -- reaches the processor only
//! through the `crossbeam_channel` inbox, matching the "funnel" the data
//! model requires to keep those maps thread-confined.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace};

use crate::action::Action;
use crate::handle::{CoroutineHandle, HandleId, ProcessorLink};
use crate::worker::io::IoRouter;
use crate::worker::timer::TimerWorker;

/// Default number of handles a processor pulls off its ready queue per
/// `iterate()` call before yielding back to the worker loop, bounding how
/// long one round can take when the queue is long. Overridable via
/// `Options::batch_size`.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default ceiling `drain_inbox_blocking` ever waits with timed sleeps
/// pending, matching `worker::timer::DEFAULT_GRANULARITY`. Overridable via
/// `Options::timer_granularity`.
const DEFAULT_SLEEP_POLL: Duration = Duration::from_millis(50);

enum SubmissionItem {
    /// A brand-new task submitted via `Processor::execute`; needs an id and
    /// owner assigned before it can run.
    New(CoroutineHandle),
    /// A handle this processor already owns, handed back by a `TimerWorker`
    /// / I/O worker / another thread's `WaitList::notify_*` after parking
    /// elsewhere; already has id + owner bound.
    Resume(CoroutineHandle),
    /// A handle parked in *this* processor's own `sleep_set`/`sleep_timed`,
    /// identified by id since the caller (a `WaitList` on another thread)
    /// never had the handle itself.
    Wake(HandleId),
}

#[derive(Default)]
struct ProcessorState {
    ready: VecDeque<CoroutineHandle>,
    sleep_set: HashMap<HandleId, CoroutineHandle>,
    sleep_timed: HashMap<HandleId, (CoroutineHandle, Instant)>,
}

/// The cross-thread-visible half of a processor: the submission funnel and
/// task-count bookkeeping. Cheap to clone (it's an `Arc`) and safe to share
/// with `WaitList`s, other `Processor`s, and worker threads.
pub struct Processor {
    next_id: AtomicU64,
    inbox_tx: Sender<SubmissionItem>,
    /// Tasks submitted but not yet finished; drives `get_task_count()` and
    /// lets `wait_for_tasks()` block until it drops to zero.
    outstanding: AtomicI64,
    idle_mutex: std::sync::Mutex<()>,
    idle_cv: std::sync::Condvar,
    stopping: AtomicBool,
    timer: Arc<TimerWorker>,
    io: Arc<dyn IoRouter>,
}

impl Processor {
    /// `batch_size` and `sleep_poll` come from `Options::batch_size` and
    /// `Options::timer_granularity` (the former bounds one `iterate()`
    /// round, the latter how promptly a blocked worker notices a freshly
    /// matured `sleep_timed` entry).
    pub fn new(
        timer: Arc<TimerWorker>,
        io: Arc<dyn IoRouter>,
        batch_size: usize,
        sleep_poll: Duration,
    ) -> (Arc<Processor>, ProcessorWorker) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let processor = Arc::new(Processor {
            next_id: AtomicU64::new(1),
            inbox_tx: tx,
            outstanding: AtomicI64::new(0),
            idle_mutex: std::sync::Mutex::new(()),
            idle_cv: std::sync::Condvar::new(),
            stopping: AtomicBool::new(false),
            timer: timer,
            io: io,
        });
        let worker = ProcessorWorker {
            processor: processor.clone(),
            inbox_rx: rx,
            state: ProcessorState::default(),
            batch_size: batch_size,
            sleep_poll: sleep_poll,
        };
        (processor, worker)
    }

    /// Submit a freshly built coroutine chain. Thread-safe; may be called
    /// from any thread, including another `Processor`'s own worker thread
    /// (the many-to-many wiring `Executor::execute` round-robins over).
    pub fn execute(&self, mut handle: CoroutineHandle, owner: Arc<dyn ProcessorLink>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        handle.bind(id, owner);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let _ = self.inbox_tx.send(SubmissionItem::New(handle));
    }

    pub fn get_task_count(&self) -> i64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Block the calling thread until this processor has no outstanding
    /// tasks (ready, sleeping, or in flight at a sub-worker).
    pub fn wait_for_tasks(&self) {
        let mut guard = self.idle_mutex.lock().unwrap();
        while self.outstanding.load(Ordering::Acquire) > 0 {
            guard = self.idle_cv.wait(guard).unwrap();
        }
    }

    /// Ask the owning `ProcessorWorker` to exit once its queues drain.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.inbox_tx.send(SubmissionItem::Wake(0));
    }

    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_mutex.lock().unwrap();
            self.idle_cv.notify_all();
        }
    }
}

impl ProcessorLink for Processor {
    fn wake(&self, id: HandleId) {
        let _ = self.inbox_tx.send(SubmissionItem::Wake(id));
    }

    fn resume(&self, handle: CoroutineHandle) {
        let _ = self.inbox_tx.send(SubmissionItem::Resume(handle));
    }
}

/// Per-thread owner of one `Processor`'s mutable scheduling state. Spawned
/// and driven by `Executor`; `run()` is the body of that thread.
pub struct ProcessorWorker {
    processor: Arc<Processor>,
    inbox_rx: Receiver<SubmissionItem>,
    state: ProcessorState,
    batch_size: usize,
    sleep_poll: Duration,
}

impl ProcessorWorker {
    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Thread body: drain the inbox, mature any timed sleeps, run one batch
    /// of ready work, repeat. Returns once `stop()` was called and every
    /// queue is empty.
    pub fn run(&mut self) {
        loop {
            self.drain_inbox(true);
            self.mature_timeouts();

            if self.state.ready.is_empty() {
                if self.processor.stopping.load(Ordering::Acquire) && self.idle() {
                    debug!("processor worker stopping: queues drained");
                    return;
                }
                self.drain_inbox_blocking();
                continue;
            }

            self.iterate(self.batch_size);
        }
    }

    fn idle(&self) -> bool {
        self.state.ready.is_empty() && self.state.sleep_set.is_empty() && self.state.sleep_timed.is_empty()
    }

    /// Run up to `n` ready handles once each, routing the resulting action.
    /// Returns the number actually run (fewer than `n` if the queue ran
    /// dry), mirroring `Processor::iterate` from the data model.
    pub fn iterate(&mut self, n: usize) -> usize {
        let mut ran = 0;
        while ran < n {
            let mut handle = match self.state.ready.pop_front() {
                Some(h) => h,
                None => break,
            };
            ran += 1;
            let action = handle.iterate_and_take_action();
            self.route(handle, action);
        }
        ran
    }

    fn route(&mut self, handle: CoroutineHandle, action: Action) {
        if handle.finished() {
            trace!("coroutine {} finished", handle.id());
            self.processor.finish_one();
            return;
        }

        match action {
            Action::None | Action::Repeat | Action::YieldTo(_) => {
                self.state.ready.push_back(handle);
            }

            Action::WaitRepeat(deadline) => {
                self.processor.timer.schedule(handle, deadline);
            }

            Action::IoWait(io_handle, event) | Action::IoRepeat(io_handle, event) => {
                self.processor.io.register(handle, io_handle, event);
            }

            Action::WaitList(list) => {
                let id = handle.id();
                self.state.sleep_set.insert(id, handle);
                list.add(id, self.processor.clone());
            }

            Action::WaitListTimed(list, deadline) => {
                let id = handle.id();
                list.add(id, self.processor.clone());
                self.state.sleep_timed.insert(id, (handle, deadline));
            }

            Action::StartChildren(..) | Action::Finish | Action::Error(_) => {
                unreachable!("CoroutineHandle::take_action never returns this action kind")
            }
        }
    }

    fn mature_timeouts(&mut self) {
        if self.state.sleep_timed.is_empty() {
            return;
        }
        let now = Instant::now();
        let expired: Vec<HandleId> = self
            .state
            .sleep_timed
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((handle, _)) = self.state.sleep_timed.remove(&id) {
                self.state.ready.push_back(handle);
            }
        }
    }

    fn drain_inbox(&mut self, non_blocking: bool) {
        loop {
            let item = if non_blocking {
                match self.inbox_rx.try_recv() {
                    Ok(item) => item,
                    Err(_) => return,
                }
            } else {
                match self.inbox_rx.recv() {
                    Ok(item) => item,
                    Err(_) => return,
                }
            };
            self.apply(item);
            if non_blocking {
                continue;
            } else {
                return;
            }
        }
    }

    /// Block until at least one submission arrives or a short timeout
    /// passes (so timed sleeps still get a chance to mature even with an
    /// empty ready queue and a quiet inbox).
    fn drain_inbox_blocking(&mut self) {
        let timeout = self.next_timer_wait();
        match self.inbox_rx.recv_timeout(timeout) {
            Ok(item) => {
                self.apply(item);
                self.drain_inbox(true);
            }
            Err(_) => {}
        }
    }

    fn next_timer_wait(&self) -> Duration {
        let now = Instant::now();
        self.state
            .sleep_timed
            .values()
            .map(|(_, deadline)| deadline.saturating_duration_since(now))
            .min()
            .unwrap_or(self.sleep_poll)
            .min(self.sleep_poll)
    }

    fn apply(&mut self, item: SubmissionItem) {
        match item {
            SubmissionItem::New(handle) | SubmissionItem::Resume(handle) => {
                self.state.ready.push_back(handle);
            }
            SubmissionItem::Wake(id) => {
                if let Some(handle) = self.state.sleep_set.remove(&id) {
                    self.state.ready.push_back(handle);
                } else if let Some((handle, _)) = self.state.sleep_timed.remove(&id) {
                    self.state.ready.push_back(handle);
                }
                // id == 0 is the synthetic wake `stop()` sends purely to
                // unblock a parked `recv`; no matching handle is expected.
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::action::StepId;
    use crate::coroutine::Coroutine;
    use crate::handle::CoroutineHandle;
    use crate::worker::io::default_io_router;
    use std::sync::Mutex as StdMutex;
    use std::thread;

    fn test_processor() -> (Arc<Processor>, ProcessorWorker) {
        Processor::new(
            TimerWorker::spawn(crate::worker::timer::DEFAULT_GRANULARITY),
            default_io_router(),
            DEFAULT_BATCH_SIZE,
            DEFAULT_SLEEP_POLL,
        )
    }

    struct RecordOnce {
        label: u32,
        order: Arc<StdMutex<Vec<u32>>>,
    }
    impl Coroutine for RecordOnce {
        fn step(&mut self, _step: StepId) -> Action {
            self.order.lock().unwrap().push(self.label);
            Action::Finish
        }
    }

    #[test]
    fn two_never_parked_coroutines_run_in_submission_order() {
        let (processor, mut worker) = test_processor();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let owner: Arc<dyn ProcessorLink> = processor.clone();
        processor.execute(
            CoroutineHandle::new(Box::new(RecordOnce { label: 1, order: order.clone() })),
            owner.clone(),
        );
        processor.execute(
            CoroutineHandle::new(Box::new(RecordOnce { label: 2, order: order.clone() })),
            owner,
        );

        worker.drain_inbox(true);
        worker.iterate(10);

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert_eq!(processor.get_task_count(), 0);
    }

    struct ThreeStep {
        remaining: u32,
    }
    impl Coroutine for ThreeStep {
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
    fn stop_drains_outstanding_work_before_the_worker_thread_exits() {
        let (processor, mut worker) = test_processor();
        let owner: Arc<dyn ProcessorLink> = processor.clone();
        processor.execute(
            CoroutineHandle::new(Box::new(ThreeStep { remaining: 5 })),
            owner,
        );
        processor.stop();

        let handle = thread::spawn(move || worker.run());
        processor.wait_for_tasks();
        handle.join().unwrap();
        assert_eq!(processor.get_task_count(), 0);
    }

    #[test]
    fn execute_binds_an_id_before_the_worker_ever_sees_the_handle() {
        let (processor, mut worker) = test_processor();
        let owner: Arc<dyn ProcessorLink> = processor.clone();
        let handle = CoroutineHandle::new(Box::new(ThreeStep { remaining: 0 }));
        assert_eq!(handle.id(), 0, "unbound handles default to id 0");
        processor.execute(handle, owner);

        worker.drain_inbox(true);
        worker.iterate(1);
        assert_eq!(processor.get_task_count(), 0);
    }
}

