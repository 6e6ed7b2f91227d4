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

//! `Executor`: the top-level handle users spawn coroutines through. Owns a
//! pool of `Processor`s (one `ProcessorWorker` thread each), one or more
//! `TimerWorker`s, and one or more `IoRouter` backends, wired to processors
//! per the many-to-many rule described on [`wire_io_routers`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::action::{CoroutineStarter, IoEventType, IoHandle};
use crate::coroutine::{self, Coroutine};
use crate::handle::CoroutineHandle;
use crate::options::{IoWorkerType, Options};
use crate::processor::{Processor, ProcessorWorker, DEFAULT_BATCH_SIZE};
use crate::worker::io::{default_io_router, IoRouter};
use crate::worker::io_naive::NaiveIoWorker;
use crate::worker::timer::{TimerWorker, DEFAULT_GRANULARITY};

/// Round-robins I/O registrations across several backend instances, used
/// when a processor is wired to more than one worker under
/// [`wire_io_routers`]'s "cycle processors across workers" or "attach every
/// worker to every processor" modes.
struct MultiIoRouter {
    routers: Vec<Arc<dyn IoRouter>>,
    next: AtomicUsize,
}

impl IoRouter for MultiIoRouter {
    fn register(&self, handle: CoroutineHandle, io_handle: IoHandle, event: IoEventType) {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.routers.len();
        self.routers[i].register(handle, io_handle, event);
    }
}

/// The coroutine runtime: a pool of processor threads plus the timer and
/// I/O sub-workers they share.
pub struct Executor {
    processors: Vec<Arc<Processor>>,
    threads: Vec<JoinHandle<()>>,
    next_processor: AtomicUsize,
}

impl Executor {
    /// Build an `Executor` with default sizing (one processor worker per
    /// detected CPU, `max(1, processor_workers / 2)` I/O workers, one timer
    /// worker).
    pub fn new() -> Executor {
        Executor::with_options(Options::default())
    }

    pub fn with_options(opts: Options) -> Executor {
        let processor_workers = opts.processor_workers.unwrap_or_else(num_cpus::get).max(1);
        let io_workers = opts
            .io_workers
            .unwrap_or_else(|| (processor_workers / 2).max(1))
            .max(1);
        let timer_workers = opts.timer_workers.unwrap_or(1).max(1);
        let worker_type = opts.io_worker_type.unwrap_or(IoWorkerType::EventDriven);
        let granularity = opts.timer_granularity.unwrap_or(DEFAULT_GRANULARITY);
        let batch_size = opts.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);

        let timers: Vec<Arc<TimerWorker>> =
            (0..timer_workers).map(|_| TimerWorker::spawn(granularity)).collect();
        let io_routers: Vec<Arc<dyn IoRouter>> =
            (0..io_workers).map(|_| spawn_io_router(worker_type)).collect();
        let per_processor_io = wire_io_routers(processor_workers, io_routers);

        let mut processors = Vec::with_capacity(processor_workers);
        let mut threads = Vec::with_capacity(processor_workers);

        for (i, io) in per_processor_io.into_iter().enumerate() {
            let timer = timers[i % timers.len()].clone();
            let (processor, worker) = Processor::new(timer, io, batch_size, granularity);
            let mut worker = worker;
            let thread = thread::Builder::new()
                .name(format!("coroutine-processor-{}", i))
                .spawn(move || worker.run())
                .expect("failed to spawn ProcessorWorker thread");
            processors.push(processor);
            threads.push(thread);
        }

        Executor {
            processors: processors,
            threads: threads,
            next_processor: AtomicUsize::new(0),
        }
    }

    /// Start a single coroutine, round-robining which processor it lands on.
    pub fn execute<T: Coroutine>(&self, coroutine: T) {
        self.execute_starter(coroutine::start(coroutine));
    }

    /// Start a (possibly chained) `CoroutineStarter`, round-robining which
    /// processor it lands on.
    pub fn execute_starter(&self, starter: CoroutineStarter) {
        let handle = CoroutineHandle::from_starter(starter);
        let i = self.next_processor.fetch_add(1, Ordering::Relaxed) % self.processors.len();
        let processor = self.processors[i].clone();
        let owner = processor.clone() as Arc<dyn crate::handle::ProcessorLink>;
        processor.execute(handle, owner);
    }

    /// Total tasks outstanding across every processor (ready, sleeping, or
    /// parked at a sub-worker).
    pub fn task_count(&self) -> i64 {
        self.processors.iter().map(|p| p.get_task_count()).sum()
    }

    /// Block the calling thread until every processor has drained.
    pub fn wait_for_tasks(&self) {
        for processor in &self.processors {
            processor.wait_for_tasks();
        }
    }

    /// Ask every processor worker to exit once its queues drain. Does not
    /// join the threads; call `join()` afterwards if that's needed.
    pub fn stop(&self) {
        for processor in &self.processors {
            processor.stop();
        }
    }

    /// Join every processor worker thread. Intended to be called after
    /// `stop()`.
    pub fn join(self) {
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

impl Default for Executor {
    fn default() -> Executor {
        Executor::new()
    }
}

fn spawn_io_router(worker_type: IoWorkerType) -> Arc<dyn IoRouter> {
    match worker_type {
        IoWorkerType::Naive => NaiveIoWorker::spawn(),
        IoWorkerType::EventDriven => default_io_router(),
    }
}

/// Wire `processor_count` processors to `routers`, implementing the
/// many-to-many attachment rule: if processors outnumber workers and divide
/// evenly, cycle workers across processors (each processor gets exactly one,
/// several processors sharing each worker); if workers outnumber processors
/// and divide evenly, cycle processors across workers (each processor gets
/// an even, disjoint slice of the workers, round-robined internally);
/// otherwise attach every worker to every processor. Returns one
/// `Arc<dyn IoRouter>` per processor, in processor order.
fn wire_io_routers(processor_count: usize, routers: Vec<Arc<dyn IoRouter>>) -> Vec<Arc<dyn IoRouter>> {
    let worker_count = routers.len();

    if worker_count == 1 {
        return (0..processor_count).map(|_| routers[0].clone()).collect();
    }

    if processor_count > worker_count && processor_count % worker_count == 0 {
        (0..processor_count).map(|p| routers[p % worker_count].clone()).collect()
    } else if worker_count > processor_count && worker_count % processor_count == 0 {
        let group_size = worker_count / processor_count;
        (0..processor_count)
            .map(|p| {
                let group = routers[p * group_size..(p + 1) * group_size].to_vec();
                multi_router(group)
            })
            .collect()
    } else {
        (0..processor_count).map(|_| multi_router(routers.clone())).collect()
    }
}

fn multi_router(routers: Vec<Arc<dyn IoRouter>>) -> Arc<dyn IoRouter> {
    if routers.len() == 1 {
        return routers[0].clone();
    }
    Arc::new(MultiIoRouter {
        routers: routers,
        next: AtomicUsize::new(0),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    struct CountingRouter;
    impl IoRouter for CountingRouter {
        fn register(&self, _handle: CoroutineHandle, _io_handle: IoHandle, _event: IoEventType) {}
    }

    fn routers(n: usize) -> Vec<Arc<dyn IoRouter>> {
        (0..n).map(|_| Arc::new(CountingRouter) as Arc<dyn IoRouter>).collect()
    }

    #[test]
    fn wiring_returns_one_router_per_processor() {
        assert_eq!(wire_io_routers(4, routers(2)).len(), 4);
        assert_eq!(wire_io_routers(2, routers(4)).len(), 2);
        assert_eq!(wire_io_routers(3, routers(2)).len(), 3);
    }

    #[test]
    fn cycles_workers_across_processors_when_processors_divide_evenly() {
        let routers = routers(2);
        let wired = wire_io_routers(4, routers.clone());
        assert!(Arc::ptr_eq(&wired[0], &routers[0]));
        assert!(Arc::ptr_eq(&wired[1], &routers[1]));
        assert!(Arc::ptr_eq(&wired[2], &routers[0]));
        assert!(Arc::ptr_eq(&wired[3], &routers[1]));
    }

    #[test]
    fn attaches_every_worker_to_every_processor_when_neither_divides_evenly() {
        let original = routers(2);
        let wired = wire_io_routers(3, original.clone());
        for router in &wired {
            // Every processor's assigned router must be a `MultiIoRouter`
            // fanning out across both workers, not a bare single original.
            assert!(!Arc::ptr_eq(router, &original[0]));
            assert!(!Arc::ptr_eq(router, &original[1]));
        }
    }

    #[test]
    fn unset_io_workers_defaults_to_half_the_processor_count() {
        let opts = Options { processor_workers: Some(4), ..Default::default() };
        let io_workers = opts.io_workers.unwrap_or_else(|| (opts.processor_workers.unwrap() / 2).max(1));
        assert_eq!(io_workers, 2);

        let executor = Executor::with_options(opts);
        assert_eq!(executor.processors.len(), 4);
        executor.stop();
    }
}
