extern crate coroutine;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use coroutine::sync::lock::lock_async_inline;
use coroutine::{Action, Coroutine, CoroutineStarter, Executor, Lock, StepId};

const TASKS: usize = 2000;

/// Runs once the `Lock` is held: bump the shared counter, then release.
struct IncrementBody {
    lock: Arc<Lock>,
    counter: Arc<AtomicUsize>,
}

impl Coroutine for IncrementBody {
    fn step(&mut self, _step: StepId) -> Action {
        self.counter.fetch_add(1, Ordering::SeqCst);
        self.lock.unlock();
        Action::Finish
    }
}

fn increment_once(lock: Arc<Lock>, counter: Arc<AtomicUsize>) -> CoroutineStarter {
    let body = coroutine::coroutine::start(IncrementBody {
        lock: lock.clone(),
        counter: counter,
    });
    lock_async_inline(lock, body.next_action(Action::Finish))
}

fn main() {
    let executor = Executor::new();
    let lock = Lock::new();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASKS {
        executor.execute_starter(increment_once(lock.clone(), counter.clone()));
    }

    executor.wait_for_tasks();
    println!("counter = {} (expected {})", counter.load(Ordering::SeqCst), TASKS);
    executor.stop();
    executor.join();
}
