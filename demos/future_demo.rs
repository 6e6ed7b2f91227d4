extern crate coroutine;

use std::thread;
use std::time::Duration;

use coroutine::coroutine::with_result::ResultSlot;
use coroutine::{channel, Action, Coroutine, Error, Executor, StepId};

/// Waits on a `Future<u32>` and prints whatever it resolves to.
struct PrintWhenReady {
    future: coroutine::Future<u32>,
    result: ResultSlot<Result<u32, Error>>,
}

const CHECK: StepId = 1;

impl Coroutine for PrintWhenReady {
    fn step(&mut self, step: StepId) -> Action {
        match step {
            0 => {
                let starter = self.future.wait_async(self.result.clone());
                starter.next_action(Action::yield_to(CHECK))
            }
            CHECK => match self.result.take() {
                Some(Ok(value)) => {
                    println!("future resolved: {}", value);
                    Action::Finish
                }
                Some(Err(err)) => {
                    println!("future failed: {}", err);
                    Action::Finish
                }
                None => Action::repeat(),
            },
            _ => unreachable!(),
        }
    }
}

fn main() {
    let executor = Executor::new();
    let (promise, future) = channel::<u32>();

    executor.execute(PrintWhenReady {
        future: future,
        result: ResultSlot::new(),
    });

    thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        promise.set_value(42);
    });

    executor.wait_for_tasks();
    executor.stop();
    executor.join();
}
