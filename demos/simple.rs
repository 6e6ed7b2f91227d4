extern crate coroutine;

use coroutine::{Action, Coroutine, Executor, StepId};

/// The coroutine analogue of the original synchronous "hello, then count"
/// demo: each `step()` call is one synchronous slice, and `YieldTo` plays
/// the role the old stackful `Coroutine::sched()` played.
struct Hello {
    step: u32,
}

const GREETED: StepId = 1;
const COUNTING: StepId = 2;

impl Coroutine for Hello {
    fn step(&mut self, step: StepId) -> Action {
        match step {
            0 => {
                println!("1. Hello in coroutine!");
                Action::yield_to(GREETED)
            }
            GREETED => {
                println!("2. We are back!");
                self.step = 0;
                Action::yield_to(COUNTING)
            }
            COUNTING => {
                if self.step < 5 {
                    println!("Counting {}", self.step);
                    self.step += 1;
                    Action::repeat()
                } else {
                    println!("3. Good bye");
                    Action::finish()
                }
            }
            _ => unreachable!(),
        }
    }
}

fn main() {
    let executor = Executor::new();
    executor.execute(Hello { step: 0 });
    executor.wait_for_tasks();
    executor.stop();
    executor.join();
}
