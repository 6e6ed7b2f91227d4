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

use std::time::Duration;

use crate::executor::Executor;
use crate::options::{IoWorkerType, Options};

/// Executor configuration. Provides detailed control over the number of
/// processor, I/O, and timer worker threads an `Executor` starts up with,
/// plus the I/O backend choice, timer granularity, and scheduling batch
/// size.
///
/// ```ignore
/// let executor = Builder::new().processor_workers(4)
///                               .io_workers(1)
///                               .build();
/// ```
pub struct Builder {
    opts: Options,
}

impl Builder {
    /// Generate the base configuration for an `Executor`, from which
    /// configuration methods can be chained.
    pub fn new() -> Builder {
        Builder {
            opts: Default::default(),
        }
    }

    /// Set the number of `ProcessorWorker` threads. Defaults to the
    /// detected CPU count when unset.
    pub fn processor_workers(mut self, count: usize) -> Builder {
        self.opts.processor_workers = Some(count);
        self
    }

    /// Set the number of I/O backend threads, wired to processors per the
    /// many-to-many rule in `Executor::with_options`. Defaults to
    /// `max(1, processor_workers / 2)` when unset.
    pub fn io_workers(mut self, count: usize) -> Builder {
        self.opts.io_workers = Some(count);
        self
    }

    /// Set the number of `TimerWorker` threads. Defaults to `1` when unset.
    pub fn timer_workers(mut self, count: usize) -> Builder {
        self.opts.timer_workers = Some(count);
        self
    }

    /// Force a particular I/O backend rather than letting each worker
    /// auto-detect the best one the platform offers.
    pub fn io_worker_type(mut self, worker_type: IoWorkerType) -> Builder {
        self.opts.io_worker_type = Some(worker_type);
        self
    }

    /// Set how often a `TimerWorker` re-checks for newly-scheduled entries
    /// while idle. Defaults to 100ms when unset.
    pub fn timer_granularity(mut self, granularity: Duration) -> Builder {
        self.opts.timer_granularity = Some(granularity);
        self
    }

    /// Set how many ready handles a `ProcessorWorker` runs per `iterate()`
    /// call before yielding back to its loop. Defaults to `100` when unset.
    pub fn batch_size(mut self, size: usize) -> Builder {
        self.opts.batch_size = Some(size);
        self
    }

    /// Build and start the `Executor`: spawns the timer worker(s), the I/O
    /// worker(s), and every processor worker thread.
    pub fn build(self) -> Executor {
        Executor::with_options(self.opts)
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builder_defaults_build_a_running_executor() {
        let executor = Builder::new().processor_workers(2).io_workers(1).build();
        assert_eq!(executor.task_count(), 0);
        executor.stop();
    }

    #[test]
    fn test_builder_threads_every_tunable_through_to_a_running_executor() {
        let executor = Builder::new()
            .processor_workers(2)
            .io_workers(2)
            .timer_workers(2)
            .io_worker_type(IoWorkerType::Naive)
            .timer_granularity(Duration::from_millis(10))
            .batch_size(8)
            .build();
        assert_eq!(executor.task_count(), 0);
        executor.stop();
    }
}
