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

//! `Executor` tunables. `None` fields pick a sizing heuristic at build time
//! rather than a fixed default, the Rust analogue of the data model's `-1`
//! "auto" sentinel.

use std::time::Duration;

/// Which `IoRouter` backend new I/O workers are built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoWorkerType {
    /// Per-handle `poll(2)` fallback (`NaiveIoWorker`), regardless of what
    /// the platform natively offers.
    Naive,
    /// The best event-driven facility the target platform offers
    /// (`epoll` on Linux, `kqueue` on the BSDs/macOS), falling back to
    /// `Naive` only if that backend fails to initialize.
    EventDriven,
}

/// Executor construction options. Build one with [`crate::Builder`].
#[derive(Clone, Debug)]
pub struct Options {
    /// Number of `ProcessorWorker` threads. Defaults to the detected CPU
    /// count (via `num_cpus`) when `None`.
    pub processor_workers: Option<usize>,

    /// Number of I/O backend threads, wired to processors per the
    /// many-to-many rule in `Executor::with_options` (cycle workers across
    /// processors, cycle processors across workers, or attach every worker
    /// to every processor, depending on divisibility). Defaults to
    /// `max(1, processor_workers / 2)`.
    pub io_workers: Option<usize>,

    /// Number of `TimerWorker` threads. Each `Processor` is assigned one,
    /// round-robined the same way processors round-robin new submissions.
    /// Defaults to `1`.
    pub timer_workers: Option<usize>,

    /// Which backend new I/O workers use. Defaults to `EventDriven`.
    pub io_worker_type: Option<IoWorkerType>,

    /// How often a `TimerWorker` re-checks its heap for newly-scheduled
    /// entries while otherwise idle, and the matching ceiling a
    /// `ProcessorWorker` uses while waiting on its own timed sleeps.
    /// Defaults to 100ms.
    pub timer_granularity: Option<Duration>,

    /// Handles a `ProcessorWorker` pulls off its ready queue per `iterate()`
    /// call before yielding back to the worker loop, bounding how long one
    /// round can take when the queue is long. Defaults to `100`.
    pub batch_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            processor_workers: None,
            io_workers: None,
            timer_workers: None,
            io_worker_type: None,
            timer_granularity: None,
            batch_size: None,
        }
    }
}
