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

//! `TimerWorker`: one thread consolidating every `Action::WaitRepeat` sleep
//! across all `Processor`s, so N processors don't each need their own
//! polling thread for time-based waits.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::error;

use crate::handle::CoroutineHandle;

/// Default ceiling on how long the timer thread ever sleeps with an empty
/// heap, so a newly-scheduled entry from a quiet period isn't delayed
/// indefinitely by a stale `recv_timeout` wakeup calculation. Overridable
/// via `Options::timer_granularity` (`TimerWorker::spawn`'s argument).
pub const DEFAULT_GRANULARITY: Duration = Duration::from_millis(100);

struct Entry {
    handle: CoroutineHandle,
    deadline: Instant,
}

pub struct TimerWorker {
    tx: Sender<Entry>,
}

impl TimerWorker {
    /// Spawn a timer thread that never sleeps past `granularity` with an
    /// empty heap, so a freshly-scheduled entry is noticed promptly even
    /// during an otherwise idle stretch.
    pub fn spawn(granularity: Duration) -> Arc<TimerWorker> {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("coroutine-timer".to_string())
            .spawn(move || run(rx, granularity))
            .expect("failed to spawn TimerWorker thread");
        Arc::new(TimerWorker { tx: tx })
    }

    /// Park `handle` until `deadline`, then hand it back to its own owning
    /// processor via `ProcessorLink::resume`.
    pub fn schedule(&self, handle: CoroutineHandle, deadline: Instant) {
        if self.tx.send(Entry { handle: handle, deadline: deadline }).is_err() {
            error!("TimerWorker thread is gone; dropping a scheduled wake");
        }
    }
}

fn run(rx: Receiver<Entry>, granularity: Duration) {
    let mut heap: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut payload: HashMap<u64, CoroutineHandle> = HashMap::new();
    let mut next_seq: u64 = 0;

    loop {
        let now = Instant::now();
        while let Some(&Reverse((deadline, seq))) = heap.peek() {
            if deadline > now {
                break;
            }
            heap.pop();
            if let Some(handle) = payload.remove(&seq) {
                let owner = handle.owner();
                owner.resume(handle);
            }
        }

        let wait = heap
            .peek()
            .map(|&Reverse((deadline, _))| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(granularity)
            .min(granularity);

        match rx.recv_timeout(wait) {
            Ok(entry) => {
                let seq = next_seq;
                next_seq += 1;
                heap.push(Reverse((entry.deadline, seq)));
                payload.insert(seq, entry.handle);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
