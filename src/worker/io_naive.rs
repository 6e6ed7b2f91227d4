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

//! Portable `IoRouter` fallback built on `libc::poll`, used on platforms
//! without a native edge-triggered backend (or if one fails to init). Less
//! scalable than `epoll`/`kqueue` -- every `poll()` call re-scans the whole
//! registered set -- but correct everywhere `poll(2)` exists.
//!
//! The only backend with a best-effort `abort_coroutine`: since every parked
//! fd already lives in a plain, periodically-rescanned `Vec` rather than
//! being handed to the kernel's own readiness machinery, a pending
//! registration can simply be flagged and resumed on the worker's own next
//! pass, with no interrupted syscall to reason about. The same Vec-of-fds
//! design is also why this backend can cheaply promote a handle that has
//! waited past `STALE_TIMEOUT` without becoming ready -- it's resumed and
//! left to the coroutine to decide whether to re-register.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::error;

use crate::action::{IoEventType, IoHandle};
use crate::handle::CoroutineHandle;
use crate::worker::io::IoRouter;

/// Re-run `poll()` at least this often even with no new registrations, so
/// a parked fd isn't starved by a stale timeout calculation.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A handle parked this long without its fd ever reporting ready is
/// resumed anyway, giving the coroutine a chance to re-evaluate and
/// re-register rather than staying parked on what may be a dead fd.
/// Best-effort liveness only, not a readiness guarantee.
const STALE_TIMEOUT: Duration = Duration::from_secs(1);

struct Registration {
    handle: CoroutineHandle,
    fd: IoHandle,
    event: IoEventType,
    registered_at: Instant,
}

pub struct NaiveIoWorker {
    tx: Sender<Registration>,
    aborted: Arc<Mutex<HashSet<IoHandle>>>,
}

impl IoRouter for NaiveIoWorker {
    fn register(&self, handle: CoroutineHandle, io_handle: IoHandle, event: IoEventType) {
        let reg = Registration {
            handle: handle,
            fd: io_handle,
            event: event,
            registered_at: Instant::now(),
        };
        let _ = self.tx.send(reg);
    }
}

impl NaiveIoWorker {
    pub fn spawn() -> Arc<dyn IoRouter> {
        Self::spawn_naive() as Arc<dyn IoRouter>
    }

    /// Like `spawn`, but keeps the concrete type so `abort_coroutine` stays
    /// reachable -- it isn't part of the `IoRouter` trait, since no other
    /// backend implements it.
    pub fn spawn_naive() -> Arc<NaiveIoWorker> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let aborted = Arc::new(Mutex::new(HashSet::new()));
        let run_aborted = aborted.clone();
        thread::Builder::new()
            .name("coroutine-io-naive".to_string())
            .spawn(move || run(rx, run_aborted))
            .expect("failed to spawn NaiveIoWorker thread");
        Arc::new(NaiveIoWorker { tx: tx, aborted: aborted })
    }

    /// Best-effort stop: flags `io_handle` so the next poll pass resumes
    /// whatever coroutine is parked on it, readiness notwithstanding. Not
    /// guaranteed to run before that coroutine would have woken up on its
    /// own, and a no-op if nothing is (or ever gets) registered for it.
    pub fn abort_coroutine(&self, io_handle: IoHandle) {
        self.aborted.lock().unwrap().insert(io_handle);
    }
}

fn event_bits(event: IoEventType) -> i16 {
    match event {
        IoEventType::Read => libc::POLLIN,
        IoEventType::Write => libc::POLLOUT,
    }
}

fn run(rx: Receiver<Registration>, aborted: Arc<Mutex<HashSet<IoHandle>>>) {
    let mut parked: Vec<Registration> = Vec::new();

    loop {
        while let Ok(reg) = rx.try_recv() {
            parked.push(reg);
        }

        if parked.is_empty() {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(reg) => parked.push(reg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        if !parked.is_empty() {
            let mut flagged = aborted.lock().unwrap();
            if !flagged.is_empty() {
                let mut remaining = Vec::with_capacity(parked.len());
                for reg in parked.into_iter() {
                    if flagged.remove(&reg.fd) {
                        let owner = reg.handle.owner();
                        owner.resume(reg.handle);
                    } else {
                        remaining.push(reg);
                    }
                }
                parked = remaining;
            }
        }

        if parked.is_empty() {
            continue;
        }

        let mut pollfds: Vec<libc::pollfd> = parked
            .iter()
            .map(|r| libc::pollfd {
                fd: r.fd,
                events: event_bits(r.event),
                revents: 0,
            })
            .collect();

        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                POLL_INTERVAL.as_millis() as libc::c_int,
            )
        };

        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                error!("poll() failed: {}", err);
            }
            continue;
        }

        let now = Instant::now();
        if rc == 0 {
            parked = promote_stale(parked, now);
            continue;
        }

        let mut remaining = Vec::with_capacity(parked.len());
        for (reg, pfd) in parked.into_iter().zip(pollfds.into_iter()) {
            let ready = pfd.revents & (pfd.events | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0;
            if ready {
                let owner = reg.handle.owner();
                owner.resume(reg.handle);
            } else if now.duration_since(reg.registered_at) >= STALE_TIMEOUT {
                let owner = reg.handle.owner();
                owner.resume(reg.handle);
            } else {
                remaining.push(reg);
            }
        }
        parked = remaining;
    }
}

/// Resume every handle that has been parked past `STALE_TIMEOUT`, keeping
/// the rest. Used when a `poll()` pass times out with nothing ready.
fn promote_stale(parked: Vec<Registration>, now: Instant) -> Vec<Registration> {
    let mut remaining = Vec::with_capacity(parked.len());
    for reg in parked {
        if now.duration_since(reg.registered_at) >= STALE_TIMEOUT {
            let owner = reg.handle.owner();
            owner.resume(reg.handle);
        } else {
            remaining.push(reg);
        }
    }
    remaining
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::action::{Action, StepId};
    use crate::coroutine::Coroutine;
    use crate::handle::{CoroutineHandle, HandleId, ProcessorLink};
    use std::sync::mpsc;

    struct ResumeSignal {
        tx: std::sync::Mutex<mpsc::Sender<()>>,
    }
    impl ProcessorLink for ResumeSignal {
        fn wake(&self, _id: HandleId) {}
        fn resume(&self, _handle: CoroutineHandle) {
            let _ = self.tx.lock().unwrap().send(());
        }
    }

    struct Noop;
    impl Coroutine for Noop {
        fn step(&mut self, _step: StepId) -> Action {
            Action::Finish
        }
    }

    #[test]
    fn promote_stale_resumes_handles_parked_past_the_timeout_and_keeps_the_rest() {
        let (tx, rx) = mpsc::channel();
        let owner: Arc<dyn ProcessorLink> = Arc::new(ResumeSignal { tx: std::sync::Mutex::new(tx) });

        let mut stale = CoroutineHandle::new(Box::new(Noop));
        stale.bind(1, owner.clone());
        let mut fresh = CoroutineHandle::new(Box::new(Noop));
        fresh.bind(2, owner);

        let now = Instant::now();
        let parked = vec![
            Registration {
                handle: stale,
                fd: 0,
                event: IoEventType::Read,
                registered_at: now - STALE_TIMEOUT,
            },
            Registration {
                handle: fresh,
                fd: 1,
                event: IoEventType::Read,
                registered_at: now,
            },
        ];

        let remaining = promote_stale(parked, now);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].fd, 1);
        rx.recv_timeout(Duration::from_secs(1))
            .expect("handle parked past STALE_TIMEOUT should have been resumed");
    }

    #[test]
    fn abort_coroutine_resumes_a_fd_that_never_becomes_ready() {
        let worker = NaiveIoWorker::spawn_naive();
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, _write_fd) = (fds[0], fds[1]);

        let (tx, rx) = mpsc::channel();
        let owner: Arc<dyn ProcessorLink> = Arc::new(ResumeSignal { tx: std::sync::Mutex::new(tx) });
        let mut handle = CoroutineHandle::new(Box::new(Noop));
        handle.bind(1, owner);

        worker.register(handle, read_fd, IoEventType::Read);
        // Nothing was ever written to the pipe, so without an abort this
        // would hang until the test's own timeout kills it.
        worker.abort_coroutine(read_fd);

        rx.recv_timeout(Duration::from_secs(5))
            .expect("abort_coroutine should have resumed the parked handle");

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
