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

//! Linux `IoRouter` backend: edge-triggered, one-shot `epoll`, matching the
//! original runtime's `EPOLLET | EPOLLONESHOT` registration. Also probes for
//! `EPOLLEXCLUSIVE` on first use and carries it on every subsequent
//! registration once the probe succeeds, falling back silently to plain
//! `EPOLLONESHOT|EPOLLET` if the kernel rejects it with `EINVAL` (pre-4.5
//! kernels, or a flag the target's `libc` doesn't define).

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::error;

use crate::action::{IoEventType, IoHandle};
use crate::handle::CoroutineHandle;
use crate::worker::io::IoRouter;

const MAX_EVENTS: usize = 256;
const WAIT_MS: i32 = 1000;

struct Registration {
    handle: CoroutineHandle,
    fd: IoHandle,
    event: IoEventType,
}

pub struct EpollIoWorker {
    tx: Sender<Registration>,
    epfd: RawFd,
}

impl IoRouter for EpollIoWorker {
    fn register(&self, handle: CoroutineHandle, io_handle: IoHandle, event: IoEventType) {
        let _ = self.tx.send(Registration { handle: handle, fd: io_handle, event: event });
    }
}

impl Drop for EpollIoWorker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

impl EpollIoWorker {
    pub fn spawn() -> io::Result<Arc<dyn IoRouter>> {
        let epfd = unsafe { libc::epoll_create1(0) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("coroutine-io-epoll".to_string())
            .spawn(move || run(epfd, rx))
            .expect("failed to spawn EpollIoWorker thread");
        Ok(Arc::new(EpollIoWorker { tx: tx, epfd: epfd }))
    }
}

fn event_bits(event: IoEventType) -> u32 {
    match event {
        IoEventType::Read => libc::EPOLLIN as u32,
        IoEventType::Write => libc::EPOLLOUT as u32,
    }
}

fn run(epfd: RawFd, rx: Receiver<Registration>) {
    let mut parked: HashMap<RawFd, CoroutineHandle> = HashMap::new();
    let mut events: Vec<libc::epoll_event> = vec![unsafe { mem::zeroed() }; MAX_EVENTS];
    // Probed once against the live kernel on this epoll instance's first
    // registration, then reused: avoids re-probing (and re-logging) on
    // every single fd this worker ever registers.
    let mut exclusive_supported = true;

    loop {
        while let Ok(reg) = rx.try_recv() {
            let base_bits = event_bits(reg.event) | libc::EPOLLONESHOT as u32 | libc::EPOLLET as u32;
            let bits = if exclusive_supported {
                base_bits | libc::EPOLLEXCLUSIVE as u32
            } else {
                base_bits
            };
            let mut ev = libc::epoll_event { events: bits, u64: reg.fd as u64 };
            let mut rc = unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, reg.fd, &mut ev) };

            if rc < 0 && exclusive_supported && io::Error::last_os_error().raw_os_error() == Some(libc::EINVAL) {
                exclusive_supported = false;
                ev.events = base_bits;
                rc = unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, reg.fd, &mut ev) };
            }
            if rc < 0 {
                // Already registered from a previous one-shot firing; rearm.
                rc = unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_MOD, reg.fd, &mut ev) };
            }
            if rc < 0 {
                error!("epoll_ctl failed for fd {}: {}", reg.fd, io::Error::last_os_error());
                let owner = reg.handle.owner();
                owner.resume(reg.handle);
                continue;
            }
            parked.insert(reg.fd, reg.handle);
        }

        let n = unsafe { libc::epoll_wait(epfd, events.as_mut_ptr(), events.len() as i32, WAIT_MS) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                error!("epoll_wait failed: {}", err);
            }
            continue;
        }

        for event in &events[..n as usize] {
            let fd = event.u64 as RawFd;
            if let Some(handle) = parked.remove(&fd) {
                let owner = handle.owner();
                owner.resume(handle);
            }
        }
    }
}
