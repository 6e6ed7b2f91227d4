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

//! macOS/BSD `IoRouter` backend: `kqueue` with `EV_ONESHOT`, the BSD
//! counterpart of [`super::io_epoll`]'s `EPOLLONESHOT`.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::error;

use crate::action::{IoEventType, IoHandle};
use crate::handle::CoroutineHandle;
use crate::worker::io::IoRouter;

const MAX_EVENTS: usize = 256;
const WAIT: libc::timespec = libc::timespec { tv_sec: 1, tv_nsec: 0 };

struct Registration {
    handle: CoroutineHandle,
    fd: IoHandle,
    event: IoEventType,
}

pub struct KqueueIoWorker {
    tx: Sender<Registration>,
    kq: RawFd,
}

impl IoRouter for KqueueIoWorker {
    fn register(&self, handle: CoroutineHandle, io_handle: IoHandle, event: IoEventType) {
        let _ = self.tx.send(Registration { handle: handle, fd: io_handle, event: event });
    }
}

impl Drop for KqueueIoWorker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}

impl KqueueIoWorker {
    pub fn spawn() -> io::Result<Arc<dyn IoRouter>> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("coroutine-io-kqueue".to_string())
            .spawn(move || run(kq, rx))
            .expect("failed to spawn KqueueIoWorker thread");
        Ok(Arc::new(KqueueIoWorker { tx: tx, kq: kq }))
    }
}

fn filter_for(event: IoEventType) -> i16 {
    match event {
        IoEventType::Read => libc::EVFILT_READ,
        IoEventType::Write => libc::EVFILT_WRITE,
    }
}

fn run(kq: RawFd, rx: Receiver<Registration>) {
    let mut parked: HashMap<(RawFd, i16), CoroutineHandle> = HashMap::new();

    loop {
        while let Ok(reg) = rx.try_recv() {
            let filter = filter_for(reg.event);
            let mut kev: libc::kevent = unsafe { mem::zeroed() };
            kev.ident = reg.fd as usize;
            kev.filter = filter;
            kev.flags = libc::EV_ADD | libc::EV_ONESHOT;

            let rc = unsafe { libc::kevent(kq, &kev, 1, ptr::null_mut(), 0, ptr::null()) };
            if rc < 0 {
                error!("kevent registration failed for fd {}: {}", reg.fd, io::Error::last_os_error());
                let owner = reg.handle.owner();
                owner.resume(reg.handle);
                continue;
            }
            parked.insert((reg.fd, filter), reg.handle);
        }

        let mut out: [libc::kevent; MAX_EVENTS] = unsafe { mem::zeroed() };
        let n = unsafe { libc::kevent(kq, ptr::null(), 0, out.as_mut_ptr(), MAX_EVENTS as i32, &WAIT) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                error!("kevent wait failed: {}", err);
            }
            continue;
        }

        for ev in &out[..n as usize] {
            let key = (ev.ident as RawFd, ev.filter);
            if let Some(handle) = parked.remove(&key) {
                let owner = handle.owner();
                owner.resume(handle);
            }
        }
    }
}
