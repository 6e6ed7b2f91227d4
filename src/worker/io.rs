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

//! `IoRouter`: what a `Processor` hands `Action::IoWait`/`IoRepeat` to.
//! Implemented by an edge-triggered, one-shot backend where the OS offers
//! one (`epoll` on Linux, `kqueue` on the BSDs/macOS) and by
//! [`naive::NaiveIoWorker`] (`libc::poll`) everywhere else, mirroring the
//! original runtime's per-platform `IOEventWorker` specializations plus its
//! portable fallback.

use std::sync::Arc;

use crate::action::IoEventType;
use crate::action::IoHandle;
use crate::handle::CoroutineHandle;

pub trait IoRouter: Send + Sync {
    /// Register interest in `event` on `io_handle` on behalf of `handle`,
    /// which parked with `Action::IoWait`/`IoRepeat`. The router resumes
    /// the handle (via its own `ProcessorLink`) once the OS reports
    /// readiness.
    fn register(&self, handle: CoroutineHandle, io_handle: IoHandle, event: IoEventType);
}

/// Build the best I/O backend available on this platform, falling back to
/// [`naive::NaiveIoWorker`] if the native one fails to initialize (e.g. the
/// process is sandboxed away from `epoll_create1`).
pub fn default_io_router() -> Arc<dyn IoRouter> {
    #[cfg(target_os = "linux")]
    {
        match crate::worker::io_epoll::EpollIoWorker::spawn() {
            Ok(worker) => return worker,
            Err(err) => {
                log::error!("epoll unavailable ({}), falling back to poll()-based I/O worker", err);
            }
        }
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    {
        match crate::worker::io_kqueue::KqueueIoWorker::spawn() {
            Ok(worker) => return worker,
            Err(err) => {
                log::error!("kqueue unavailable ({}), falling back to poll()-based I/O worker", err);
            }
        }
    }

    crate::worker::io_naive::NaiveIoWorker::spawn()
}
