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

//! Runtime error kinds.
//!
//! A sum type stands in for the C++ original's exception class hierarchy:
//! `handle_error` pattern-matches on `kind()` rather than catching typed
//! exceptions.

use std::error::Error as StdError;
use std::fmt;

/// Broad classification of a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised by a coroutine step itself (the `Action::Error` path).
    Coroutine,
    /// A step panicked; trapped at the iteration boundary.
    StepPanic,
    /// An OS call (`epoll_ctl`, `kevent`, `eventfd`, ...) failed. Fatal to
    /// the worker thread that observed it.
    Os,
    /// A runtime invariant was violated by the caller (wrong-processor
    /// submission, negative Lock counter, unknown Action reaching a
    /// worker). Not recoverable; represents a programmer error.
    Invariant,
}

/// An error flowing through the coroutine runtime.
///
/// Carries a kind, a human-readable message, and an optional boxed source
/// for errors that wrap an underlying `std::error::Error`.
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Error {
        Error {
            kind: kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<S, E>(kind: ErrorKind, message: S, source: E) -> Error
        where S: Into<String>,
              E: StdError + Send + Sync + 'static
    {
        Error {
            kind: kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn coroutine<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::Coroutine, message)
    }

    pub fn invariant<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::Invariant, message)
    }

    pub fn os<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::Os, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|b| b.as_ref() as &(dyn StdError + 'static))
    }
}
