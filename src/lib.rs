// Copyright 2013 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A stackless coroutine runtime: cooperative tasks that suspend by
//! returning an [`Action`] rather than by yielding a live stack frame.
//!
//! Grounded on the asynchronous core of a C++ web-server toolkit — its
//! `Coroutine`/`Action`/`Processor`/`Executor` stack, rebuilt around Rust's
//! ownership model rather than intrusive linked lists and raw pointers.
//! Start a coroutine with [`Executor::execute`]; synchronize several of them
//! with [`sync::Lock`], [`sync::ConditionVariable`], or [`sync::Future`].

pub mod action;
pub mod builder;
pub mod coroutine;
pub mod error;
pub mod executor;
pub mod handle;
pub mod options;
pub mod processor;
pub mod sync;
pub mod worker;

pub use crate::action::{Action, CoroutineStarter, IoEventType, IoHandle, StepId};
pub use crate::builder::Builder;
pub use crate::coroutine::Coroutine;
pub use crate::error::{Error, ErrorKind};
pub use crate::executor::Executor;
pub use crate::handle::{CoroutineHandle, HandleId};
pub use crate::options::{IoWorkerType, Options};
pub use crate::sync::{channel, ConditionVariable, Future, Lock, LockGuard, Promise, WaitList};
