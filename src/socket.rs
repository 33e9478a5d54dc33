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

//! The readiness primitive shared by every socket type in `net`: register a
//! `mio` event source once, then suspend the calling coroutine until it is
//! ready, times out, or the coroutine is cancelled.

use std::io;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Interest, Token};

use crate::coroutine::{self, Event, State};
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

/// Registers `source` with the current scheduler's reactor for the
/// lifetime of the returned `Readiness`, and lets callers suspend on it.
///
/// Registered once for both `READABLE` and `WRITABLE`: reregistering on
/// every call is unnecessary since a coroutine only ever waits for one
/// socket operation at a time, and a spurious wakeup for the direction it
/// didn't need just sends it back through its own retry loop.
pub(crate) struct Readiness {
    token: Token,
}

impl Readiness {
    pub(crate) fn register(source: &mut dyn Source) -> io::Result<Readiness> {
        let coro = coroutine::current_ptr();
        let sched = unsafe { &mut *(*coro).scheduler() };
        let token = sched.reserve_token(coro);
        sched
            .registry()
            .register(source, token, Interest::READABLE | Interest::WRITABLE)?;
        Ok(Readiness { token })
    }

    pub(crate) fn deregister(&self, source: &mut dyn Source) {
        if let Some(sched) = current_scheduler_if_alive() {
            let _ = sched.registry().deregister(source);
            sched.forget_token(self.token);
        }
    }

    /// Suspend the current coroutine until this socket becomes ready, its
    /// deadline (if any) passes, or it is cancelled. Cancellation unwinds
    /// the coroutine's stack from inside `coroutine::suspend` and never
    /// returns here.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> Event {
        let coro = coroutine::current_ptr();
        unsafe {
            let sched = (*coro).scheduler();
            (*coro).set_deadline(deadline);
            (*sched).park(coro);
        }
        let event = coroutine::suspend(State::Waiting);
        unsafe {
            let sched = (*coro).scheduler();
            (*sched).forget_token(self.token);
        }
        event
    }
}

fn current_scheduler_if_alive() -> Option<&'static mut Scheduler> {
    let coro = coroutine::current_ptr();
    if coro.is_null() {
        None
    } else {
        Some(Scheduler::current())
    }
}

/// Retry `op` against a non-blocking I/O source until it succeeds, the
/// deadline (if any) passes, or the peer hangs up. `op` should be exactly
/// the raw `std::io::{Read, Write}` call being retried.
pub(crate) fn retry_io<T>(
    readiness: &Readiness,
    deadline: Option<Instant>,
    mut op: impl FnMut() -> io::Result<T>,
) -> Result<T> {
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::Io(e)),
        }

        match readiness.wait(deadline) {
            Event::Readable | Event::Writable | Event::RwAble => continue,
            Event::Timeout => {
                return Err(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "socket operation timed out")))
            }
            Event::Hup => {
                return Err(Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "peer hung up")))
            }
            other => {
                log::warn!("socket wait woke with unexpected event {:?}", other);
                continue;
            }
        }
    }
}

/// An absolute deadline `millis` milliseconds from now, or `None` for no
/// deadline — the same convention `Coroutine::wait` uses.
pub(crate) fn deadline_from_millis(millis: Option<u64>) -> Option<Instant> {
    millis.map(|m| Instant::now() + Duration::from_millis(m))
}
