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

//! A stackful coroutine scheduler with integrated event-driven I/O and a
//! blocking-work offload pool.
//!
//! Application code writes apparently synchronous routines — accept a
//! connection, read, compute, write — and the [`Scheduler`] multiplexes
//! them over a single OS thread, suspending on I/O readiness, timers,
//! joins, or condition variables, and handing CPU-bound sections off to a
//! shared [`compute`] pool so the scheduler's own thread is never blocked.
//!
//! ```ignore
//! let mut sched = coros::Scheduler::new().unwrap();
//! coros::Coroutine::spawn(&sched, || {
//!     println!("hello from a coroutine");
//! });
//! sched.run();
//! ```

pub use crate::builder::Builder;
pub use crate::coroutine::{Condition, Coroutine, Event, Handle, Id, State};
pub use crate::error::{Error, Result};
pub use crate::net::{TcpListener, TcpStream, UdpSocket};
pub use crate::scheduler::Scheduler;

mod builder;
mod compute;
mod context;
mod coroutine;
mod error;
pub mod net;
mod options;
mod scheduler;
mod socket;
mod stack;

#[cfg(test)]
mod tests;
