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

use std::fmt;
use std::io;

/// Result type used throughout the crate.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Kinds of failure the scheduler surfaces to callers.
#[derive(Debug)]
pub enum Error {
    /// A stack could not be mapped, or a socket could not be registered
    /// with the reactor; no coroutine runs as a result.
    StackAllocation(io::Error),

    /// A read, write, bind, connect, or poll registration failed.
    Io(io::Error),

    /// Surfaced by `Coroutine::join` bookkeeping when the joined coroutine
    /// is observed to have been cancelled rather than having returned.
    Cancelled,

    /// The coroutine body panicked; carries the `catch_unwind` payload.
    Panicked(Box<dyn std::any::Any + Send>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::StackAllocation(e) => write!(f, "failed to allocate coroutine stack: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Cancelled => write!(f, "coroutine was cancelled"),
            Error::Panicked(_) => write!(f, "coroutine panicked"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::StackAllocation(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Cancelled | Error::Panicked(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
