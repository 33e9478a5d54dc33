// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

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

use crate::coroutine::Handle;
use crate::options::Options;
use crate::scheduler::Scheduler;

/// Coroutine configuration, providing detailed control over the stack size
/// and name of new coroutines.
///
/// ```ignore
/// let sched = Scheduler::new().unwrap();
/// Builder::new().name("worker #1".to_string())
///               .stack_size(4096)
///               .spawn(&sched, || println!("hello from a coroutine"));
/// ```
pub struct Builder {
    opts: Options,
}

impl Builder {
    /// Base configuration for spawning a coroutine, from which
    /// configuration methods can be chained.
    pub fn new() -> Builder {
        Builder { opts: Default::default() }
    }

    /// Name the coroutine-to-be. Currently used for identification only in
    /// log messages.
    pub fn name(mut self, name: String) -> Builder {
        self.opts.name = Some(name);
        self
    }

    /// Set the size of the stack for the new coroutine.
    pub fn stack_size(mut self, size: usize) -> Builder {
        self.opts.stack_size = size;
        self
    }

    /// Spawn a new coroutine on `sched` with this configuration, returning
    /// a handle to it.
    pub fn spawn<F>(self, sched: &Scheduler, f: F) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(name) = self.opts.name {
            sched.spawn(self.opts.stack_size, Box::new(f), Some(Box::new(move || {
                log::debug!("coroutine {:?} exiting", name);
            })))
        } else {
            sched.spawn(self.opts.stack_size, Box::new(f), None)
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn builder_runs_named_coroutine() {
        let mut sched = Scheduler::new().unwrap();
        static RAN: AtomicBool = AtomicBool::new(false);
        Builder::new().name("test".to_string()).spawn(&sched, || {
            RAN.store(true, Ordering::SeqCst);
        });
        sched.run();
        assert!(RAN.load(Ordering::SeqCst));
    }

    #[test]
    fn builder_honors_stack_size() {
        let mut sched = Scheduler::new().unwrap();
        static RAN: AtomicBool = AtomicBool::new(false);
        Builder::new().stack_size(64 * 1024).spawn(&sched, || {
            RAN.store(true, Ordering::SeqCst);
        });
        sched.run();
        assert!(RAN.load(Ordering::SeqCst));
    }
}
