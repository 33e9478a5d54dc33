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

//! One `Scheduler` per OS thread: a ready queue, a waiting set, an `mio`
//! reactor, and the cross-thread inboxes that let other threads hand
//! coroutines back to their owner.

use std::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::{Events, Poll, Registry, Token, Waker};

use crate::coroutine::{Raw, Event, Handle, State};

/// How often a full deadline sweep runs even if nothing else woke the loop.
const SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

/// Reserved token identifying the cross-thread wakeup source. Real I/O
/// sources are registered starting from `Token(1)`.
const WAKE_TOKEN: Token = Token(0);

/// Live `Scheduler` count across the process. The compute pool is shared by
/// every scheduler, so it's only safe to join its workers once the last one
/// tears down — tying shutdown to, say, the first-created scheduler would
/// kill the pool out from under any sibling still running.
static SCHEDULER_COUNT: AtomicUsize = AtomicUsize::new(0);

thread_local!(static CURRENT_SCHEDULER: Cell<*mut Scheduler> = Cell::new(ptr::null_mut()));

/// Coroutines handed to this scheduler from another OS thread, staged under
/// a mutex until the owning thread drains them on its next tick. `posted`
/// and `compute_done` are kept separate, per §4.3, so the async hook knows
/// which ones to count against `outstanding`.
#[derive(Default)]
struct Inbox {
    posted: Vec<CoroPtr>,
    compute_done: Vec<CoroPtr>,
}

struct CoroPtr(*mut Raw);
unsafe impl Send for CoroPtr {}

pub struct Scheduler {
    poll: Poll,
    waker: Arc<Waker>,
    ready: Vec<*mut Raw>,
    waiting: Vec<*mut Raw>,
    /// Sockets currently parked on a poll registration, keyed by the token
    /// they were registered under.
    io_waiters: HashMap<Token, *mut Raw>,
    next_token: usize,
    inbox: Mutex<Inbox>,
    /// Coroutines owned by this scheduler currently dispatched to the
    /// compute pool. Touched only by this scheduler's own thread (the async
    /// hook decrements it while draining `compute_done`; `run_ready`
    /// increments it when it hands a coroutine to the pool).
    outstanding: usize,
    stopping: AtomicBool,
    /// Guards against running `teardown`'s cancel-and-drop pass twice: once
    /// from `run`'s own end-of-loop call, and again from `Drop` if `run`
    /// never ran (or was left early) on this scheduler.
    torn_down: bool,
}

unsafe impl Send for Scheduler {}

impl Scheduler {
    /// Create a scheduler and make it `Scheduler::current()` on this thread.
    /// Returned as a `Box` because the thread-local handle stashed below is
    /// a raw pointer into its heap allocation: the `Box` itself may move,
    /// but the data behind it does not.
    pub fn new() -> io::Result<Box<Scheduler>> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        let mut sched = Box::new(Scheduler {
            poll,
            waker,
            ready: Vec::new(),
            waiting: Vec::new(),
            io_waiters: HashMap::new(),
            next_token: 1,
            inbox: Mutex::new(Inbox::default()),
            outstanding: 0,
            stopping: AtomicBool::new(false),
            torn_down: false,
        });

        SCHEDULER_COUNT.fetch_add(1, Ordering::SeqCst);
        CURRENT_SCHEDULER.with(|c| c.set(&mut *sched as *mut Scheduler));
        Ok(sched)
    }

    /// The scheduler running on this thread. Panics outside a coroutine
    /// created by one (mirrors `Coroutine::current()`'s contract).
    pub fn current() -> &'static mut Scheduler {
        let ptr = CURRENT_SCHEDULER.with(|c| c.get());
        assert!(!ptr.is_null(), "no Scheduler is running on this thread");
        unsafe { &mut *ptr }
    }

    pub(crate) fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Reserve the next I/O token and remember which coroutine it belongs
    /// to; used by `Socket::register` before calling `Registry::register`.
    pub(crate) fn reserve_token(&mut self, coro: *mut Raw) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.io_waiters.insert(token, coro);
        token
    }

    pub(crate) fn forget_token(&mut self, token: Token) {
        self.io_waiters.remove(&token);
    }

    /// Create a coroutine on this scheduler and make it `Ready`. Panics if
    /// the stack cannot be allocated; use [`Scheduler::try_spawn`] to handle
    /// that case (exhausted address space or `mmap`/`mprotect` failure)
    /// without aborting.
    pub(crate) fn spawn(
        &self,
        stack_size: usize,
        body: Box<dyn FnOnce() + Send>,
        exit_fn: Option<Box<dyn FnOnce() + Send>>,
    ) -> Handle {
        self.try_spawn(stack_size, body, exit_fn)
            .expect("failed to allocate coroutine stack")
    }

    /// Fallible form of [`Scheduler::spawn`].
    pub fn try_spawn(
        &self,
        stack_size: usize,
        body: Box<dyn FnOnce() + Send>,
        exit_fn: Option<Box<dyn FnOnce() + Send>>,
    ) -> crate::error::Result<Handle> {
        let sched_ptr = self as *const Scheduler as *mut Scheduler;
        let coro = Raw::create(sched_ptr, stack_size, body, exit_fn)
            .map_err(crate::error::Error::StackAllocation)?;
        let raw = Box::into_raw(coro);
        // Safety: `ready` is only ever touched from this scheduler's own
        // thread, same as every other field below.
        unsafe {
            (*(sched_ptr)).push_ready(raw);
        }
        Ok(Handle::from_raw(raw))
    }

    pub(crate) fn push_ready(&mut self, coro: *mut Raw) {
        self.ready.push(coro);
    }

    /// Park the current coroutine for `millis` milliseconds; resumed with
    /// `Event::Timeout` once it elapses, unless something else wakes it
    /// first (a readiness event still takes precedence if it races in).
    pub(crate) fn wait_timeout(&mut self, coro: *mut Raw, millis: u64) {
        unsafe {
            (*coro).set_deadline(Some(Instant::now() + Duration::from_millis(millis)));
        }
        self.waiting.push(coro);
    }

    /// Move a coroutine into the waiting set with no deadline, e.g. while
    /// it holds an I/O registration or sits on a join/condition wait list.
    pub(crate) fn park(&mut self, coro: *mut Raw) {
        self.waiting.push(coro);
    }

    /// Remove a coroutine from the waiting set without touching its state,
    /// e.g. right before handing it back to the ready queue. A no-op if the
    /// pointer isn't present (it may have been drained already by `sweep`).
    pub(crate) fn unpark(&mut self, coro: *mut Raw) {
        self.waiting.retain(|&c| c != coro);
    }

    /// Hand a coroutine owned by this scheduler back to it from another OS
    /// thread (another scheduler posting cross-thread work). Safe to call
    /// concurrently with this scheduler's own `run` loop. The coroutine's
    /// event must already reflect why it's being woken; unlike
    /// `post_compute_done`, this inbox is not counted against `outstanding`.
    /// Crate-internal: `Raw` is a private type with no public way to obtain
    /// a `*mut Raw` from outside the crate, so this can't be a public entry
    /// point as written.
    pub(crate) fn post_coroutine(&self, coro: *mut Raw) {
        {
            let mut inbox = self.inbox.lock().unwrap();
            inbox.posted.push(CoroPtr(coro));
        }
        let _ = self.waker.wake();
    }

    /// Hand a coroutine back from a compute-pool worker thread. Distinct
    /// from `post_coroutine` so the async hook can decrement `outstanding`
    /// by exactly the number of coroutines the compute pool is returning.
    pub(crate) fn post_compute_done(&self, coro: *mut Raw) {
        {
            let mut inbox = self.inbox.lock().unwrap();
            inbox.compute_done.push(CoroPtr(coro));
        }
        let _ = self.waker.wake();
    }

    fn drain_inbox(&mut self) {
        let (posted, compute_done) = {
            let mut inbox = self.inbox.lock().unwrap();
            (std::mem::take(&mut inbox.posted), std::mem::take(&mut inbox.compute_done))
        };
        for CoroPtr(coro) in posted {
            self.unpark(coro);
            self.ready.push(coro);
        }
        self.outstanding = self.outstanding.saturating_sub(compute_done.len());
        for CoroPtr(coro) in compute_done {
            unsafe {
                if (*coro).is_done() {
                    // Ran to completion on the worker thread without ever
                    // yielding back; nothing left to resume.
                    drop(Box::from_raw(coro));
                } else {
                    self.ready.push(coro);
                }
            }
        }
    }

    /// Scan the waiting set for coroutines whose deadline has passed and
    /// make them `Ready` with `Event::Timeout`.
    fn sweep(&mut self) {
        let now = Instant::now();
        let mut still_waiting = Vec::with_capacity(self.waiting.len());
        for coro in self.waiting.drain(..) {
            let expired = unsafe { (*coro).deadline() }.map_or(false, |d| now >= d);
            if expired {
                unsafe {
                    (*coro).set_event(Event::Timeout);
                }
                self.ready.push(coro);
            } else {
                still_waiting.push(coro);
            }
        }
        self.waiting = still_waiting;
    }

    fn next_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        self.waiting
            .iter()
            .filter_map(|&c| unsafe { (*c).deadline() })
            .map(|d| if d > now { d - now } else { Duration::from_millis(0) })
            .min()
    }

    /// Resume every `Ready` coroutine, repeatedly draining the queue within
    /// this one tick until it is empty: a coroutine that immediately
    /// re-readies itself (`nice`, or a condition notified by a sibling
    /// within the same drain) runs again right away rather than waiting for
    /// the next `poll` to return, which could otherwise block this tick for
    /// up to `SWEEP_INTERVAL` even though there was runnable work the whole
    /// time.
    fn run_ready(&mut self) {
        while !self.ready.is_empty() {
            let batch = std::mem::take(&mut self.ready);
            for coro in batch {
                Raw::resume(coro);
                unsafe {
                    match (*coro).state() {
                        State::Done => {
                            drop(Box::from_raw(coro));
                        }
                        State::Compute => {
                            self.outstanding += 1;
                            crate::compute::pool().submit(coro, self as *mut Scheduler);
                        }
                        State::Waiting => {
                            // Already pushed onto `waiting` by whichever
                            // `Scheduler` method the coroutine called before
                            // yielding (`wait_timeout`, `park`, a
                            // `Condition`, or a join target).
                        }
                        State::Ready => self.ready.push(coro),
                        State::Running => unreachable!("a yielded coroutine cannot still be Running"),
                    }
                }
            }
        }
    }

    /// Map a readiness event to `{Readable, Writable, RwAble, Hup}` and wake
    /// whichever coroutine registered for this token. This is the only place
    /// `Hup` is ever produced: it comes straight from mio's own
    /// `is_read_closed`/`is_write_closed`/`is_error` flags on the poll event.
    /// `socket::retry_io` never synthesizes `Hup` itself — a zero-length read
    /// is a plain `Ok(0)` and a `ConnectionReset`/`BrokenPipe` I/O error
    /// passes straight through as-is.
    fn dispatch_io(&mut self, token: Token, event: &mio::event::Event) {
        match self.io_waiters.remove(&token) {
            Some(coro) => {
                let readable = event.is_readable();
                let writable = event.is_writable();
                let hup = event.is_read_closed() || event.is_write_closed() || event.is_error();
                let mapped = if hup {
                    Event::Hup
                } else if readable && writable {
                    Event::RwAble
                } else if writable {
                    Event::Writable
                } else {
                    Event::Readable
                };
                unsafe {
                    (*coro).set_event(mapped);
                }
                self.unpark(coro);
                self.ready.push(coro);
            }
            None => log::warn!("poll event for unknown token {:?}", token),
        }
    }

    /// Whether this scheduler currently has any runnable or pending-event
    /// work: a ready coroutine, a waiting one, or one still out at the
    /// compute pool. Mirrors invariant 5 ("an idle scheduler ... stops").
    fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.waiting.is_empty() && self.outstanding == 0
    }

    /// Run this scheduler's loop until [`Scheduler::stop`] is called, or
    /// until no coroutine remains ready, waiting, or in flight at the
    /// compute pool (there is then no way this scheduler could ever be
    /// woken again).
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(256);

        loop {
            self.run_ready();

            // `stop()` only requests a graceful drain: a coroutine still
            // out at the compute pool holds a raw pointer back to this
            // scheduler, so exiting (and letting the caller drop it) before
            // `outstanding` reaches zero would leave that worker thread
            // with a dangling pointer to post its result to.
            if self.is_idle()
                || (self.stopping.load(Ordering::Acquire)
                    && self.ready.is_empty()
                    && self.waiting.is_empty()
                    && self.outstanding == 0)
            {
                break;
            }

            let timeout = match self.next_deadline() {
                Some(d) => Some(d.min(SWEEP_INTERVAL)),
                None => Some(SWEEP_INTERVAL),
            };

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    self.drain_inbox();
                } else {
                    self.dispatch_io(event.token(), event);
                }
            }

            self.sweep();
        }

        self.teardown();
    }

    /// Request that `run` exit once no coroutine remains runnable.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }

    /// Cancel every coroutine still alive when the loop is torn down, per
    /// the reference's shutdown contract (no coroutine silently leaks its
    /// stack without at least one chance to unwind and run destructors).
    /// Idempotent: harmless to call again from `Drop` after `run` already
    /// called it once. Joins the process-wide compute pool's workers once
    /// this is the last live scheduler, mirroring the reference's own
    /// `Scheduler::~Scheduler()` stopping its compute threads.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let remaining: Vec<*mut Raw> = self
            .ready
            .drain(..)
            .chain(self.waiting.drain(..))
            .collect();
        for coro in remaining {
            unsafe {
                (*coro).set_event(Event::Cancel);
            }
            Raw::resume(coro);
            unsafe {
                drop(Box::from_raw(coro));
            }
        }

        if SCHEDULER_COUNT.fetch_sub(1, Ordering::SeqCst) == 1 {
            crate::compute::shutdown_if_started();
        }
    }
}

impl Drop for Scheduler {
    /// Back-stop for a scheduler dropped without ever calling `run` (or
    /// abandoned mid-loop): still decrements `SCHEDULER_COUNT` and cancels
    /// whatever coroutines it was holding, so the compute pool isn't leaked
    /// for the life of the process just because nobody called `run`.
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coroutine::Coroutine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_drains_a_single_ready_coroutine() {
        let mut sched = Scheduler::new().unwrap();
        static RAN: AtomicUsize = AtomicUsize::new(0);
        Coroutine::spawn(&sched, || {
            RAN.fetch_add(1, Ordering::SeqCst);
        });
        sched.run();
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nice_reschedules_without_finishing() {
        let mut sched = Scheduler::new().unwrap();
        static TICKS: AtomicUsize = AtomicUsize::new(0);
        Coroutine::spawn(&sched, || {
            for _ in 0..3 {
                TICKS.fetch_add(1, Ordering::SeqCst);
                Coroutine::nice();
            }
        });
        sched.run();
        assert_eq!(TICKS.load(Ordering::SeqCst), 3);
    }
}
