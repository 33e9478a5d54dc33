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

//! The coroutine primitive: a guarded stack, a saved context, and the
//! `{Ready, Running, Waiting, Compute, Done}` state machine.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use context::Transfer;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::stack::Stack;

/// Process-wide unique coroutine identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl Id {
    fn next() -> Id {
        Id(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Waiting,
    Compute,
    Done,
}

/// The reason a coroutine was most recently awakened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Initial value before a coroutine has ever suspended.
    Cont,
    Cancel,
    Readable,
    Writable,
    RwAble,
    Timeout,
    Hup,
    Join,
    Compute,
    /// Reserved for symmetry with `Compute`; never delivered (kept as dead
    /// state the same way the reference leaves it declared but unused).
    ComputeDone,
    Cond,
}

/// Thrown across a coroutine's own stack to unwind it when it is cancelled.
/// Caught only by [`coroutine_entry`]'s outer `catch_unwind`; propagating it
/// further (e.g. a body that swallows `Box<dyn Any>` unwind payloads
/// indiscriminately) would simply prevent that coroutine's own unwind from
/// ever reaching its exit callback.
struct Cancelled;

const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// How a coroutine reached `Done`, recorded for whoever joins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Cancelled,
    Panicked,
}

pub struct Raw {
    id: Id,
    stack: Option<Stack>,
    ctx: Context,
    caller: Context,
    body: Option<Box<dyn FnOnce() + Send>>,
    exit_fn: Option<Box<dyn FnOnce() + Send>>,
    state: State,
    event: Event,
    deadline: Option<Instant>,
    joiners: Vec<*mut Raw>,
    sched: *mut Scheduler,
    outcome: Outcome,
    /// The `catch_unwind` payload from a panicking body. Taken by whichever
    /// joiner calls `join` first; later joiners still see `Outcome::Panicked`
    /// but get a placeholder payload since the original isn't `Clone`.
    panic_payload: Option<Box<dyn std::any::Any + Send>>,
    /// Set by `Handle::cancel` when it finds this coroutine already popped
    /// from the compute pool's pending queue (so no mutex protects it
    /// anymore) but not yet resumed by the worker that popped it. Checked,
    /// and cleared, by that worker immediately before it would otherwise
    /// deliver `Event::Compute`. Atomic because it's the one field `cancel`
    /// and a compute worker may legitimately touch at the same time.
    cancel_requested: AtomicBool,
}

unsafe impl Send for Raw {}

thread_local!(static CURRENT: Cell<*mut Raw> = Cell::new(ptr::null_mut()));

pub(crate) fn set_current(coro: *mut Raw) {
    CURRENT.with(|c| c.set(coro));
}

pub(crate) fn current_ptr() -> *mut Raw {
    CURRENT.with(|c| c.get())
}

extern "C" fn coroutine_entry(t: Transfer) -> ! {
    let coro_ptr = t.data as *mut Raw;

    unsafe {
        (*coro_ptr).caller = Context::from_raw(t.context);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if (*coro_ptr).event == Event::Cancel {
                panic::resume_unwind(Box::new(Cancelled));
            }
            let body = (*coro_ptr)
                .body
                .take()
                .expect("coroutine body already consumed");
            body();
        }));

        (*coro_ptr).outcome = match result {
            Ok(()) => Outcome::Finished,
            Err(payload) => {
                if payload.downcast_ref::<Cancelled>().is_some() {
                    Outcome::Cancelled
                } else {
                    log::error!("coroutine {:?} panicked", (*coro_ptr).id);
                    (*coro_ptr).panic_payload = Some(payload);
                    Outcome::Panicked
                }
            }
        };

        (*coro_ptr).state = State::Done;

        // A coroutine that finishes while a compute worker is resuming it
        // (body returned, or was cancelled, without ever calling
        // `end_compute`) reaches this point on the *worker's* OS thread, not
        // its owning scheduler's. Waking a joiner must therefore go through
        // the same mutex-guarded inbox cross-thread posting uses — touching
        // `ready`/`waiting` directly here would race the owning scheduler's
        // own thread.
        for joiner in (*coro_ptr).joiners.drain(..) {
            (*joiner).set_event(Event::Join);
            let sched = (*joiner).scheduler();
            (*sched).post_coroutine(joiner);
        }

        if let Some(exit_fn) = (*coro_ptr).exit_fn.take() {
            let _ = panic::catch_unwind(AssertUnwindSafe(exit_fn));
        }

        // Jump back one last time so the scheduler regains control; this
        // context is never resumed again, and its stack is freed once the
        // scheduler drops the `Box<Raw>`.
        (*coro_ptr).caller.resume(0);
    }

    unreachable!("a Done coroutine must never be resumed again");
}

impl Raw {
    pub(crate) fn create(
        sched: *mut Scheduler,
        stack_size: usize,
        body: Box<dyn FnOnce() + Send>,
        exit_fn: Option<Box<dyn FnOnce() + Send>>,
    ) -> std::io::Result<Box<Raw>> {
        let size = if stack_size == 0 { DEFAULT_STACK_SIZE } else { stack_size };
        let stack = Stack::allocate(size)?;
        let ctx = Context::new(&stack, coroutine_entry);

        Ok(Box::new(Raw {
            id: Id::next(),
            stack: Some(stack),
            ctx,
            caller: Context::empty(),
            body: Some(body),
            exit_fn,
            state: State::Ready,
            event: Event::Cont,
            deadline: None,
            joiners: Vec::new(),
            sched,
            outcome: Outcome::Finished,
            panic_payload: None,
            cancel_requested: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub(crate) fn scheduler(&self) -> *mut Scheduler {
        self.sched
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Record an event and make the coroutine READY. Must only be called by
    /// whichever single thread currently owns the coroutine (its scheduler's
    /// own thread, or a compute worker while it is in COMPUTE state).
    pub(crate) fn set_event(&mut self, ev: Event) {
        self.event = ev;
        self.state = State::Ready;
    }

    pub(crate) fn add_joiner(&mut self, joiner: *mut Raw) {
        self.joiners.push(joiner);
    }

    /// Flag a pending cancellation for a coroutine a compute worker already
    /// popped off the pool's queue. Safe to call concurrently with the
    /// worker that owns it; see [`ComputePool::request_cancel`].
    pub(crate) fn mark_cancel_requested(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Read and clear the flag set by `mark_cancel_requested`. Called only
    /// by the compute worker that owns this coroutine, right before it would
    /// otherwise deliver `Event::Compute`.
    pub(crate) fn take_cancel_requested(&self) -> bool {
        self.cancel_requested.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Consume this `Done` coroutine's outcome as a joiner sees it. Only
    /// meaningful once `is_done()`; each joiner gets the real panic payload
    /// exactly once, since `Box<dyn Any + Send>` isn't `Clone`.
    pub(crate) fn take_join_result(&mut self) -> Result<()> {
        debug_assert!(self.is_done(), "join_result read before the target is Done");
        match self.outcome {
            Outcome::Finished => Ok(()),
            Outcome::Cancelled => Err(Error::Cancelled),
            Outcome::Panicked => Err(Error::Panicked(
                self.panic_payload
                    .take()
                    .unwrap_or_else(|| Box::new("coroutine panicked (payload already taken by an earlier join)")),
            )),
        }
    }

    /// Mark `coro` ready with `event` and hand it back to its owning
    /// scheduler's ready queue. Used whenever something other than the
    /// scheduler's own I/O dispatch or sweep wakes a parked coroutine
    /// (joins, condition variables).
    pub(crate) fn wake(coro: *mut Raw, event: Event) {
        unsafe {
            (*coro).set_event(event);
            let sched = (*coro).scheduler();
            (*sched).unpark(coro);
            (*sched).push_ready(coro);
        }
    }

    /// Resume this coroutine: jump into its context, becoming `current` for
    /// the duration. Returns once the coroutine yields or finishes.
    pub(crate) fn resume(coro: *mut Raw) {
        unsafe {
            debug_assert_ne!((*coro).state, State::Done, "resuming a Done coroutine");
            (*coro).state = State::Running;
            let previous = current_ptr();
            set_current(coro);
            (*coro).ctx.resume(coro as usize);
            set_current(previous);
        }
    }

    /// Suspend the running coroutine, jumping back to whichever frame
    /// resumed it. Called only from inside the coroutine's own body, via
    /// the `Coroutine` namespace functions below.
    fn yield_now(&mut self, new_state: State) -> Event {
        debug_assert_ne!(new_state, State::Running);
        self.state = new_state;
        self.caller.resume(0);
        // Earliest suspension point after being resumed again: honor a
        // cancellation that arrived while we were suspended.
        if self.event == Event::Cancel {
            panic::resume_unwind(Box::new(Cancelled));
        }
        self.event
    }
}

impl Drop for Raw {
    fn drop(&mut self) {
        log::trace!("destroying coroutine {:?}", self.id);
    }
}

/// An owned reference to a coroutine, returned by [`Coroutine::create`] and
/// [`Coroutine::current`]. Cheap to copy; the coroutine itself lives until
/// its scheduler destroys it, independent of how many `Handle`s point at it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Handle(*mut Raw);

unsafe impl Send for Handle {}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl Handle {
    pub(crate) fn from_raw(ptr: *mut Raw) -> Handle {
        Handle(ptr)
    }

    pub(crate) fn as_raw(&self) -> *mut Raw {
        self.0
    }

    pub fn id(&self) -> Id {
        unsafe { (*self.0).id() }
    }

    pub fn state(&self) -> State {
        unsafe { (*self.0).state() }
    }

    pub fn event(&self) -> Event {
        unsafe { (*self.0).event() }
    }

    /// Asynchronously cancel this coroutine. Must be called from the thread
    /// that owns its scheduler (typically another coroutine running on the
    /// same scheduler). The actual stack unwind happens the next time the
    /// scheduler resumes it.
    ///
    /// A coroutine parked in the waiting set (a timer, a join, a condition,
    /// a socket wait) is moved straight to the ready queue so the unwind
    /// happens on the next tick rather than whenever its original wait
    /// would otherwise have ended. A coroutine already `Done` is untouched.
    /// One currently out at the compute pool is never touched directly from
    /// here — `self.event`/`self.state` are only safe to write from
    /// whichever thread currently owns the coroutine, and while it's in
    /// `Compute` that's a worker thread, not this one — so the request is
    /// routed through the pool's own synchronization instead.
    pub fn cancel(&self) {
        unsafe {
            let coro = self.0;
            match (*coro).state() {
                State::Done => {}
                State::Compute => {
                    let sched = (*coro).scheduler();
                    crate::compute::pool().request_cancel(coro, sched);
                }
                State::Waiting => {
                    (*coro).set_event(Event::Cancel);
                    let sched = (*coro).scheduler();
                    (*sched).unpark(coro);
                    (*sched).push_ready(coro);
                }
                State::Ready | State::Running => {
                    (*coro).set_event(Event::Cancel);
                }
            }
        }
    }
}

/// Operations on coroutines, namespaced the way the original API groups them
/// (`Coroutine::Create`, `Coroutine::Self()`, ...).
pub struct Coroutine;

impl Coroutine {
    /// Create a new coroutine bound to `sched`, READY to run. `on_exit` runs
    /// once the body returns or unwinds (including from cancellation),
    /// before the stack is released.
    pub fn create<F, E>(sched: &Scheduler, body: F, on_exit: E) -> Handle
    where
        F: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        sched.spawn(DEFAULT_STACK_SIZE, Box::new(body), Some(Box::new(on_exit)))
    }

    /// Like [`Coroutine::create`], without an exit callback.
    pub fn spawn<F>(sched: &Scheduler, body: F) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        sched.spawn(DEFAULT_STACK_SIZE, Box::new(body), None)
    }

    /// A handle to the coroutine currently running on this thread. Panics if
    /// called outside a coroutine body (e.g. directly from a scheduler's own
    /// OS thread before it has resumed anything).
    pub fn current() -> Handle {
        let ptr = current_ptr();
        assert!(!ptr.is_null(), "Coroutine::current() called outside a coroutine");
        Handle::from_raw(ptr)
    }

    /// Voluntarily yield; re-queued as READY right away.
    pub fn nice() {
        current_mut().yield_now(State::Ready);
    }

    /// Suspend for at least `millis` milliseconds.
    pub fn wait(millis: u64) {
        let coro = current_ptr();
        unsafe {
            let sched = (*coro).scheduler();
            (*sched).wait_timeout(coro, millis);
        }
        current_mut().yield_now(State::Waiting);
    }

    /// Suspend until `target` reaches `Done`, then report how it got there:
    /// `Ok(())` on ordinary completion, `Err(Error::Cancelled)` if it was
    /// cancelled, `Err(Error::Panicked(_))` if its body panicked.
    pub fn join(target: &Handle) -> Result<()> {
        let coro = current_ptr();
        let raw = target.as_raw();
        unsafe {
            if !(*raw).is_done() {
                (*raw).add_joiner(coro);
                let sched = (*coro).scheduler();
                (*sched).park(coro);
                current_mut().yield_now(State::Waiting);
            }
            (*raw).take_join_result()
        }
    }

    /// Yield with state COMPUTE, handing this coroutine to the compute pool.
    pub fn begin_compute() {
        current_mut().yield_now(State::Compute);
    }

    /// Yield again once compute-bound work is finished; the worker that
    /// resumed this coroutine repatriates it to its owning scheduler.
    pub fn end_compute() {
        current_mut().yield_now(State::Waiting);
    }
}

fn current_mut() -> &'static mut Raw {
    let ptr = current_ptr();
    assert!(!ptr.is_null(), "no coroutine is currently running on this thread");
    unsafe { &mut *ptr }
}

/// Suspend the current coroutine with `new_state`, returning the event it
/// was woken with. Exposed to `socket.rs` so a socket wait doesn't have to
/// go through the `Coroutine` public API's fixed set of wait reasons.
pub(crate) fn suspend(new_state: State) -> Event {
    current_mut().yield_now(new_state)
}

/// A co-operative condition variable scoped to a single scheduler. No
/// predicate is bundled in; callers re-check after waking, same as a
/// standard library condvar.
#[derive(Default)]
pub struct Condition {
    waiting: Vec<*mut Raw>,
}

unsafe impl Send for Condition {}

impl Condition {
    pub fn new() -> Condition {
        Condition { waiting: Vec::new() }
    }

    /// Suspend the current coroutine until notified.
    pub fn wait(&mut self) {
        let coro = current_ptr();
        self.waiting.push(coro);
        unsafe {
            let sched = (*coro).scheduler();
            (*sched).park(coro);
        }
        current_mut().yield_now(State::Waiting);
    }

    /// Wake the most recently added waiter (LIFO, matching the reference).
    pub fn notify_one(&mut self) {
        if let Some(coro) = self.waiting.pop() {
            Raw::wake(coro, Event::Cond);
        }
    }

    /// Wake every waiter.
    pub fn notify_all(&mut self) {
        for coro in self.waiting.drain(..) {
            Raw::wake(coro, Event::Cond);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let a = Id::next();
        let b = Id::next();
        assert!(b.0 > a.0);
    }
}
