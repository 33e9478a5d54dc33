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

//! The process-wide compute-offload pool: a fixed set of OS worker threads
//! that resume `Compute`-state coroutines so a scheduler's own event loop
//! thread is never blocked by CPU-bound work.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread;

use crate::coroutine::{Raw, Event, State};
use crate::scheduler::Scheduler;

/// Worker count. No dynamic sizing (see the crate's Non-goals); matches the
/// reference's own fixed-size thread pool.
const COMPUTE_THREADS: usize = 2;

struct Job {
    coro: *mut Raw,
    sched: *mut Scheduler,
}

unsafe impl Send for Job {}

#[derive(Default)]
struct Inner {
    pending: Vec<Job>,
    stopping: bool,
}

pub struct ComputePool {
    state: Mutex<Inner>,
    condvar: Condvar,
    /// Taken and joined exactly once by `shutdown`; `None` after that (or
    /// before the pool has ever started) makes `shutdown` idempotent.
    workers: Mutex<Option<Vec<thread::JoinHandle<()>>>>,
}

unsafe impl Sync for ComputePool {}
unsafe impl Send for ComputePool {}

static POOL: OnceLock<ComputePool> = OnceLock::new();

/// The process-wide pool, started on first use.
pub(crate) fn pool() -> &'static ComputePool {
    POOL.get_or_init(ComputePool::start)
}

/// Join and tear down the pool if it was ever started. Called when the last
/// live `Scheduler` in the process tears itself down; a pool nothing ever
/// submitted to is left alone (`pool()` itself is never called here, so it
/// can't spawn workers just to immediately stop them).
pub(crate) fn shutdown_if_started() {
    if let Some(p) = POOL.get() {
        p.shutdown();
    }
}

impl ComputePool {
    fn start() -> ComputePool {
        let pool = ComputePool {
            state: Mutex::new(Inner::default()),
            condvar: Condvar::new(),
            workers: Mutex::new(None),
        };
        pool.ensure_running();
        pool
    }

    /// Spawn `COMPUTE_THREADS` workers if none are currently running. Called
    /// before every `submit`: the pool is process-wide and outlives any one
    /// `Scheduler`, so a prior `shutdown` (the last scheduler in the process
    /// tore down while this one happened to still be starting up) must not
    /// strand this call with no worker left to pop its job.
    fn ensure_running(&self) {
        let mut workers = self.workers.lock().unwrap();
        if workers.is_some() {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.stopping = false;
        }
        let mut spawned = Vec::with_capacity(COMPUTE_THREADS);
        for n in 0..COMPUTE_THREADS {
            let handle = thread::Builder::new()
                .name(format!("coros-compute-{}", n))
                .spawn(Self::worker_loop)
                .expect("failed to spawn compute worker thread");
            spawned.push(handle);
        }
        *workers = Some(spawned);
    }

    /// Hand a `Compute`-state coroutine to the pool. Popped LIFO by
    /// whichever worker wakes first, matching the reference's own pending
    /// queue discipline.
    pub(crate) fn submit(&self, coro: *mut Raw, sched: *mut Scheduler) {
        self.ensure_running();
        let mut state = self.state.lock().unwrap();
        state.pending.push(Job { coro, sched });
        self.condvar.notify_all();
    }

    /// Cancel a coroutine currently owned by this pool on behalf of the
    /// scheduler thread that called `Handle::cancel` on it. Only the pool's
    /// own mutex gives safe access to a still-`pending` job (no worker has
    /// touched it yet), so it's pulled back off the queue and handed to the
    /// owning scheduler's own compute-done inbox to resume and destroy on
    /// its next drain, the same path a worker finishing normally uses. A
    /// job a worker already popped is outside that mutex's reach, so the
    /// request is instead left as an atomic flag on the coroutine itself,
    /// which `run_job` checks right before it would otherwise deliver
    /// `Event::Compute`.
    pub(crate) fn request_cancel(&self, coro: *mut Raw, sched: *mut Scheduler) {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.pending.iter().position(|job| job.coro == coro) {
            state.pending.remove(pos);
            drop(state);
            unsafe {
                (*coro).set_event(Event::Cancel);
                (*sched).post_compute_done(coro);
            }
            return;
        }
        drop(state);
        unsafe {
            (*coro).mark_cancel_requested();
        }
    }

    fn worker_loop() {
        loop {
            let job = {
                let pool = pool();
                let mut state = pool.state.lock().unwrap();
                loop {
                    if state.stopping {
                        return;
                    }
                    if let Some(job) = state.pending.pop() {
                        break job;
                    }
                    state = pool.condvar.wait(state).unwrap();
                }
            };

            Self::run_job(job);
        }
    }

    fn run_job(job: Job) {
        let Job { coro, sched } = job;

        // A cancellation requested while this job was already popped from
        // `pending` (so the scheduler thread could only set the atomic
        // flag, not the coroutine's own event/state) takes effect here:
        // deliver `Event::Cancel` instead of `Event::Compute` so the
        // resume below unwinds the coroutine rather than running its
        // compute segment.
        let cancelled = unsafe { (*coro).take_cancel_requested() };
        unsafe {
            (*coro).set_event(if cancelled { Event::Cancel } else { Event::Compute });
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Raw::resume(coro);
        }));

        if let Err(payload) = result {
            log::error!("compute worker panicked resuming a coroutine: {:?}", panic_message(&payload));
        }

        let state = unsafe { (*coro).state() };
        match state {
            // Whether the body ran to completion, unwound from cancellation,
            // or yielded again, the owning scheduler must hear about it so
            // it can decrement `outstanding` — otherwise invariant 2
            // (`outstanding == 0` iff nothing of this scheduler's is in the
            // pool) never holds and an otherwise-idle scheduler never
            // notices it can stop.
            State::Done | State::Waiting | State::Ready => unsafe {
                (*sched).post_compute_done(coro);
            },
            State::Compute => {
                // Re-entered begin_compute without an intervening
                // end_compute; treat it as still pending the same pool.
                // Doesn't touch the scheduler's `outstanding`: it's still
                // out at the pool, just queued for another worker.
                self_submit(coro, sched);
            }
            State::Running => unreachable!("a yielded coroutine cannot still be Running"),
        }
    }

    /// Stop accepting new work, join every worker thread, then cancel and
    /// destroy whatever is left in `pending` — jobs no worker ever reached,
    /// since a worker that observes `stopping` returns without popping.
    /// Idempotent: a second call (e.g. from a second `Scheduler` tearing
    /// down after the pool was already stopped) is a no-op.
    pub(crate) fn shutdown(&self) {
        let handles = match self.workers.lock().unwrap().take() {
            Some(handles) => handles,
            None => return,
        };

        {
            let mut state = self.state.lock().unwrap();
            state.stopping = true;
        }
        self.condvar.notify_all();

        for handle in handles {
            let _ = handle.join();
        }

        let remaining = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.pending)
        };
        for Job { coro, sched: _ } in remaining {
            unsafe {
                (*coro).set_event(Event::Cancel);
                Raw::resume(coro);
                drop(Box::from_raw(coro));
            }
        }
    }
}

fn self_submit(coro: *mut Raw, sched: *mut Scheduler) {
    pool().submit(coro, sched);
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &'static str {
    if payload.downcast_ref::<&str>().is_some() || payload.downcast_ref::<String>().is_some() {
        "coroutine body panicked"
    } else {
        "coroutine body panicked with a non-string payload"
    }
}
