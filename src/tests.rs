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

//! Integration tests that exercise the public API end to end, as opposed to
//! the unit tests living alongside each module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::time::Instant;

use crate::{Condition, Coroutine, Scheduler, State};

#[test]
fn spawn_runs_its_body() {
    let mut sched = Scheduler::new().unwrap();
    let (tx, rx) = channel();
    Coroutine::spawn(&sched, move || {
        tx.send(1).unwrap();
    });
    sched.run();
    assert_eq!(rx.recv().unwrap(), 1);
}

#[test]
fn nested_spawn_runs_both_bodies_in_order() {
    let mut sched = Scheduler::new().unwrap();
    let (tx, rx) = channel();
    Coroutine::spawn(&sched, move || {
        tx.send(1).unwrap();
        let inner_tx = tx.clone();
        let child = Coroutine::spawn(Scheduler::current(), move || {
            inner_tx.send(2).unwrap();
        });
        Coroutine::join(&child);
    });
    sched.run();
    assert_eq!(rx.recv().unwrap(), 1);
    assert_eq!(rx.recv().unwrap(), 2);
}

#[test]
fn join_waits_for_completion() {
    let mut sched = Scheduler::new().unwrap();
    static STEP: AtomicUsize = AtomicUsize::new(0);

    Coroutine::spawn(&sched, || {
        let child = Coroutine::spawn(Scheduler::current(), || {
            STEP.store(1, Ordering::SeqCst);
        });
        Coroutine::join(&child);
        // The joiner can only observe 1 here: join must not return before
        // the target has actually reached Done.
        assert_eq!(STEP.load(Ordering::SeqCst), 1);
        STEP.store(2, Ordering::SeqCst);
    });

    sched.run();
    assert_eq!(STEP.load(Ordering::SeqCst), 2);
}

#[test]
fn join_on_an_already_done_coroutine_is_a_no_op() {
    let mut sched = Scheduler::new().unwrap();
    static JOINED: AtomicUsize = AtomicUsize::new(0);

    Coroutine::spawn(&sched, || {
        let child = Coroutine::spawn(Scheduler::current(), || {});
        // Give the scheduler a tick to actually run the child to Done
        // before joining it.
        Coroutine::nice();
        Coroutine::join(&child);
        assert_eq!(child.state(), State::Done);
        JOINED.fetch_add(1, Ordering::SeqCst);
    });

    sched.run();
    assert_eq!(JOINED.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_unwinds_a_waiting_coroutine() {
    let mut sched = Scheduler::new().unwrap();
    static UNWOUND: AtomicUsize = AtomicUsize::new(0);

    struct Bump;
    impl Drop for Bump {
        fn drop(&mut self) {
            UNWOUND.fetch_add(1, Ordering::SeqCst);
        }
    }

    let target = Coroutine::spawn(&sched, || {
        let _bump = Bump;
        Coroutine::wait(60_000);
        unreachable!("a cancelled coroutine must not resume past its wait");
    });

    Coroutine::spawn(&sched, move || {
        Coroutine::nice();
        target.cancel();
    });

    sched.run();
    assert_eq!(UNWOUND.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_on_an_already_done_coroutine_is_a_no_op() {
    let mut sched = Scheduler::new().unwrap();
    let handle = Coroutine::spawn(&sched, || {});
    sched.run();
    assert_eq!(handle.state(), State::Done);
    // Nothing to unwind any more; just doesn't panic or corrupt state.
    handle.cancel();
}

#[test]
fn wait_sleeps_at_least_the_requested_duration() {
    let mut sched = Scheduler::new().unwrap();
    static ELAPSED_OK: AtomicUsize = AtomicUsize::new(0);

    Coroutine::spawn(&sched, || {
        let start = Instant::now();
        Coroutine::wait(100);
        let elapsed = start.elapsed();
        if elapsed.as_millis() >= 100 && elapsed.as_millis() < 1100 {
            ELAPSED_OK.store(1, Ordering::SeqCst);
        }
    });

    sched.run();
    assert_eq!(ELAPSED_OK.load(Ordering::SeqCst), 1);
}

#[test]
fn nice_interleaves_two_coroutines() {
    let mut sched = Scheduler::new().unwrap();
    static ORDER: std::sync::Mutex<Vec<&'static str>> = std::sync::Mutex::new(Vec::new());

    Coroutine::spawn(&sched, || {
        for _ in 0..2 {
            ORDER.lock().unwrap().push("a");
            Coroutine::nice();
        }
    });
    Coroutine::spawn(&sched, || {
        for _ in 0..2 {
            ORDER.lock().unwrap().push("b");
            Coroutine::nice();
        }
    });

    sched.run();
    assert_eq!(*ORDER.lock().unwrap(), vec!["a", "b", "a", "b"]);
}

#[test]
fn condition_wakes_a_single_waiter_lifo() {
    let mut sched = Scheduler::new().unwrap();
    // A raw pointer rather than `Arc<Mutex<_>>`: every coroutine here runs
    // cooperatively on `sched`'s single OS thread, so a real lock would
    // stay held across the suspension inside `wait()` and deadlock the
    // whole scheduler the moment a second coroutine tried to acquire it.
    let cond_ptr = Box::into_raw(Box::new(Condition::new())) as usize;
    static WOKEN: std::sync::Mutex<Vec<u32>> = std::sync::Mutex::new(Vec::new());

    Coroutine::spawn(&sched, move || {
        unsafe { (*(cond_ptr as *mut Condition)).wait() };
        WOKEN.lock().unwrap().push(1);
    });
    Coroutine::spawn(&sched, move || {
        Coroutine::nice();
        unsafe { (*(cond_ptr as *mut Condition)).wait() };
        WOKEN.lock().unwrap().push(2);
    });
    Coroutine::spawn(&sched, move || {
        Coroutine::nice();
        Coroutine::nice();
        // Both waiters are parked by now; LIFO wakes coroutine 2 first.
        unsafe { (*(cond_ptr as *mut Condition)).notify_one() };
    });

    sched.run();
    assert_eq!(*WOKEN.lock().unwrap(), vec![2]);
    unsafe {
        drop(Box::from_raw(cond_ptr as *mut Condition));
    }
}

#[test]
fn condition_notify_all_on_an_empty_waiter_list_is_a_no_op() {
    let mut cond = Condition::new();
    // Nothing parked yet; must not panic or wake anything that doesn't exist.
    cond.notify_all();
    cond.notify_one();
}

#[test]
fn begin_compute_offloads_without_blocking_a_sibling_timer() {
    let mut sched = Scheduler::new().unwrap();
    static TIMER_FIRED: AtomicUsize = AtomicUsize::new(0);
    static COMPUTE_DONE: AtomicUsize = AtomicUsize::new(0);

    Coroutine::spawn(&sched, || {
        Coroutine::begin_compute();
        // Busy-spin briefly to simulate CPU-bound work on the compute pool.
        let start = Instant::now();
        while start.elapsed().as_millis() < 150 {}
        Coroutine::end_compute();
        COMPUTE_DONE.store(1, Ordering::SeqCst);
    });

    Coroutine::spawn(&sched, || {
        let start = Instant::now();
        Coroutine::wait(10);
        // If the scheduler's own thread were blocked on the compute
        // coroutine, this wait would run long past its 10ms budget.
        if start.elapsed().as_millis() < 150 {
            TIMER_FIRED.store(1, Ordering::SeqCst);
        }
    });

    sched.run();
    assert_eq!(TIMER_FIRED.load(Ordering::SeqCst), 1);
    assert_eq!(COMPUTE_DONE.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_reaches_a_coroutine_still_pending_in_the_compute_pool() {
    let mut sched = Scheduler::new().unwrap();
    static UNWOUND: AtomicUsize = AtomicUsize::new(0);
    static RAN: AtomicUsize = AtomicUsize::new(0);

    struct Bump;
    impl Drop for Bump {
        fn drop(&mut self) {
            UNWOUND.fetch_add(1, Ordering::SeqCst);
        }
    }

    // Occupy both compute workers with long busy-spins so the target
    // coroutine submitted after them is guaranteed to still be sitting in
    // the pool's `pending` queue, not yet picked up, when it's cancelled.
    for _ in 0..2 {
        Coroutine::spawn(&sched, || {
            Coroutine::begin_compute();
            let start = Instant::now();
            while start.elapsed().as_millis() < 300 {}
            Coroutine::end_compute();
        });
    }

    let target = Coroutine::spawn(&sched, || {
        let _bump = Bump;
        Coroutine::begin_compute();
        RAN.fetch_add(1, Ordering::SeqCst);
        Coroutine::end_compute();
    });

    Coroutine::spawn(&sched, move || {
        Coroutine::nice();
        target.cancel();
    });

    sched.run();
    assert_eq!(UNWOUND.load(Ordering::SeqCst), 1);
    assert_eq!(RAN.load(Ordering::SeqCst), 0, "a cancelled pending job must never run its compute segment");
}

#[test]
fn cross_thread_post_wakes_the_owning_scheduler_before_its_deadline() {
    let mut sched = Scheduler::new().unwrap();
    let (tx, rx) = channel();

    // A 60s wait that a cross-thread post should cut short almost
    // immediately; if `post_coroutine` failed to wake the scheduler's
    // `mio::Waker`, this test would only pass by timing out at 60s.
    let handle = Coroutine::spawn(&sched, move || {
        Coroutine::wait(60_000);
        tx.send(()).unwrap();
    });

    let sched_ptr = &*sched as *const Scheduler as usize;
    let coro_ptr = handle.as_raw() as usize;
    let poster = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(30));
        let sched_ref = unsafe { &*(sched_ptr as *const Scheduler) };
        sched_ref.post_coroutine(coro_ptr as *mut _);
    });

    sched.run();
    poster.join().unwrap();
    assert!(rx.recv_timeout(std::time::Duration::from_secs(5)).is_ok());
}
