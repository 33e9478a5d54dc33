//! Two coroutines on the same scheduler sharing ordinary (non-atomic)
//! reference-counted state. Safe because the scheduler never runs more than
//! one of them at a time: `Rc`/`RefCell` would be unsound shared across
//! schedulers, but within one they're exactly the single-threaded tool
//! they're designed to be — except `Coroutine::spawn`'s `Send` bound rules
//! `Rc` out, so this uses `Arc`/`Mutex` instead while still relying only on
//! cooperative, not preemptive, scheduling for correctness.

use std::sync::{Arc, Mutex};

use coros::{Coroutine, Scheduler};

fn main() {
    env_logger::init();

    let mut sched = Scheduler::new().unwrap();
    let shared = Arc::new(Mutex::new(0usize));

    let shared1 = shared.clone();
    Coroutine::spawn(&sched, move || {
        *shared1.lock().unwrap() = 1;
        let val = *shared1.lock().unwrap();
        println!("first coroutine set {}", val);
        Coroutine::nice();
        println!("first coroutine sees {}", *shared1.lock().unwrap());
    });

    let shared2 = shared.clone();
    Coroutine::spawn(&sched, move || {
        Coroutine::nice();
        *shared2.lock().unwrap() = 2;
        println!("second coroutine set {}", *shared2.lock().unwrap());
    });

    sched.run();
    println!("final value: {}", *shared.lock().unwrap());
}
