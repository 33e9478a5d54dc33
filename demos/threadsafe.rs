//! The one part of this crate that *is* shared safely across every
//! scheduler thread in the process: the compute pool. Each OS thread here
//! runs its own `Scheduler`, but all of them hand CPU-bound coroutines to
//! the same fixed-size worker pool.

use std::thread;
use std::time::Instant;

use coros::{Coroutine, Scheduler};

fn main() {
    env_logger::init();

    let thread_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let mut threads = Vec::with_capacity(thread_count);

    for thread_id in 0..thread_count {
        let t = thread::Builder::new()
            .name(format!("sched-{}", thread_id))
            .spawn(move || {
                let mut sched = Scheduler::new().unwrap();
                Coroutine::spawn(&sched, move || {
                    let start = Instant::now();
                    Coroutine::begin_compute();
                    let mut total: u64 = 0;
                    for n in 0..5_000_000u64 {
                        total = total.wrapping_add(n);
                    }
                    Coroutine::end_compute();
                    println!(
                        "thread {}: compute segment ({}) took {:?}",
                        thread_id, total, start.elapsed()
                    );
                });
                sched.run();
            })
            .unwrap();
        threads.push(t);
    }

    for t in threads {
        t.join().unwrap();
    }
}
