//! A busy, compute-bound workload spread across several coroutines on one
//! scheduler. Each leaf hands its CPU-bound segment to the compute pool so
//! the scheduler's own thread stays free to keep dispatching the others.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use coros::{Coroutine, Scheduler};

const LEAVES: usize = 8;
const WORK_PER_LEAF: u64 = 2_000_000;

fn main() {
    env_logger::init();

    let mut sched = Scheduler::new().unwrap();
    let finished = std::sync::Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    for leaf in 0..LEAVES {
        let finished = finished.clone();
        Coroutine::spawn(&sched, move || {
            Coroutine::begin_compute();
            let mut total: u64 = 0;
            for n in 0..WORK_PER_LEAF {
                total = total.wrapping_add(n);
            }
            Coroutine::end_compute();
            println!("leaf {} finished ({})", leaf, total);
            finished.fetch_add(1, Ordering::SeqCst);
        });
    }

    sched.run();
    println!(
        "{} leaves finished in {:?}",
        finished.load(Ordering::SeqCst),
        start.elapsed()
    );
}
