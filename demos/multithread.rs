//! Each OS thread owns an independent `Scheduler`; coroutines never cross
//! between them (cross-scheduler sharing is out of scope), but nothing
//! stops an application from running several schedulers side by side.

use std::thread;

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
                    let child = Coroutine::spawn(Scheduler::current(), move || {
                        for count in 0..10 {
                            println!("thread {}: counting {}", thread_id, count);
                            Coroutine::nice();
                        }
                    });
                    Coroutine::join(&child);
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
