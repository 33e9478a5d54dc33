//! A minimal walk through spawning, yielding, and nesting coroutines on a
//! single scheduler.

use coros::{Coroutine, Scheduler};

fn main() {
    env_logger::init();

    let mut sched = Scheduler::new().unwrap();

    Coroutine::spawn(&sched, move || {
        println!("1. Hello from a coroutine!");

        Coroutine::nice();

        println!("3. We are back!");

        let child = Coroutine::spawn(Scheduler::current(), move || {
            println!("4. Begin counting...");
            for i in 0..5 {
                println!("   counting {}", i);
            }
            println!("5. Counting finished");
        });
        Coroutine::join(&child);

        println!("6. Goodbye");
    });

    println!("0. About to run the scheduler");
    sched.run();
    println!("7. Back in main");
}
