//! Measures first-byte and last-byte latency for a single request against a
//! local echo server, both served as coroutines on one scheduler.

use std::time::Instant;

use coros::net::{TcpListener, TcpStream};
use coros::{Coroutine, Scheduler};

fn main() {
    env_logger::init();

    let mut sched = Scheduler::new().unwrap();
    let mut listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    Coroutine::spawn(&sched, move || {
        let (mut conn, _peer) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        loop {
            let n = conn.read_some(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            conn.write_some(&buf[..n]).unwrap();
        }
    });

    Coroutine::spawn(&sched, move || {
        let payload = vec![b'x'; 64 * 1024];
        let mut stream = TcpStream::connect(addr).unwrap();

        let start = Instant::now();
        stream.write_some(&payload).unwrap();

        let mut received = 0;
        let mut first_byte = None;
        let mut buf = [0u8; 4096];
        while received < payload.len() {
            let n = stream.read_some(&mut buf).unwrap();
            if first_byte.is_none() {
                first_byte = Some(start.elapsed());
            }
            received += n;
        }
        let last_byte = start.elapsed();

        println!("first byte after {:?}", first_byte.unwrap());
        println!("last byte after {:?}", last_byte);
        drop(stream);
    });

    sched.run();
}
