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

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use crate::error::Result;
use crate::socket::{self, Readiness};

use super::each_addr;

pub struct UdpSocket {
    inner: mio::net::UdpSocket,
    readiness: Readiness,
    deadline: Option<Instant>,
}

impl UdpSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<UdpSocket> {
        let mut inner = each_addr(addr, mio::net::UdpSocket::bind)?;
        let readiness = Readiness::register(&mut inner)?;
        Ok(UdpSocket { inner, readiness, deadline: None })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn set_deadline(&mut self, millis: Option<u64>) {
        self.deadline = socket::deadline_from_millis(millis);
    }

    pub fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        let UdpSocket { inner, readiness, deadline } = self;
        socket::retry_io(readiness, *deadline, || inner.send_to(buf, target))
    }

    pub fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let UdpSocket { inner, readiness, deadline } = self;
        socket::retry_io(readiness, *deadline, || inner.recv_from(buf))
    }

    /// Deregister and release the underlying socket now rather than waiting
    /// for this value to go out of scope. A datagram socket has no
    /// connection to shut down, so this is equivalent to an explicit early
    /// `Drop`; kept as its own method so callers have the same `close` they
    /// have on `TcpStream`/`TcpListener`.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        self.readiness.deregister(&mut self.inner);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coroutine::Coroutine;
    use crate::scheduler::Scheduler;

    #[test]
    fn sends_and_receives_a_datagram() {
        let mut sched = Scheduler::new().unwrap();
        let mut server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            client.send_to(b"hello", addr).unwrap();
        });

        Coroutine::spawn(&sched, move || {
            let mut buf = [0u8; 5];
            let (n, _from) = server.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"hello");
        });

        sched.run();
        client.join().unwrap();
    }
}
