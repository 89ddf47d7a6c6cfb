//! End-to-end echo service over the loopback interface.

use muxio::reactor::Reactor;
use muxio_test::echo::EchoServer;
use serial_test::serial;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

const ADDR: &str = "127.0.0.1:8081";

fn connect_with_retry(addr: &str) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Err(e) => panic!("connect to {addr}: {e}"),
        }
    }
}

fn drive_until_empty(reactor: &Reactor, deadline: Duration) {
    let end = Instant::now() + deadline;
    while !reactor.is_empty() && Instant::now() < end {
        let seconds = reactor.run().unwrap();
        if seconds == 0 {
            break;
        }
        reactor.wait(seconds.min(1)).unwrap();
    }
}

#[test]
#[serial]
fn echo_round_trip() {
    muxio_test::init_tracing();
    let reactor = Reactor::new().unwrap();
    let _server = EchoServer::start(&reactor, ADDR, 2, 5).unwrap();

    let client = thread::spawn(move || {
        let mut stream = connect_with_retry(ADDR);
        stream.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        buf
    });

    drive_until_empty(&reactor, Duration::from_secs(10));

    let echoed = client.join().unwrap();
    assert_eq!(&echoed, b"hello");
    assert!(
        reactor.is_empty(),
        "connection closed on EOF and the listener expired"
    );
}

#[test]
#[serial]
fn echo_handles_consecutive_clients() {
    muxio_test::init_tracing();
    let reactor = Reactor::new().unwrap();
    let _server = EchoServer::start(&reactor, ADDR, 2, 5).unwrap();

    let client = thread::spawn(move || {
        let mut replies = Vec::new();
        for message in [&b"first"[..], &b"second"[..]] {
            let mut stream = connect_with_retry(ADDR);
            stream.write_all(message).unwrap();
            let mut buf = vec![0u8; message.len()];
            stream.read_exact(&mut buf).unwrap();
            replies.push(buf);
        }
        replies
    });

    drive_until_empty(&reactor, Duration::from_secs(10));

    let replies = client.join().unwrap();
    assert_eq!(replies, vec![b"first".to_vec(), b"second".to_vec()]);
    assert!(reactor.is_empty());
}
