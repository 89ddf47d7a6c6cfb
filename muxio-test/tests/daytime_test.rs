//! End-to-end daytime service with a reverse lookup before the write.

use muxio::reactor::Reactor;
use muxio_test::daytime::DaytimeServer;
use muxio_test::mock_resolver::MockResolver;
use serial_test::serial;
use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

const ADDR: &str = "127.0.0.1:8080";

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

#[test]
#[serial]
fn one_date_line_per_connection() {
    muxio_test::init_tracing();
    let mut mock = MockResolver::new();
    // Loopback clients reverse-resolve to localhost.
    mock.answer_ptr("1.0.0.127.in-addr.arpa", "localhost");
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();
    let _server = DaytimeServer::start(&reactor, ADDR, 2).unwrap();

    let started = Instant::now();
    let client = thread::spawn(move || {
        let mut stream = connect_with_retry(ADDR);
        let mut line = String::new();
        // The server closes after exactly one line.
        stream.read_to_string(&mut line).unwrap();
        line
    });

    let deadline = Instant::now() + Duration::from_secs(12);
    while !reactor.is_empty() && Instant::now() < deadline {
        let seconds = reactor.run().unwrap();
        if seconds == 0 {
            break;
        }
        reactor.wait(seconds.min(1)).unwrap();
    }

    let line = client.join().unwrap();
    assert!(line.ends_with("\r\n"), "got {line:?}");
    assert!(!line.trim_end().is_empty(), "the date line has content");
    assert_eq!(line.matches("\r\n").count(), 1, "exactly one line");
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the connection closed well within its deadline"
    );
    assert!(reactor.is_empty());
}
