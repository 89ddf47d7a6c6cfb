//! The composite loop: run/wait turns, sleeping, and cancellation.

use muxio::error::Error;
use muxio::reactor::Reactor;
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn sleep_only_turn() {
    let reactor = Reactor::new().unwrap();
    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    reactor.schedule().after(1, move || {
        flag.set(true);
        Ok(())
    });
    assert!(!reactor.is_empty());

    let seconds = reactor.run().unwrap();
    assert_eq!(seconds, 1);

    let started = Instant::now();
    reactor.wait(seconds).unwrap();
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "wait(1) slept for {:?}",
        started.elapsed()
    );

    let seconds = reactor.run().unwrap();
    assert!(fired.get());
    assert_eq!(seconds, 0);
    assert!(reactor.is_empty());
}

#[test]
fn cancel_before_fire() {
    let reactor = Reactor::new().unwrap();
    let first = Rc::new(Cell::new(false));
    let second = Rc::new(Cell::new(false));

    let first_flag = Rc::clone(&first);
    let cancelled = reactor.schedule().after(1, move || {
        first_flag.set(true);
        Ok(())
    });
    let second_flag = Rc::clone(&second);
    reactor.schedule().after(1, move || {
        second_flag.set(true);
        Ok(())
    });
    assert!(reactor.schedule().cancel(cancelled));

    while !reactor.is_empty() {
        let seconds = reactor.run().unwrap();
        if seconds == 0 {
            break;
        }
        reactor.wait(seconds).unwrap();
    }
    assert!(!first.get(), "the cancelled task never fired");
    assert!(second.get());
}

#[test]
fn empty_reactor_has_nothing_to_wait_for() {
    let reactor = Reactor::new().unwrap();
    assert!(reactor.is_empty());
    assert_eq!(reactor.run().unwrap(), 0);
}

#[test]
fn dns_queries_need_a_resolver() {
    let reactor = Reactor::new().unwrap();
    let result = reactor.query_a("localhost", |_| {});
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}
