//! Dispatch semantics: delivery, re-lookup, and handler suicide.

use muxio::dispatch::{Dispatch, RegisteredSocket};
use muxio::error::Error;
use muxio::event::Events;
use muxio::socket::{Ownership, SysSocket};
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

fn pair() -> (UnixStream, UnixStream) {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

/// The streams stay owned by the test; the dispatcher side only borrows.
fn borrow_fd(stream: &UnixStream) -> Rc<SysSocket> {
    Rc::new(SysSocket::new(stream.as_raw_fd(), Ownership::Borrowed).unwrap())
}

#[test]
fn handlers_receive_their_events() {
    let dispatch = Dispatch::new().unwrap();
    let (a, mut b) = pair();
    let seen = Rc::new(Cell::new(Events::empty()));
    let seen_in_handler = Rc::clone(&seen);
    let _sock = RegisteredSocket::new(
        &dispatch,
        borrow_fd(&a),
        Box::new(move |ev| {
            seen_in_handler.set(seen_in_handler.get() | ev);
            Ok(())
        }),
        Events::READABLE,
    )
    .unwrap();

    b.write_all(b"ping").unwrap();
    dispatch.wait(0).unwrap();
    dispatch.run().unwrap();
    assert!(seen.get().contains(Events::READABLE));
}

#[test]
fn registration_is_atomic() {
    let dispatch = Dispatch::new().unwrap();
    let (a, _b) = pair();
    let _first = RegisteredSocket::new(&dispatch, borrow_fd(&a), Box::new(|_| Ok(())), Events::READABLE).unwrap();
    let second = RegisteredSocket::new(&dispatch, borrow_fd(&a), Box::new(|_| Ok(())), Events::READABLE);
    assert!(matches!(second, Err(Error::InvalidArgument(_))));
    assert_eq!(dispatch.len(), 1, "the failed registration left nothing behind");
}

#[test]
fn handler_may_drop_itself_mid_call() {
    let dispatch = Dispatch::new().unwrap();
    let (a, mut peer_a) = pair();
    let (b, mut peer_b) = pair();

    let suicide_slot: Rc<RefCell<Option<RegisteredSocket>>> = Rc::new(RefCell::new(None));
    let slot_in_handler = Rc::clone(&suicide_slot);
    let suicide = RegisteredSocket::new(
        &dispatch,
        borrow_fd(&a),
        Box::new(move |_| {
            slot_in_handler.borrow_mut().take();
            Ok(())
        }),
        Events::READABLE,
    )
    .unwrap();
    *suicide_slot.borrow_mut() = Some(suicide);

    let survivor_hits = Rc::new(Cell::new(0));
    let survivor_counter = Rc::clone(&survivor_hits);
    let _survivor = RegisteredSocket::new(
        &dispatch,
        borrow_fd(&b),
        Box::new(move |_| {
            survivor_counter.set(survivor_counter.get() + 1);
            Ok(())
        }),
        Events::READABLE,
    )
    .unwrap();

    // Both fire in the same turn; whichever runs first, the suicide must
    // not corrupt the other's delivery.
    peer_a.write_all(b"x").unwrap();
    peer_b.write_all(b"x").unwrap();
    dispatch.wait(0).unwrap();
    dispatch.run().unwrap();

    assert!(suicide_slot.borrow().is_none(), "the handler destroyed itself");
    assert_eq!(survivor_hits.get(), 1);
    assert_eq!(dispatch.len(), 1);
}

#[test]
fn handler_may_drop_another_handler() {
    let dispatch = Dispatch::new().unwrap();
    let (a, mut peer_a) = pair();
    let (b, mut peer_b) = pair();

    let victim_slot: Rc<RefCell<Option<RegisteredSocket>>> = Rc::new(RefCell::new(None));
    let slot_in_killer = Rc::clone(&victim_slot);
    let _killer = RegisteredSocket::new(
        &dispatch,
        borrow_fd(&a),
        Box::new(move |_| {
            slot_in_killer.borrow_mut().take();
            Ok(())
        }),
        Events::READABLE,
    )
    .unwrap();
    let victim = RegisteredSocket::new(&dispatch, borrow_fd(&b), Box::new(|_| Ok(())), Events::READABLE).unwrap();
    *victim_slot.borrow_mut() = Some(victim);

    peer_a.write_all(b"x").unwrap();
    peer_b.write_all(b"x").unwrap();
    dispatch.wait(0).unwrap();
    // Depending on delivery order the victim may or may not see its event;
    // either way the turn completes and the victim is gone.
    dispatch.run().unwrap();
    assert!(victim_slot.borrow().is_none());
    assert_eq!(dispatch.len(), 1);
}

#[test]
fn handler_errors_propagate_out_of_run() {
    let dispatch = Dispatch::new().unwrap();
    let (a, mut peer) = pair();
    let _sock = RegisteredSocket::new(
        &dispatch,
        borrow_fd(&a),
        Box::new(|_| Err(Error::InvalidArgument("boom".into()))),
        Events::READABLE,
    )
    .unwrap();
    peer.write_all(b"x").unwrap();
    dispatch.wait(0).unwrap();
    assert!(dispatch.run().is_err());
    // the loop stays usable after the error
    dispatch.wait(0).unwrap();
}

#[test]
fn replacing_a_handler_redirects_delivery() {
    let dispatch = Dispatch::new().unwrap();
    let (a, mut peer) = pair();
    let old_hits = Rc::new(Cell::new(0));
    let new_hits = Rc::new(Cell::new(0));

    let old_counter = Rc::clone(&old_hits);
    let sock = RegisteredSocket::new(
        &dispatch,
        borrow_fd(&a),
        Box::new(move |_| {
            old_counter.set(old_counter.get() + 1);
            Ok(())
        }),
        Events::READABLE,
    )
    .unwrap();

    let new_counter = Rc::clone(&new_hits);
    sock.modify(Box::new(move |_| {
        new_counter.set(new_counter.get() + 1);
        Ok(())
    }));

    peer.write_all(b"x").unwrap();
    dispatch.wait(0).unwrap();
    dispatch.run().unwrap();
    assert_eq!(old_hits.get(), 0);
    assert_eq!(new_hits.get(), 1);
}
