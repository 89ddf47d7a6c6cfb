//! DNS driver behavior against the mock resolver.

use muxio::reactor::Reactor;
use muxio::resolver::RecordType;
use muxio_test::mock_resolver::MockResolver;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

fn drive(reactor: &Reactor, deadline: Duration) {
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
fn a_lookup_delivers_addresses_once() {
    let mut mock = MockResolver::new();
    mock.answer_a("localhost", &["127.0.0.1"]);
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let deliveries = Rc::new(Cell::new(0));
    let result: Rc<RefCell<Option<Option<Vec<String>>>>> = Rc::new(RefCell::new(None));
    let count = Rc::clone(&deliveries);
    let slot = Rc::clone(&result);
    reactor
        .query_a("localhost", move |addrs| {
            count.set(count.get() + 1);
            *slot.borrow_mut() = Some(addrs);
        })
        .unwrap();

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(deliveries.get(), 1, "exactly one delivery");
    assert_eq!(
        *result.borrow(),
        Some(Some(vec!["127.0.0.1".to_string()])),
    );
    assert!(reactor.is_empty());
}

#[test]
fn nxdomain_is_a_non_null_empty_list() {
    let mock = MockResolver::new();
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let result: Rc<RefCell<Option<Option<Vec<String>>>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    reactor
        .query_a("guaranteed-to-not-exist.invalid", move |addrs| {
            *slot.borrow_mut() = Some(addrs);
        })
        .unwrap();

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(*result.borrow(), Some(Some(Vec::new())));
}

#[test]
fn hard_failures_are_null() {
    let mut mock = MockResolver::new();
    mock.fail("broken.example", RecordType::A);
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let result: Rc<RefCell<Option<Option<Vec<String>>>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    reactor
        .query_a("broken.example", move |addrs| {
            *slot.borrow_mut() = Some(addrs);
        })
        .unwrap();

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(*result.borrow(), Some(None), "delivered, and null");
}

#[test]
fn mx_answers_group_by_ascending_preference() {
    let mut mock = MockResolver::new();
    mock.answer_mx(
        "example.org",
        &[
            (20, "backup.example.org", &["10.0.0.2"][..]),
            (10, "primary.example.org", &["10.0.0.1", "10.0.0.3"][..]),
        ],
    );
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let result = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    reactor
        .query_mx("example.org", move |mxs| {
            *slot.borrow_mut() = mxs;
        })
        .unwrap();

    drive(&reactor, Duration::from_secs(5));
    let mxs = result.borrow().clone().expect("delivered");
    assert_eq!(
        mxs,
        vec![
            (
                "primary.example.org".to_string(),
                vec!["10.0.0.1".to_string(), "10.0.0.3".to_string()]
            ),
            ("backup.example.org".to_string(), vec!["10.0.0.2".to_string()]),
        ]
    );
}

#[test]
fn ptr_lookups_deliver_one_hostname() {
    let mut mock = MockResolver::new();
    mock.answer_ptr("1.0.0.127.in-addr.arpa", "localhost");
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let result = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    reactor
        .query_ptr("1.0.0.127.in-addr.arpa", move |name| {
            *slot.borrow_mut() = name;
        })
        .unwrap();

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(result.borrow().as_deref(), Some("localhost"));
}

#[test]
fn ptr_nodata_is_an_empty_string() {
    let mut mock = MockResolver::new();
    mock.answer_nodata("9.9.9.9.in-addr.arpa", RecordType::Ptr);
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let result: Rc<RefCell<Option<Option<String>>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    reactor
        .query_ptr("9.9.9.9.in-addr.arpa", move |name| {
            *slot.borrow_mut() = Some(name);
        })
        .unwrap();

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(*result.borrow(), Some(Some(String::new())));
}

#[test]
fn timer_driven_resolvers_complete_via_timeouts() {
    let mut mock = MockResolver::with_latency(1);
    mock.answer_a("slow.example", &["192.0.2.7"]);
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let result: Rc<RefCell<Option<Option<Vec<String>>>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    reactor
        .query_a("slow.example", move |addrs| {
            *slot.borrow_mut() = Some(addrs);
        })
        .unwrap();

    // Nothing can be ready before the latency elapses.
    reactor.run().unwrap();
    assert!(result.borrow().is_none());

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(*result.borrow(), Some(Some(vec!["192.0.2.7".to_string()])));
}

#[test]
fn resolver_descriptors_track_the_query_load() {
    let mut mock = MockResolver::new();
    mock.answer_a("localhost", &["127.0.0.1"]);
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    assert_eq!(reactor.dispatch().len(), 0);
    reactor.query_a("localhost", |_| {}).unwrap();
    reactor.run().unwrap();
    assert_eq!(
        reactor.dispatch().len(),
        1,
        "the resolver's descriptor is registered while a query is in flight"
    );

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(
        reactor.dispatch().len(),
        0,
        "all resolver descriptors dropped once the queries drained"
    );
    assert!(reactor.is_empty());
}

#[test]
fn callbacks_may_submit_more_queries() {
    let mut mock = MockResolver::new();
    mock.answer_a("first.example", &["192.0.2.1"]);
    mock.answer_a("second.example", &["192.0.2.2"]);
    let reactor = Rc::new(Reactor::with_resolver(Box::new(mock)).unwrap());

    let second_result: Rc<RefCell<Option<Option<Vec<String>>>>> = Rc::new(RefCell::new(None));
    let chained = Rc::clone(&reactor);
    let slot = Rc::clone(&second_result);
    reactor
        .query_a("first.example", move |_| {
            chained
                .query_a("second.example", move |addrs| {
                    *slot.borrow_mut() = Some(addrs);
                })
                .unwrap();
        })
        .unwrap();

    drive(&reactor, Duration::from_secs(5));
    assert_eq!(
        *second_result.borrow(),
        Some(Some(vec!["192.0.2.2".to_string()]))
    );
}

#[test]
fn dropping_the_reactor_cancels_in_flight_queries() {
    let mut mock = MockResolver::new();
    mock.answer_a("localhost", &["127.0.0.1"]);
    let reactor = Reactor::with_resolver(Box::new(mock)).unwrap();

    let delivered = Rc::new(Cell::new(false));
    let flag = Rc::clone(&delivered);
    reactor
        .query_a("localhost", move |_| {
            flag.set(true);
        })
        .unwrap();

    drop(reactor);
    assert!(!delivered.get(), "the pending callback was dropped, not invoked");
}
