//! The DNS driver: integrates an external [`Resolver`] into the reactor.
//!
//! The driver owns the query bookkeeping the resolver cannot do for us:
//! which completion callback belongs to which query id, which of the
//! resolver's descriptors are currently registered in the dispatcher, and
//! the single timer tracking the resolver's next internal deadline. Once
//! per loop turn, [`Dns::run`] reconciles those registrations against what
//! the resolver asked for via `before_poll`, so that after every turn the
//! registered set equals the requested set exactly.
//!
//! The resolver owns its descriptors; the driver registers them with
//! close-on-drop disabled and never closes them.
//!
//! Answers are delivered exactly once per query while the driver is alive.
//! Dropping the driver cancels everything in flight; callbacks that were
//! never invoked are simply dropped.

use crate::clock::Clock;
use crate::dispatch::{Dispatch, Handler, RegisteredSocket};
use crate::error::Result;
use crate::event::Events;
use crate::resolver::{
    Answer, AnswerStatus, BeforePoll, Check, PollSpec, QueryFlags, QueryId, Record, RecordType,
    Resolver,
};
use crate::schedule::{Schedule, Timeout};
use crate::socket::{Address, Ownership, SysSocket};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Initial size of the scratch buffer handed to `before_poll`.
const RECOMMENDED_POLL_FDS: usize = 2;

/// A list of textual host addresses (A lookups).
pub type HostAddrList = Vec<String>;
/// One MX target: mail host plus its addresses.
pub type MxName = (String, Vec<String>);
/// MX targets ordered by ascending preference.
pub type MxNameList = Vec<MxName>;

type AnswerCallback = Box<dyn FnOnce(Answer)>;
type Completion = (AnswerCallback, Answer);

struct Inner {
    resolver: Box<dyn Resolver>,
    dispatch: Dispatch,
    clock: Clock,
    timeout: Timeout,
    queries: HashMap<QueryId, AnswerCallback>,
    registered: BTreeMap<RawFd, RegisteredSocket>,
    pfds: Vec<PollSpec>,
    weak_self: Weak<RefCell<Inner>>,
}

enum ReconcileStep {
    /// Registrations and the timer match the resolver's wishes.
    Settled,
    /// The resolver reported a zero timeout; timeouts must be processed and
    /// reconciliation repeated.
    TimeoutsDue,
}

/// Shared handle to the DNS driver. Clones refer to the same state.
#[derive(Clone)]
pub struct Dns {
    inner: Rc<RefCell<Inner>>,
}

impl Dns {
    pub fn new(
        dispatch: &Dispatch,
        schedule: &Schedule,
        clock: &Clock,
        resolver: Box<dyn Resolver>,
    ) -> Dns {
        let dns = Dns {
            inner: Rc::new(RefCell::new(Inner {
                resolver,
                dispatch: dispatch.clone(),
                clock: clock.clone(),
                timeout: Timeout::new(schedule),
                queries: HashMap::new(),
                registered: BTreeMap::new(),
                pfds: vec![PollSpec::default(); RECOMMENDED_POLL_FDS],
                weak_self: Weak::new(),
            })),
        };
        dns.inner.borrow_mut().weak_self = Rc::downgrade(&dns.inner);
        dns
    }

    /// True when no queries are in flight.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queries.is_empty()
    }

    /// Look up the A records of `owner`. The callback receives the
    /// addresses in textual form; an empty list means the name exists but
    /// resolves to nothing (or does not exist), `None` means the lookup
    /// failed.
    pub fn query_a(&self, owner: &str, h: impl FnOnce(Option<HostAddrList>) + 'static) -> Result<()> {
        trace!(owner, "request A record");
        self.submit(owner, RecordType::A, QueryFlags::empty(), adapt_a(Box::new(h)))
    }

    /// Like [`query_a`](Self::query_a), but refuses CNAME indirection.
    pub fn query_a_no_cname(
        &self,
        owner: &str,
        h: impl FnOnce(Option<HostAddrList>) + 'static,
    ) -> Result<()> {
        trace!(owner, "request A record (no cname)");
        self.submit(owner, RecordType::A, QueryFlags::CNAME_FORBID, adapt_a(Box::new(h)))
    }

    /// Look up the MX records of `owner`, grouped by ascending preference.
    pub fn query_mx(&self, owner: &str, h: impl FnOnce(Option<MxNameList>) + 'static) -> Result<()> {
        trace!(owner, "request MX record");
        self.submit(owner, RecordType::Mx, QueryFlags::empty(), adapt_mx(Box::new(h)))
    }

    /// Look up the PTR record of `owner` (an in-addr.arpa style name).
    pub fn query_ptr(&self, owner: &str, h: impl FnOnce(Option<String>) + 'static) -> Result<()> {
        trace!(owner, "request PTR record");
        self.submit(owner, RecordType::Ptr, QueryFlags::empty(), adapt_ptr(Box::new(h)))
    }

    /// Look up the hostname of an address (reverse lookup).
    pub fn query_ptr_addr(&self, addr: &Address, h: impl FnOnce(Option<String>) + 'static) -> Result<()> {
        trace!(addr = %addr, "request PTR record by address");
        let mut inner = self.inner.borrow_mut();
        let now = inner.clock.now();
        let qid = inner.resolver.submit_reverse(addr, now)?;
        inner.queries.insert(qid, adapt_ptr(Box::new(h)));
        Ok(())
    }

    fn submit(&self, owner: &str, rrtype: RecordType, flags: QueryFlags, cb: AnswerCallback) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let now = inner.clock.now();
        let qid = inner.resolver.submit(owner, rrtype, flags, now)?;
        inner.queries.insert(qid, cb);
        Ok(())
    }

    /// Reconcile descriptor registrations and the deadline timer with the
    /// resolver's current needs. Called once per loop turn.
    pub fn run(&self) -> Result<()> {
        loop {
            let completions = {
                let mut inner = self.inner.borrow_mut();
                match inner.reconcile()? {
                    ReconcileStep::Settled => break,
                    ReconcileStep::TimeoutsDue => {
                        let now = inner.clock.now();
                        inner.resolver.process_timeouts(now)?;
                        inner.collect_completions()?
                    }
                }
            };
            deliver(completions);
        }
        Ok(())
    }
}

impl Inner {
    fn reconcile(&mut self) -> Result<ReconcileStep> {
        trace!(
            queries = self.queries.len(),
            sockets = self.registered.len(),
            "reconcile resolver state"
        );
        self.timeout.cancel();
        if self.queries.is_empty() {
            self.registered.clear();
            return Ok(ReconcileStep::Settled);
        }

        // Ask which descriptors and which deadline the resolver wants,
        // growing the scratch buffer until the list fits.
        let now = self.clock.now();
        let (count, timeout_ms) = loop {
            match self.resolver.before_poll(&mut self.pfds, now)? {
                BeforePoll::BufferTooSmall { needed } => {
                    let target = needed.max(self.pfds.len() + 1);
                    trace!(from = self.pfds.len(), to = target, "grow pollfd buffer");
                    self.pfds.resize(target, PollSpec::default());
                }
                BeforePoll::Filled { count, timeout_ms } => {
                    break (count.min(self.pfds.len()), timeout_ms);
                }
            }
        };
        trace!(sockets = count, ?timeout_ms, "resolver wishes");

        match timeout_ms {
            Some(0) => return Ok(ReconcileStep::TimeoutsDue),
            Some(ms) => {
                let seconds = ms.div_ceil(1000);
                self.arm_timeout(seconds);
            }
            None => {}
        }

        // Merge the requested set against the registered one: drop stale
        // registrations, update masks, register newcomers.
        let wanted: BTreeMap<RawFd, Events> =
            self.pfds[..count].iter().map(|p| (p.fd, p.events)).collect();
        self.registered.retain(|fd, _| {
            let keep = wanted.contains_key(fd);
            if !keep {
                trace!(socket = fd, "resolver socket no longer required");
            }
            keep
        });
        for (&fd, &ev) in &wanted {
            if let Some(sock) = self.registered.get(&fd) {
                sock.request(ev)?;
            } else {
                self.register_fd(fd, ev)?;
            }
        }
        Ok(ReconcileStep::Settled)
    }

    fn arm_timeout(&mut self, seconds: u32) {
        let weak = self.weak_self.clone();
        self.timeout.after(seconds, move || {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let completions = {
                let mut inner = inner.borrow_mut();
                trace!("process resolver timeouts");
                let now = inner.clock.now();
                inner.resolver.process_timeouts(now)?;
                inner.collect_completions()?
            };
            deliver(completions);
            Ok(())
        });
    }

    fn register_fd(&mut self, fd: RawFd, ev: Events) -> Result<()> {
        trace!(socket = fd, events = %ev, "register resolver socket");
        debug_assert!(!ev.is_empty());
        let weak = self.weak_self.clone();
        let handler: Handler = Box::new(move |ev| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let completions = {
                let mut inner = inner.borrow_mut();
                inner.process_fd(fd, ev)?
            };
            deliver(completions);
            Ok(())
        });
        // The resolver owns this descriptor; never close it.
        let sys = SysSocket::new(fd, Ownership::Borrowed)?;
        let sock = RegisteredSocket::new(&self.dispatch, Rc::new(sys), handler, ev)?;
        self.registered.insert(fd, sock);
        Ok(())
    }

    fn process_fd(&mut self, fd: RawFd, ev: Events) -> Result<Vec<Completion>> {
        trace!(socket = fd, events = %ev, "process resolver events");
        let now = self.clock.now();
        if ev.contains(Events::READABLE) {
            self.resolver.process_readable(fd, now)?;
        }
        if ev.contains(Events::WRITABLE) {
            self.resolver.process_writable(fd, now)?;
        }
        if ev.contains(Events::PRIDATA) {
            self.resolver.process_exceptional(fd, now)?;
        }
        self.collect_completions()
    }

    /// Drain the resolver's completion queue. The callbacks are returned
    /// rather than invoked so the caller can release its borrow first: a
    /// callback may re-enter the driver to submit new queries.
    fn collect_completions(&mut self) -> Result<Vec<Completion>> {
        let mut out = Vec::new();
        loop {
            match self.resolver.check()? {
                Check::Pending => break,
                Check::Idle => {
                    self.registered.clear();
                    break;
                }
                Check::Completed(qid, answer) => {
                    debug!(qid = qid.0, status = ?answer.status, "query completed");
                    match self.queries.remove(&qid) {
                        Some(cb) => out.push((cb, answer)),
                        None => trace!(qid = qid.0, "completion without a pending handler"),
                    }
                }
            }
        }
        Ok(out)
    }
}

fn deliver(completions: Vec<Completion>) {
    for (cb, answer) in completions {
        cb(answer);
    }
}

fn adapt_a(h: Box<dyn FnOnce(Option<HostAddrList>)>) -> AnswerCallback {
    Box::new(move |answer: Answer| match answer.status {
        AnswerStatus::Success => {
            let addrs = answer
                .records
                .iter()
                .filter_map(|r| match r {
                    Record::A(ip) => Some(ip.to_string()),
                    _ => None,
                })
                .collect();
            h(Some(addrs));
        }
        AnswerStatus::NxDomain | AnswerStatus::NoData => h(Some(Vec::new())),
        AnswerStatus::Failure => h(None),
    })
}

fn adapt_mx(h: Box<dyn FnOnce(Option<MxNameList>)>) -> AnswerCallback {
    Box::new(move |answer: Answer| match answer.status {
        AnswerStatus::Success => {
            let mut by_preference: BTreeMap<u16, MxNameList> = BTreeMap::new();
            for record in &answer.records {
                if let Record::Mx {
                    preference,
                    host,
                    addresses,
                } = record
                {
                    by_preference.entry(*preference).or_default().push((
                        host.clone(),
                        addresses.iter().map(|a| a.to_string()).collect(),
                    ));
                }
            }
            h(Some(by_preference.into_values().flatten().collect()));
        }
        AnswerStatus::NxDomain | AnswerStatus::NoData => h(Some(Vec::new())),
        AnswerStatus::Failure => h(None),
    })
}

fn adapt_ptr(h: Box<dyn FnOnce(Option<String>)>) -> AnswerCallback {
    Box::new(move |answer: Answer| match answer.status {
        AnswerStatus::Success => {
            let name = answer.records.into_iter().find_map(|r| match r {
                Record::Ptr(name) => Some(name),
                _ => None,
            });
            h(name);
        }
        // The empty string with success indication: the address has no name.
        AnswerStatus::NxDomain | AnswerStatus::NoData => h(Some(String::new())),
        AnswerStatus::Failure => h(None),
    })
}
