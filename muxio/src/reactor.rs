//! The reactor core: clock, timers, dispatch, and DNS behind one loop.

use crate::clock::Clock;
use crate::dispatch::Dispatch;
use crate::dns::{Dns, HostAddrList, MxNameList};
use crate::error::{Error, Result};
use crate::resolver::Resolver;
use crate::schedule::Schedule;
use crate::socket::Address;

/// The composite event loop.
///
/// One turn of the loop is `run` followed by `wait`: `run` drains pending
/// socket events and due timers and reconciles the DNS driver, returning
/// how long the loop may sleep; `wait` blocks at most that long in the
/// demultiplexer and then advances the clock. A reactor is single-threaded;
/// independent reactors in different threads do not interact.
pub struct Reactor {
    clock: Clock,
    schedule: Schedule,
    dispatch: Dispatch,
    dns: Option<Dns>,
}

impl Reactor {
    /// A reactor without DNS support.
    pub fn new() -> Result<Reactor> {
        let clock = Clock::new();
        let schedule = Schedule::new(clock.clone());
        let dispatch = Dispatch::new()?;
        Ok(Reactor {
            clock,
            schedule,
            dispatch,
            dns: None,
        })
    }

    /// A reactor with an asynchronous DNS resolver attached.
    pub fn with_resolver(resolver: Box<dyn Resolver>) -> Result<Reactor> {
        let mut reactor = Reactor::new()?;
        reactor.dns = Some(Dns::new(
            &reactor.dispatch,
            &reactor.schedule,
            &reactor.clock,
            resolver,
        ));
        Ok(reactor)
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn dns(&self) -> Option<&Dns> {
        self.dns.as_ref()
    }

    /// True when no socket is registered, no timer is pending, and no DNS
    /// query is in flight: the loop has nothing left to do.
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
            && self.dispatch.is_empty()
            && self.dns.as_ref().map_or(true, Dns::is_empty)
    }

    /// Perform one turn of event delivery and return how many seconds
    /// [`wait`](Self::wait) may sleep. Zero means nothing is pending.
    pub fn run(&self) -> Result<u32> {
        self.dispatch.run()?;
        self.schedule.run()?;
        if let Some(dns) = &self.dns {
            dns.run()?;
        }
        // Second pass: the DNS driver may have armed or cancelled its
        // deadline timer, which changes how long we may sleep.
        let mut timeout = self.schedule.run()?;
        if self.schedule.is_empty() {
            if self.dispatch.is_empty() {
                debug_assert_eq!(timeout, 0);
            } else {
                timeout = self.dispatch.max_timeout();
            }
        }
        Ok(timeout.min(self.dispatch.max_timeout()))
    }

    /// Block for up to `seconds` until an event arrives, then advance the
    /// clock. The reactor's only suspension point.
    pub fn wait(&self, seconds: u32) -> Result<()> {
        self.dispatch.wait(seconds)?;
        self.clock.update();
        Ok(())
    }

    /// Look up A records; see [`Dns::query_a`].
    pub fn query_a(&self, owner: &str, h: impl FnOnce(Option<HostAddrList>) + 'static) -> Result<()> {
        self.resolver()?.query_a(owner, h)
    }

    /// Look up A records without CNAME indirection; see
    /// [`Dns::query_a_no_cname`].
    pub fn query_a_no_cname(
        &self,
        owner: &str,
        h: impl FnOnce(Option<HostAddrList>) + 'static,
    ) -> Result<()> {
        self.resolver()?.query_a_no_cname(owner, h)
    }

    /// Look up MX records; see [`Dns::query_mx`].
    pub fn query_mx(&self, owner: &str, h: impl FnOnce(Option<MxNameList>) + 'static) -> Result<()> {
        self.resolver()?.query_mx(owner, h)
    }

    /// Look up a PTR record by owner name; see [`Dns::query_ptr`].
    pub fn query_ptr(&self, owner: &str, h: impl FnOnce(Option<String>) + 'static) -> Result<()> {
        self.resolver()?.query_ptr(owner, h)
    }

    /// Reverse-look-up an address; see [`Dns::query_ptr_addr`].
    pub fn query_ptr_addr(&self, addr: &Address, h: impl FnOnce(Option<String>) + 'static) -> Result<()> {
        self.resolver()?.query_ptr_addr(addr, h)
    }

    fn resolver(&self) -> Result<&Dns> {
        self.dns
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("reactor was built without a DNS resolver".into()))
    }
}
