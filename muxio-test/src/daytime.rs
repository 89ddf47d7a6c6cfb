//! A daytime service (RFC 867 flavor) built on the public reactor API.
//!
//! On every connection the service reverse-resolves the peer's address
//! first, then writes exactly one date line and closes. A ten-second timer
//! bounds the connection's lifetime whatever happens.

use chrono::{Local, TimeZone};
use muxio::clock::Clock;
use muxio::dispatch::{Dispatch, RegisteredSocket};
use muxio::dns::Dns;
use muxio::error::Result;
use muxio::event::Events;
use muxio::reactor::Reactor;
use muxio::schedule::{Schedule, Timeout};
use muxio::socket::{Address, Endpoint, IoStatus, Ownership, SysSocket};
use muxio::Acceptor;
use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::{debug, info};

const CONNECTION_DEADLINE_SECS: u32 = 10;

/// A daytime listener with a bounded lifetime, like
/// [`EchoServer`](crate::echo::EchoServer).
pub struct DaytimeServer {
    acceptor: Rc<RefCell<Option<Acceptor>>>,
}

impl DaytimeServer {
    pub fn start(reactor: &Reactor, addr: &str, lifetime_secs: u32) -> Result<DaytimeServer> {
        let endpoint = Endpoint::tcp(addr)?;
        let dispatch = reactor.dispatch().clone();
        let schedule = reactor.schedule().clone();
        let clock = reactor.clock().clone();
        let dns = reactor.dns().cloned();
        let conn_dispatch = dispatch.clone();
        let conn_schedule = schedule.clone();
        let acceptor = Acceptor::new(&dispatch, &endpoint, move |fd, peer| {
            DaytimeConnection::adopt(
                &conn_dispatch,
                &conn_schedule,
                &clock,
                dns.as_ref(),
                fd,
                peer,
            )
        })?;
        let slot = Rc::new(RefCell::new(Some(acceptor)));
        let expiring = Rc::clone(&slot);
        schedule.after(lifetime_secs, move || {
            debug!("daytime listener lifetime over");
            expiring.borrow_mut().take();
            Ok(())
        });
        Ok(DaytimeServer { acceptor: slot })
    }

    pub fn stop(&self) {
        self.acceptor.borrow_mut().take();
    }
}

struct DaytimeConnection {
    sock: Option<RegisteredSocket>,
    sys: Rc<SysSocket>,
    deadline: Timeout,
    weak_self: Weak<RefCell<DaytimeConnection>>,
    line: Vec<u8>,
    sent: usize,
}

impl DaytimeConnection {
    fn adopt(
        dispatch: &Dispatch,
        schedule: &Schedule,
        clock: &Clock,
        dns: Option<&Dns>,
        fd: RawFd,
        peer: &Address,
    ) -> Result<()> {
        debug!(socket = fd, peer = %peer, "daytime request");
        let sys = Rc::new(SysSocket::new(fd, Ownership::Borrowed)?);
        let stamp = Local
            .timestamp_opt(clock.now_secs(), 0)
            .single()
            .map(|t| t.format("%d %b %Y %H:%M:%S %Z").to_string())
            .unwrap_or_default();
        let conn = Rc::new(RefCell::new(DaytimeConnection {
            sock: None,
            sys: Rc::clone(&sys),
            deadline: Timeout::new(schedule),
            weak_self: Weak::new(),
            line: format!("{stamp}\r\n").into_bytes(),
            sent: 0,
        }));
        conn.borrow_mut().weak_self = Rc::downgrade(&conn);
        let handler_conn = Rc::clone(&conn);
        let sock = RegisteredSocket::new(
            dispatch,
            Rc::clone(&sys),
            Box::new(move |ev| {
                handler_conn.borrow_mut().on_event(ev);
                Ok(())
            }),
            Events::empty(),
        )?;
        {
            let mut c = conn.borrow_mut();
            c.sock = Some(sock);
            c.arm_deadline();
        }
        match dns {
            // The date line goes out only once we know who asked.
            Some(dns) => {
                let started = Rc::clone(&conn);
                let peer_text = peer.to_string();
                let submitted = dns.query_ptr_addr(peer, move |name| {
                    info!(peer = %peer_text, ?name, "peer resolved");
                    started.borrow_mut().begin_write();
                });
                if let Err(e) = submitted {
                    conn.borrow_mut().close();
                    return Err(e);
                }
            }
            None => conn.borrow_mut().begin_write(),
        }
        sys.set_close_on_drop(true);
        Ok(())
    }

    fn begin_write(&mut self) {
        if let Some(sock) = &self.sock {
            let _ = sock.request(Events::WRITABLE);
        }
        self.arm_deadline();
    }

    fn on_event(&mut self, ev: Events) {
        if let Err(e) = self.advance(ev) {
            debug!(error = %e, "daytime connection error");
            self.close();
        }
    }

    fn advance(&mut self, ev: Events) -> Result<()> {
        if !ev.contains(Events::WRITABLE) || self.sock.is_none() {
            return Ok(());
        }
        let remaining = &self.line[self.sent..];
        if remaining.is_empty() {
            self.close();
            return Ok(());
        }
        match self.sys.write(remaining)? {
            // connection reset by peer
            IoStatus::Closed => self.close(),
            IoStatus::WouldBlock => self.arm_deadline(),
            IoStatus::Transferred(n) => {
                self.sent += n;
                if self.sent == self.line.len() {
                    debug!("date line delivered");
                    self.close();
                } else {
                    self.arm_deadline();
                }
            }
        }
        Ok(())
    }

    fn arm_deadline(&mut self) {
        let weak = self.weak_self.clone();
        self.deadline.after(CONNECTION_DEADLINE_SECS, move || {
            if let Some(conn) = weak.upgrade() {
                debug!("daytime connection deadline; closing");
                conn.borrow_mut().close();
            }
            Ok(())
        });
    }

    fn close(&mut self) {
        self.deadline.cancel();
        self.sock = None;
    }
}
