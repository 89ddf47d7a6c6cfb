//! A TCP echo service built on the public reactor API.
//!
//! Each connection reads a chunk, switches the socket to writable, writes
//! the chunk back, and switches back to readable. An idle timer closes the
//! connection when nothing happens for a while; end of stream or any I/O
//! error closes it immediately. The handler drops its own registration to
//! close down, which is exactly the self-removal the dispatcher must
//! tolerate.

use muxio::dispatch::{Dispatch, RegisteredSocket};
use muxio::error::Result;
use muxio::event::Events;
use muxio::reactor::Reactor;
use muxio::schedule::{Schedule, Timeout};
use muxio::socket::{Address, Endpoint, IoStatus, Ownership, SysSocket};
use muxio::Acceptor;
use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::debug;

const BUF_SIZE: usize = 1024;

/// An echo listener with a bounded lifetime: it stops accepting after
/// `lifetime_secs` so a driving loop runs dry on its own.
pub struct EchoServer {
    acceptor: Rc<RefCell<Option<Acceptor>>>,
}

impl EchoServer {
    pub fn start(reactor: &Reactor, addr: &str, lifetime_secs: u32, idle_secs: u32) -> Result<EchoServer> {
        let endpoint = Endpoint::tcp(addr)?;
        let dispatch = reactor.dispatch().clone();
        let schedule = reactor.schedule().clone();
        let conn_dispatch = dispatch.clone();
        let conn_schedule = schedule.clone();
        let acceptor = Acceptor::new(&dispatch, &endpoint, move |fd, peer| {
            EchoConnection::adopt(&conn_dispatch, &conn_schedule, fd, peer, idle_secs)
        })?;
        let slot = Rc::new(RefCell::new(Some(acceptor)));
        let expiring = Rc::clone(&slot);
        schedule.after(lifetime_secs, move || {
            debug!("echo listener lifetime over");
            expiring.borrow_mut().take();
            Ok(())
        });
        Ok(EchoServer { acceptor: slot })
    }

    /// Stop accepting immediately.
    pub fn stop(&self) {
        self.acceptor.borrow_mut().take();
    }
}

struct EchoConnection {
    sock: Option<RegisteredSocket>,
    sys: Rc<SysSocket>,
    idle: Timeout,
    idle_secs: u32,
    weak_self: Weak<RefCell<EchoConnection>>,
    buf: [u8; BUF_SIZE],
    len: usize,
    gap: usize,
}

impl EchoConnection {
    fn adopt(
        dispatch: &Dispatch,
        schedule: &Schedule,
        fd: RawFd,
        peer: &Address,
        idle_secs: u32,
    ) -> Result<()> {
        debug!(socket = fd, peer = %peer, "start echo handler");
        // Borrowed until fully set up, so an error here leaves closing the
        // descriptor to the acceptor.
        let sys = Rc::new(SysSocket::new(fd, Ownership::Borrowed)?);
        let conn = Rc::new(RefCell::new(EchoConnection {
            sock: None,
            sys: Rc::clone(&sys),
            idle: Timeout::new(schedule),
            idle_secs,
            weak_self: Weak::new(),
            buf: [0; BUF_SIZE],
            len: 0,
            gap: 0,
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
            Events::READABLE,
        )?;
        {
            let mut c = conn.borrow_mut();
            c.sock = Some(sock);
            c.rearm_idle();
        }
        sys.set_close_on_drop(true);
        Ok(())
    }

    fn on_event(&mut self, ev: Events) {
        if let Err(e) = self.advance(ev) {
            debug!(error = %e, "echo connection error");
            self.close();
        }
    }

    fn advance(&mut self, ev: Events) -> Result<()> {
        if ev.contains(Events::READABLE) && self.len == 0 {
            match self.sys.read(&mut self.buf)? {
                IoStatus::Closed => {
                    debug!("peer closed; echo handler done");
                    self.close();
                    return Ok(());
                }
                IoStatus::WouldBlock => {}
                IoStatus::Transferred(n) => {
                    self.len = n;
                    if let Some(sock) = &self.sock {
                        sock.request(Events::WRITABLE)?;
                    }
                }
            }
        }
        if ev.contains(Events::WRITABLE) && self.len > 0 {
            match self.sys.write(&self.buf[self.gap..self.gap + self.len])? {
                IoStatus::Closed => {
                    self.close();
                    return Ok(());
                }
                IoStatus::WouldBlock => {}
                IoStatus::Transferred(n) => {
                    self.gap += n;
                    self.len -= n;
                    if self.len == 0 {
                        self.gap = 0;
                        if let Some(sock) = &self.sock {
                            sock.request(Events::READABLE)?;
                        }
                    }
                }
            }
        }
        if self.sock.is_some() {
            self.rearm_idle();
        }
        Ok(())
    }

    fn rearm_idle(&mut self) {
        let weak = self.weak_self.clone();
        self.idle.after(self.idle_secs, move || {
            if let Some(conn) = weak.upgrade() {
                debug!("echo connection idle; closing");
                conn.borrow_mut().close();
            }
            Ok(())
        });
    }

    fn close(&mut self) {
        self.idle.cancel();
        self.sock = None;
    }
}
