//! I/O demultiplexer backed by `epoll(7)`.

use crate::error::{retry_on_eintr, Errno, Error, Result, SysError};
use crate::event::Events;
use std::collections::HashSet;
use std::mem;
use std::os::fd::RawFd;
use tracing::trace;

/// Ready events received per `epoll_pwait` call.
const EVENT_BUFFER_SIZE: usize = 128;

pub struct Epoll {
    epoll_fd: RawFd,
    registered: HashSet<RawFd>,
    events: [libc::epoll_event; EVENT_BUFFER_SIZE],
    n_events: usize,
    current: usize,
}

impl Epoll {
    pub fn new() -> Result<Epoll> {
        let epoll_fd = retry_on_eintr("epoll_create1(2)", || unsafe {
            libc::epoll_create1(libc::EPOLL_CLOEXEC)
        })?;
        Ok(Epoll {
            epoll_fd,
            registered: HashSet::new(),
            events: unsafe { mem::zeroed() },
            n_events: 0,
            current: 0,
        })
    }

    pub fn max_timeout() -> u32 {
        (i32::MAX / 1000) as u32
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    pub fn register(&mut self, fd: RawFd, ev: Events) -> Result<()> {
        if fd < 0 {
            return Err(Error::InvalidArgument(format!("invalid socket descriptor {fd}")));
        }
        if self.registered.contains(&fd) {
            return Err(Error::InvalidArgument(format!("descriptor {fd} is already registered")));
        }
        trace!(socket = fd, events = %ev, "register socket");
        let mut e = libc::epoll_event {
            events: to_native(ev),
            u64: fd as u64,
        };
        retry_on_eintr("epoll_ctl(EPOLL_CTL_ADD)", || unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut e)
        })?;
        self.registered.insert(fd);
        Ok(())
    }

    pub fn modify(&mut self, fd: RawFd, ev: Events) -> Result<()> {
        if !self.registered.contains(&fd) {
            return Err(Error::InvalidArgument(format!("descriptor {fd} is not registered")));
        }
        trace!(socket = fd, events = %ev, "modify socket");
        let mut e = libc::epoll_event {
            events: to_native(ev),
            u64: fd as u64,
        };
        retry_on_eintr("epoll_ctl(EPOLL_CTL_MOD)", || unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut e)
        })?;
        Ok(())
    }

    pub fn unregister(&mut self, fd: RawFd) -> Result<()> {
        if !self.registered.remove(&fd) {
            return Err(Error::InvalidArgument(format!("descriptor {fd} is not registered")));
        }
        trace!(socket = fd, "unregister socket");
        let mut e = libc::epoll_event { events: 0, u64: fd as u64 };
        retry_on_eintr("epoll_ctl(EPOLL_CTL_DEL)", || unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, &mut e)
        })?;
        Ok(())
    }

    /// Pop one ready descriptor received by the last `wait`. Events for
    /// descriptors unregistered since then are dropped here.
    pub fn pop_event(&mut self) -> Option<(RawFd, Events)> {
        while self.n_events > 0 {
            let raw = self.events[self.current];
            self.current += 1;
            self.n_events -= 1;
            let fd = raw.u64 as RawFd;
            if !self.registered.contains(&fd) {
                trace!(socket = fd, "stale event dropped");
                continue;
            }
            let ev = from_native(raw.events);
            if ev.is_empty() {
                continue;
            }
            trace!(socket = fd, events = %ev, "deliver events");
            return Some((fd, ev));
        }
        None
    }

    /// Block for up to `seconds` until a registered descriptor is ready.
    /// Waits with an empty signal mask so pending signals are deliverable
    /// here and only here.
    pub fn wait(&mut self, seconds: u32) -> Result<()> {
        debug_assert!(seconds <= Self::max_timeout());
        debug_assert_eq!(self.n_events, 0);
        let timeout_ms = i32::try_from(i64::from(seconds) * 1000).unwrap_or(i32::MAX);
        let mut mask: libc::sigset_t = unsafe { mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut mask);
        }
        let rc = unsafe {
            libc::epoll_pwait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                EVENT_BUFFER_SIZE as libc::c_int,
                timeout_ms,
                &mask,
            )
        };
        trace!(rc, "epoll_pwait returned");
        if rc < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(());
            }
            return Err(SysError::new("epoll_pwait(2)", errno).into());
        }
        self.n_events = rc as usize;
        self.current = 0;
        Ok(())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

fn to_native(ev: Events) -> u32 {
    let mut bits = 0u32;
    if ev.contains(Events::READABLE) {
        bits |= libc::EPOLLIN as u32;
    }
    if ev.contains(Events::WRITABLE) {
        bits |= libc::EPOLLOUT as u32;
    }
    if ev.contains(Events::PRIDATA) {
        bits |= libc::EPOLLPRI as u32;
    }
    bits
}

fn from_native(bits: u32) -> Events {
    let mut ev = Events::empty();
    if bits & (libc::EPOLLIN | libc::EPOLLRDNORM) as u32 != 0 {
        ev |= Events::READABLE;
    }
    if bits & (libc::EPOLLOUT | libc::EPOLLWRNORM) as u32 != 0 {
        ev |= Events::WRITABLE;
    }
    if bits & (libc::EPOLLPRI | libc::EPOLLRDBAND) as u32 != 0 {
        ev |= Events::PRIDATA;
    }
    // Error and hangup are reported unsolicited; surface them as read/write
    // readiness so the handler observes the failure from its next I/O call.
    if bits & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
        ev |= Events::READABLE | Events::WRITABLE;
    }
    ev
}
