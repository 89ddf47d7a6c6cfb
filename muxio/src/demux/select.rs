//! I/O demultiplexer backed by `select(2)`.
//!
//! Keeps three request bitmaps and a running highest descriptor; `wait`
//! copies the request bitmaps into result snapshots and issues one syscall,
//! and `pop_event` scans the snapshots from zero up to the high-water mark.

use crate::error::{Errno, Error, Result, SysError};
use crate::event::Events;
use crate::signals::UnblockSignals;
use std::collections::BTreeMap;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use tracing::trace;

pub struct Select {
    req_read: libc::fd_set,
    req_write: libc::fd_set,
    req_except: libc::fd_set,
    recv_read: libc::fd_set,
    recv_write: libc::fd_set,
    recv_except: libc::fd_set,
    registered: BTreeMap<RawFd, Events>,
    max_fd: RawFd,
    current: RawFd,
    n_events: usize,
}

impl Select {
    pub fn new() -> Result<Select> {
        let mut s = Select {
            req_read: unsafe { mem::zeroed() },
            req_write: unsafe { mem::zeroed() },
            req_except: unsafe { mem::zeroed() },
            recv_read: unsafe { mem::zeroed() },
            recv_write: unsafe { mem::zeroed() },
            recv_except: unsafe { mem::zeroed() },
            registered: BTreeMap::new(),
            max_fd: -1,
            current: 0,
            n_events: 0,
        };
        unsafe {
            libc::FD_ZERO(&mut s.req_read);
            libc::FD_ZERO(&mut s.req_write);
            libc::FD_ZERO(&mut s.req_except);
        }
        Ok(s)
    }

    pub fn max_timeout() -> u32 {
        i32::MAX as u32
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
        if fd >= libc::FD_SETSIZE as RawFd {
            return Err(Error::InvalidArgument(format!(
                "descriptor {fd} exceeds FD_SETSIZE"
            )));
        }
        if self.registered.contains_key(&fd) {
            return Err(Error::InvalidArgument(format!("descriptor {fd} is already registered")));
        }
        trace!(socket = fd, events = %ev, "register socket");
        self.registered.insert(fd, ev);
        self.apply(fd, ev);
        self.max_fd = self.max_fd.max(fd);
        Ok(())
    }

    pub fn modify(&mut self, fd: RawFd, ev: Events) -> Result<()> {
        if !self.registered.contains_key(&fd) {
            return Err(Error::InvalidArgument(format!("descriptor {fd} is not registered")));
        }
        trace!(socket = fd, events = %ev, "modify socket");
        self.registered.insert(fd, ev);
        self.apply(fd, ev);
        Ok(())
    }

    pub fn unregister(&mut self, fd: RawFd) -> Result<()> {
        if self.registered.remove(&fd).is_none() {
            return Err(Error::InvalidArgument(format!("descriptor {fd} is not registered")));
        }
        trace!(socket = fd, "unregister socket");
        self.apply(fd, Events::empty());
        if fd == self.max_fd {
            self.max_fd = self.registered.keys().next_back().copied().unwrap_or(-1);
            trace!(max_fd = self.max_fd, "new high-water mark");
        }
        Ok(())
    }

    fn apply(&mut self, fd: RawFd, ev: Events) {
        unsafe {
            if ev.contains(Events::READABLE) {
                libc::FD_SET(fd, &mut self.req_read);
            } else {
                libc::FD_CLR(fd, &mut self.req_read);
            }
            if ev.contains(Events::WRITABLE) {
                libc::FD_SET(fd, &mut self.req_write);
            } else {
                libc::FD_CLR(fd, &mut self.req_write);
            }
            if ev.contains(Events::PRIDATA) {
                libc::FD_SET(fd, &mut self.req_except);
            } else {
                libc::FD_CLR(fd, &mut self.req_except);
            }
        }
    }

    /// Scan the result bitmaps from zero to the high-water mark.
    pub fn pop_event(&mut self) -> Option<(RawFd, Events)> {
        while self.n_events > 0 {
            if self.current > self.max_fd {
                self.n_events = 0;
                break;
            }
            let fd = self.current;
            self.current += 1;
            let mut ev = Events::empty();
            unsafe {
                if libc::FD_ISSET(fd, &self.recv_read) {
                    self.n_events = self.n_events.saturating_sub(1);
                    ev |= Events::READABLE;
                }
                if libc::FD_ISSET(fd, &self.recv_write) {
                    self.n_events = self.n_events.saturating_sub(1);
                    ev |= Events::WRITABLE;
                }
                if libc::FD_ISSET(fd, &self.recv_except) {
                    self.n_events = self.n_events.saturating_sub(1);
                    ev |= Events::PRIDATA;
                }
            }
            if ev.is_empty() {
                continue;
            }
            if !self.registered.contains_key(&fd) {
                trace!(socket = fd, "stale event dropped");
                continue;
            }
            trace!(socket = fd, events = %ev, "deliver events");
            return Some((fd, ev));
        }
        None
    }

    /// Block for up to `seconds`. `select` carries no signal mask, so the
    /// syscall runs inside an unblock-signals scope to keep signals
    /// deliverable during the wait.
    pub fn wait(&mut self, seconds: u32) -> Result<()> {
        debug_assert!(seconds <= Self::max_timeout());
        debug_assert_eq!(self.n_events, 0);
        let mut tv = libc::timeval {
            tv_sec: i64::from(seconds) as libc::time_t,
            tv_usec: 0,
        };
        if self.max_fd < 0 {
            let _signal_scope = UnblockSignals::new()?;
            unsafe {
                libc::select(0, ptr::null_mut(), ptr::null_mut(), ptr::null_mut(), &mut tv);
            }
            return Ok(());
        }
        self.recv_read = self.req_read;
        self.recv_write = self.req_write;
        self.recv_except = self.req_except;
        let rc = {
            let _signal_scope = UnblockSignals::new()?;
            unsafe {
                libc::select(
                    self.max_fd + 1,
                    &mut self.recv_read,
                    &mut self.recv_write,
                    &mut self.recv_except,
                    &mut tv,
                )
            }
        };
        trace!(rc, "select returned");
        if rc < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(());
            }
            return Err(SysError::new("select(2)", errno).into());
        }
        self.n_events = rc as usize;
        self.current = 0;
        Ok(())
    }
}
