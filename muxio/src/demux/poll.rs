//! I/O demultiplexer backed by `poll(2)`.
//!
//! Registrations live in a contiguous `pollfd` array with a side map from
//! descriptor to array index; unregistration swaps the last entry into the
//! freed slot and patches the moved entry's index.

use crate::error::{Errno, Error, Result, SysError};
use crate::event::Events;
#[cfg(not(target_os = "linux"))]
use crate::signals::UnblockSignals;
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::mem;
use std::os::fd::RawFd;
use tracing::trace;

pub struct Poll {
    pfds: Vec<libc::pollfd>,
    indices: HashMap<RawFd, usize>,
    n_events: usize,
    current: usize,
}

impl Poll {
    pub fn new() -> Result<Poll> {
        Ok(Poll {
            pfds: Vec::new(),
            indices: HashMap::new(),
            n_events: 0,
            current: 0,
        })
    }

    pub fn max_timeout() -> u32 {
        (i32::MAX / 1000) as u32
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn register(&mut self, fd: RawFd, ev: Events) -> Result<()> {
        if fd < 0 {
            return Err(Error::InvalidArgument(format!("invalid socket descriptor {fd}")));
        }
        if self.indices.contains_key(&fd) {
            return Err(Error::InvalidArgument(format!("descriptor {fd} is already registered")));
        }
        trace!(socket = fd, events = %ev, "register socket");
        self.indices.insert(fd, self.pfds.len());
        self.pfds.push(libc::pollfd {
            fd,
            events: to_native(ev),
            revents: 0,
        });
        Ok(())
    }

    pub fn modify(&mut self, fd: RawFd, ev: Events) -> Result<()> {
        let &index = self
            .indices
            .get(&fd)
            .ok_or_else(|| Error::InvalidArgument(format!("descriptor {fd} is not registered")))?;
        trace!(socket = fd, events = %ev, "modify socket");
        self.pfds[index].events = to_native(ev);
        Ok(())
    }

    pub fn unregister(&mut self, fd: RawFd) -> Result<()> {
        let index = self
            .indices
            .remove(&fd)
            .ok_or_else(|| Error::InvalidArgument(format!("descriptor {fd} is not registered")))?;
        trace!(socket = fd, "unregister socket");
        let last = self.pfds.len() - 1;
        if index != last {
            let moved = self.pfds[last];
            self.pfds[index] = moved;
            self.indices.insert(moved.fd, index);
        }
        self.pfds.truncate(last);
        Ok(())
    }

    /// Walk forward from the cursor to the next entry with pending
    /// `revents`. Entries whose descriptor was unregistered since the last
    /// `wait` are skipped.
    pub fn pop_event(&mut self) -> Option<(RawFd, Events)> {
        while self.n_events > 0 {
            if self.current >= self.pfds.len() {
                self.n_events = 0;
                break;
            }
            let pfd = self.pfds[self.current];
            self.current += 1;
            if pfd.revents == 0 {
                continue;
            }
            self.pfds[self.current - 1].revents = 0;
            self.n_events -= 1;
            let ev = from_native(pfd.revents);
            if ev.is_empty() {
                continue;
            }
            if !self.indices.contains_key(&pfd.fd) {
                trace!(socket = pfd.fd, "stale event dropped");
                continue;
            }
            trace!(socket = pfd.fd, events = %ev, "deliver events");
            return Some((pfd.fd, ev));
        }
        None
    }

    /// Block for up to `seconds`. On Linux this is `ppoll(2)` with an empty
    /// signal mask; elsewhere, plain `poll(2)` inside an unblock-signals
    /// scope. Either way, pending signals are deliverable here and only
    /// here.
    pub fn wait(&mut self, seconds: u32) -> Result<()> {
        debug_assert!(seconds <= Self::max_timeout());
        debug_assert_eq!(self.n_events, 0);
        #[cfg(target_os = "linux")]
        let rc = {
            let ts = libc::timespec {
                tv_sec: i64::from(seconds) as libc::time_t,
                tv_nsec: 0,
            };
            let mut mask: libc::sigset_t = unsafe { mem::zeroed() };
            unsafe {
                libc::sigemptyset(&mut mask);
            }
            unsafe {
                libc::ppoll(
                    self.pfds.as_mut_ptr(),
                    self.pfds.len() as libc::nfds_t,
                    &ts,
                    &mask,
                )
            }
        };
        #[cfg(not(target_os = "linux"))]
        let rc = {
            let timeout_ms = i32::try_from(i64::from(seconds) * 1000).unwrap_or(i32::MAX);
            let _signal_scope = UnblockSignals::new()?;
            unsafe {
                libc::poll(
                    self.pfds.as_mut_ptr(),
                    self.pfds.len() as libc::nfds_t,
                    timeout_ms,
                )
            }
        };
        trace!(rc, "poll returned");
        if rc < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(());
            }
            return Err(SysError::new("poll(2)", errno).into());
        }
        self.n_events = rc as usize;
        self.current = 0;
        Ok(())
    }
}

fn to_native(ev: Events) -> libc::c_short {
    let mut bits: libc::c_short = 0;
    if ev.contains(Events::READABLE) {
        bits |= libc::POLLIN;
    }
    if ev.contains(Events::WRITABLE) {
        bits |= libc::POLLOUT;
    }
    if ev.contains(Events::PRIDATA) {
        bits |= libc::POLLPRI;
    }
    bits
}

fn from_native(bits: libc::c_short) -> Events {
    let mut ev = Events::empty();
    if bits & (libc::POLLIN | libc::POLLRDNORM) != 0 {
        ev |= Events::READABLE;
    }
    if bits & (libc::POLLOUT | libc::POLLWRNORM) != 0 {
        ev |= Events::WRITABLE;
    }
    if bits & (libc::POLLPRI | libc::POLLRDBAND) != 0 {
        ev |= Events::PRIDATA;
    }
    // Error, hangup, and invalid-descriptor conditions surface as read/write
    // readiness so the handler observes the failure from its next I/O call.
    if bits & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        ev |= Events::READABLE | Events::WRITABLE;
    }
    ev
}
