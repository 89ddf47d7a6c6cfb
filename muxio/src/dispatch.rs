//! Per-descriptor handler dispatch over the demultiplexer.
//!
//! [`Dispatch`] pairs the demultiplexer with a descriptor-to-handler table;
//! the two are updated together, so every registered descriptor has exactly
//! one handler and vice versa. A [`RegisteredSocket`] is the scoped
//! registration: dropping it removes both sides.
//!
//! Handlers run re-entrantly: a handler may register, modify, or drop any
//! socket, including the one it serves. [`Dispatch::run`] looks the handler
//! up again before every invocation and holds no internal borrow while the
//! handler executes, so a handler destroying itself mid-call is safe; events
//! for descriptors whose handler is gone are silently skipped.

use crate::demux::Demux;
use crate::error::{Error, Result};
use crate::event::Events;
use crate::socket::SysSocket;
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::trace;

/// Callback invoked with the events a descriptor received.
pub type Handler = Box<dyn FnMut(Events) -> Result<()>>;

struct Inner {
    demux: Demux,
    handlers: HashMap<RawFd, Rc<RefCell<Handler>>>,
}

/// Shared handle to the event dispatcher. Clones refer to the same state.
#[derive(Clone)]
pub struct Dispatch {
    inner: Rc<RefCell<Inner>>,
}

impl Dispatch {
    pub fn new() -> Result<Dispatch> {
        Ok(Dispatch {
            inner: Rc::new(RefCell::new(Inner {
                demux: Demux::new()?,
                handlers: HashMap::new(),
            })),
        })
    }

    /// Upper bound on the seconds argument to [`wait`](Self::wait).
    pub fn max_timeout(&self) -> u32 {
        Demux::max_timeout()
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.inner.borrow().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().handlers.is_empty()
    }

    /// Deliver every pending event to its handler.
    ///
    /// The first handler error aborts the drain and propagates; remaining
    /// events are delivered by the next call.
    pub fn run(&self) -> Result<()> {
        loop {
            let (fd, ev, handler) = {
                let mut inner = self.inner.borrow_mut();
                loop {
                    match inner.demux.pop_event() {
                        None => return Ok(()),
                        Some((fd, ev)) => {
                            debug_assert!(!ev.is_empty());
                            if let Some(handler) = inner.handlers.get(&fd) {
                                break (fd, ev, Rc::clone(handler));
                            }
                            trace!(socket = fd, "handler no longer exists; events ignored");
                        }
                    }
                }
            };
            trace!(socket = fd, events = %ev, "invoke handler");
            let mut f = handler.borrow_mut();
            (*f)(ev)?;
        }
    }

    /// Block for up to `seconds` until a registered descriptor is ready.
    pub fn wait(&self, seconds: u32) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        trace!(sockets = inner.handlers.len(), seconds, "waiting for events");
        inner.demux.wait(seconds)
    }

    fn register(&self, fd: RawFd, handler: Handler, ev: Events) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.handlers.contains_key(&fd) {
            return Err(Error::InvalidArgument(format!(
                "descriptor {fd} already has a handler"
            )));
        }
        inner.demux.register(fd, ev)?;
        inner.handlers.insert(fd, Rc::new(RefCell::new(handler)));
        Ok(())
    }

    fn unregister(&self, fd: RawFd) {
        let mut inner = self.inner.borrow_mut();
        if inner.handlers.remove(&fd).is_some() {
            // The descriptor may already be closed (the kernel then dropped
            // it from the demux on its own); nothing to do about it here.
            if let Err(e) = inner.demux.unregister(fd) {
                trace!(socket = fd, error = %e, "demux unregister failed");
            }
        }
    }

    fn replace_handler(&self, fd: RawFd, handler: Handler) {
        let mut inner = self.inner.borrow_mut();
        if inner.handlers.contains_key(&fd) {
            inner.handlers.insert(fd, Rc::new(RefCell::new(handler)));
        }
    }

    fn request(&self, fd: RawFd, ev: Events) -> Result<()> {
        self.inner.borrow_mut().demux.modify(fd, ev)
    }
}

/// An event-driven socket: a system socket registered in a [`Dispatch`]
/// together with its handler. Dropping the value unregisters both.
pub struct RegisteredSocket {
    dispatch: Dispatch,
    sys: Rc<SysSocket>,
}

impl RegisteredSocket {
    /// Register `sys` with `handler` for the events in `ev`. The socket is
    /// shared via `Rc` so the handler closure may capture it.
    ///
    /// Registration is atomic: if either the demultiplexer or the handler
    /// table refuses, neither retains the descriptor.
    pub fn new(
        dispatch: &Dispatch,
        sys: Rc<SysSocket>,
        handler: Handler,
        ev: Events,
    ) -> Result<RegisteredSocket> {
        dispatch.register(sys.fd(), handler, ev)?;
        Ok(RegisteredSocket {
            dispatch: dispatch.clone(),
            sys,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.sys.fd()
    }

    pub fn sys(&self) -> &SysSocket {
        &self.sys
    }

    /// Replace the handler, keeping the requested events.
    pub fn modify(&self, handler: Handler) {
        self.dispatch.replace_handler(self.sys.fd(), handler);
    }

    /// Replace the handler and the requested events.
    pub fn modify_with_events(&self, handler: Handler, ev: Events) -> Result<()> {
        self.dispatch.request(self.sys.fd(), ev)?;
        self.dispatch.replace_handler(self.sys.fd(), handler);
        Ok(())
    }

    /// Change the requested events, keeping the handler.
    pub fn request(&self, ev: Events) -> Result<()> {
        self.dispatch.request(self.sys.fd(), ev)
    }
}

impl Drop for RegisteredSocket {
    fn drop(&mut self) {
        self.dispatch.unregister(self.sys.fd());
    }
}
