//! Accepting incoming stream connections.

use crate::dispatch::{Dispatch, Handler, RegisteredSocket};
use crate::error::Result;
use crate::event::Events;
use crate::socket::{Address, Endpoint, Ownership, SysSocket};
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::debug;

const LISTEN_BACKLOG: u32 = 16;

/// Accepts incoming stream connections on a local endpoint.
///
/// Whenever a connection arrives, the callback receives the freshly
/// accepted native descriptor (already non-blocking, lingering disabled)
/// and the peer's address. Adopting the descriptor — usually by registering
/// it in the dispatcher — is the callback's responsibility. If the callback
/// returns an error, the new descriptor is closed before the error
/// propagates out of [`Dispatch::run`].
pub struct Acceptor {
    sock: RegisteredSocket,
}

impl Acceptor {
    pub fn new(
        dispatch: &Dispatch,
        endpoint: &Endpoint,
        mut f: impl FnMut(RawFd, &Address) -> Result<()> + 'static,
    ) -> Result<Acceptor> {
        let sys = Rc::new(endpoint.create()?);
        sys.set_nonblocking(true)?;
        sys.set_reuse_addr(true)?;
        sys.bind(endpoint.address())?;
        sys.listen(LISTEN_BACKLOG)?;
        debug!(local = %endpoint, "accepting connections");
        let listener = Rc::clone(&sys);
        let handler: Handler = Box::new(move |_ev| Acceptor::drain(&listener, &mut f));
        let sock = RegisteredSocket::new(dispatch, sys, handler, Events::READABLE)?;
        Ok(Acceptor { sock })
    }

    fn drain<F>(listener: &SysSocket, f: &mut F) -> Result<()>
    where
        F: FnMut(RawFd, &Address) -> Result<()>,
    {
        while let Some((fd, peer)) = listener.accept()? {
            // The wrapper acts as a scope guard: until the callback returns
            // successfully, an early exit closes the new descriptor.
            let conn = SysSocket::new(fd, Ownership::Owned)?;
            debug!(socket = fd, peer = %peer, "accepted connection");
            conn.set_nonblocking(true)?;
            conn.set_linger(0)?;
            f(fd, &peer)?;
            conn.set_close_on_drop(false);
        }
        Ok(())
    }

    /// The address the listening socket is bound to.
    pub fn local_address(&self) -> Result<Address> {
        self.sock.sys().local_address()
    }
}
