//! System sockets and socket addresses.
//!
//! [`SysSocket`] is the thin ownership layer over a native descriptor: it
//! tracks whether the descriptor is closed on drop and exposes the
//! non-blocking POSIX operations the reactor builds on. Address parsing is
//! numeric only; turning names into addresses is the DNS driver's job.

use crate::error::{retry_on_eintr, Errno, Error, Result, SysError};
use socket2::{Domain, Protocol, Type};
use std::cell::Cell;
use std::fmt;
use std::io::{IoSlice, IoSliceMut};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::str::FromStr;
use tracing::trace;

/// A socket address as the kernel sees it: raw `sockaddr` bytes plus their
/// length.
#[derive(Clone, Copy)]
pub struct Address {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl Address {
    /// Parse a numeric `host:port` specification. Hostnames are rejected;
    /// IPv6 addresses use the usual bracket form (`[::1]:8080`).
    pub fn parse(spec: &str) -> Result<Address> {
        let addr = SocketAddr::from_str(spec)
            .map_err(|_| Error::InvalidArgument(format!("not a numeric socket address: {spec:?}")))?;
        Ok(Address::from(addr))
    }

    pub(crate) fn from_raw(storage: libc::sockaddr_storage, len: libc::socklen_t) -> Address {
        Address { storage, len }
    }

    pub(crate) fn as_sockaddr_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const libc::sockaddr_storage as *const libc::sockaddr
    }

    pub(crate) fn len(&self) -> libc::socklen_t {
        self.len
    }

    /// The address in `std` form, if it belongs to a family `std` models.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match i32::from(self.storage.ss_family) {
            libc::AF_INET => {
                let sin = unsafe { *(self.as_sockaddr_ptr() as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { *(self.as_sockaddr_ptr() as *const libc::sockaddr_in6) };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Some(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }

    /// The address family (`AF_INET`, `AF_INET6`, ...).
    pub fn family(&self) -> i32 {
        i32::from(self.storage.ss_family)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Address {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let len = match addr {
            SocketAddr::V4(v4) => {
                let sin = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in;
                unsafe {
                    (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                    (*sin).sin_port = v4.port().to_be();
                    (*sin).sin_addr = libc::in_addr {
                        s_addr: u32::from(*v4.ip()).to_be(),
                    };
                }
                mem::size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(v6) => {
                let sin6 = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in6;
                unsafe {
                    (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                    (*sin6).sin6_port = v6.port().to_be();
                    (*sin6).sin6_flowinfo = v6.flowinfo();
                    (*sin6).sin6_addr = libc::in6_addr {
                        s6_addr: v6.ip().octets(),
                    };
                    (*sin6).sin6_scope_id = v6.scope_id();
                }
                mem::size_of::<libc::sockaddr_in6>()
            }
        };
        Address {
            storage,
            len: len as libc::socklen_t,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => addr.fmt(f),
            None => write!(f, "<af {}>", self.family()),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An [`Address`] plus the socket type and protocol needed to open a socket
/// that can be bound or connected to it.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    addr: Address,
    ty: Type,
    protocol: Protocol,
}

impl Endpoint {
    /// A TCP endpoint from a numeric `host:port` specification.
    pub fn tcp(spec: &str) -> Result<Endpoint> {
        Ok(Endpoint {
            addr: Address::parse(spec)?,
            ty: Type::STREAM,
            protocol: Protocol::TCP,
        })
    }

    /// A UDP endpoint from a numeric `host:port` specification.
    pub fn udp(spec: &str) -> Result<Endpoint> {
        Ok(Endpoint {
            addr: Address::parse(spec)?,
            ty: Type::DGRAM,
            protocol: Protocol::UDP,
        })
    }

    pub fn address(&self) -> &Address {
        &self.addr
    }

    /// Open a new unbound socket of this endpoint's family, type, and
    /// protocol. The caller owns the returned socket.
    pub fn create(&self) -> Result<SysSocket> {
        let domain = match self.family() {
            libc::AF_INET => Domain::IPV4,
            libc::AF_INET6 => Domain::IPV6,
            af => return Err(Error::InvalidArgument(format!("unsupported address family {af}"))),
        };
        let sock = socket2::Socket::new(domain, self.ty, Some(self.protocol)).map_err(|e| {
            SysError::new(
                "socket(2)",
                Errno::from_raw(e.raw_os_error().unwrap_or(libc::EINVAL)),
            )
        })?;
        SysSocket::new(sock.into_raw_fd(), Ownership::Owned)
    }

    fn family(&self) -> i32 {
        self.addr.family()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

/// Whether a [`SysSocket`] closes its descriptor when dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The socket closes the descriptor on drop.
    Owned,
    /// Someone else owns the descriptor; drop leaves it open.
    Borrowed,
}

/// The outcome of a non-blocking transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The operation would have blocked; nothing happened.
    WouldBlock,
    /// The peer has closed the stream.
    Closed,
    /// This many bytes were transferred.
    Transferred(usize),
}

/// A native socket descriptor with explicit close-on-drop semantics.
///
/// Exactly one `SysSocket` owns a given descriptor at a time; releasing
/// ownership to an external collaborator is done by clearing the
/// close-on-drop flag. All I/O operations are shaped for non-blocking use:
/// EWOULDBLOCK is reported as [`IoStatus::WouldBlock`], never as an error,
/// and every syscall restarts on EINTR a bounded number of times.
pub struct SysSocket {
    fd: RawFd,
    close_on_drop: Cell<bool>,
}

impl SysSocket {
    /// Wrap a native descriptor. Fails on negative descriptors.
    pub fn new(fd: RawFd, ownership: Ownership) -> Result<SysSocket> {
        if fd < 0 {
            return Err(Error::InvalidArgument(format!("invalid socket descriptor {fd}")));
        }
        Ok(SysSocket {
            fd,
            close_on_drop: Cell::new(ownership == Ownership::Owned),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn close_on_drop(&self) -> bool {
        self.close_on_drop.get()
    }

    /// Enable or disable closing the descriptor on drop. Disabling releases
    /// ownership, e.g. after handing a freshly accepted descriptor to a
    /// callback that adopted it.
    pub fn set_close_on_drop(&self, enable: bool) {
        trace!(socket = self.fd, enable, "close-on-drop");
        self.close_on_drop.set(enable);
    }

    /// Set or clear `O_NONBLOCK`.
    pub fn set_nonblocking(&self, enable: bool) -> Result<()> {
        let flags = retry_on_eintr("fcntl(F_GETFL)", || unsafe {
            libc::fcntl(self.fd, libc::F_GETFL, 0)
        })?;
        let wanted = if enable {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if wanted != flags {
            retry_on_eintr("fcntl(F_SETFL)", || unsafe {
                libc::fcntl(self.fd, libc::F_SETFL, wanted)
            })?;
        }
        Ok(())
    }

    /// `SO_LINGER`: 0 disables lingering, anything else enables it with that
    /// timeout in seconds.
    pub fn set_linger(&self, seconds: u16) -> Result<()> {
        let ling = libc::linger {
            l_onoff: i32::from(seconds > 0),
            l_linger: i32::from(seconds),
        };
        retry_on_eintr("setsockopt(SO_LINGER)", || unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                &ling as *const libc::linger as *const libc::c_void,
                mem::size_of::<libc::linger>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    /// `SO_REUSEADDR`.
    pub fn set_reuse_addr(&self, enable: bool) -> Result<()> {
        let flag: libc::c_int = i32::from(enable);
        retry_on_eintr("setsockopt(SO_REUSEADDR)", || unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &flag as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    pub fn bind(&self, addr: &Address) -> Result<()> {
        retry_on_eintr("bind(2)", || unsafe {
            libc::bind(self.fd, addr.as_sockaddr_ptr(), addr.len())
        })?;
        Ok(())
    }

    pub fn listen(&self, backlog: u32) -> Result<()> {
        retry_on_eintr("listen(2)", || unsafe {
            libc::listen(self.fd, backlog.min(i32::MAX as u32) as libc::c_int)
        })?;
        Ok(())
    }

    /// Accept one pending connection. Returns `None` when nothing is
    /// pending. The returned descriptor is raw: nobody owns it until it is
    /// wrapped in a new `SysSocket`.
    pub fn accept(&self) -> Result<Option<(RawFd, Address)>> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        match retry_on_eintr("accept(2)", || unsafe {
            libc::accept(
                self.fd,
                &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
                &mut len,
            )
        }) {
            Ok(fd) => Ok(Some((fd, Address::from_raw(storage, len)))),
            Err(e) if e.is_would_block() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read into `buf`. [`IoStatus::Closed`] signals end of stream.
    pub fn read(&self, buf: &mut [u8]) -> Result<IoStatus> {
        debug_assert!(!buf.is_empty());
        match retry_on_eintr("read(2)", || unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        }) {
            Ok(0) => Ok(IoStatus::Closed),
            Ok(n) => {
                trace!(socket = self.fd, bytes = n, "read");
                Ok(IoStatus::Transferred(n as usize))
            }
            Err(e) if e.is_would_block() => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Write from `buf`. A zero-byte result from the kernel is reported as
    /// [`IoStatus::Closed`].
    pub fn write(&self, buf: &[u8]) -> Result<IoStatus> {
        debug_assert!(!buf.is_empty());
        match retry_on_eintr("write(2)", || unsafe {
            libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len())
        }) {
            Ok(0) => Ok(IoStatus::Closed),
            Ok(n) => {
                trace!(socket = self.fd, bytes = n, "write");
                Ok(IoStatus::Transferred(n as usize))
            }
            Err(e) if e.is_would_block() => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Scatter read across `bufs`.
    pub fn read_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> Result<IoStatus> {
        debug_assert!(!bufs.is_empty());
        match retry_on_eintr("readv(2)", || unsafe {
            libc::readv(
                self.fd,
                bufs.as_mut_ptr() as *mut libc::iovec,
                bufs.len().min(libc::c_int::MAX as usize) as libc::c_int,
            )
        }) {
            Ok(0) => Ok(IoStatus::Closed),
            Ok(n) => Ok(IoStatus::Transferred(n as usize)),
            Err(e) if e.is_would_block() => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Gather write from `bufs`.
    pub fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> Result<IoStatus> {
        debug_assert!(!bufs.is_empty());
        match retry_on_eintr("writev(2)", || unsafe {
            libc::writev(
                self.fd,
                bufs.as_ptr() as *const libc::iovec,
                bufs.len().min(libc::c_int::MAX as usize) as libc::c_int,
            )
        }) {
            Ok(0) => Ok(IoStatus::Closed),
            Ok(n) => Ok(IoStatus::Transferred(n as usize)),
            Err(e) if e.is_would_block() => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Receive one datagram into `bufs`, reporting the sender's address.
    pub fn recv_from(&self, bufs: &mut [IoSliceMut<'_>]) -> Result<(IoStatus, Address)> {
        debug_assert!(!bufs.is_empty());
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut storage as *mut libc::sockaddr_storage as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = bufs.as_mut_ptr() as *mut libc::iovec;
        msg.msg_iovlen = bufs.len() as _;
        match retry_on_eintr("recvmsg(2)", || unsafe {
            libc::recvmsg(self.fd, &mut msg, libc::MSG_DONTWAIT)
        }) {
            Ok(n) => {
                let from = Address::from_raw(storage, msg.msg_namelen);
                Ok((IoStatus::Transferred(n as usize), from))
            }
            Err(e) if e.is_would_block() => {
                Ok((IoStatus::WouldBlock, Address::from_raw(storage, 0)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send one datagram from `bufs` to `to`.
    pub fn send_to(&self, bufs: &[IoSlice<'_>], to: &Address) -> Result<IoStatus> {
        debug_assert!(!bufs.is_empty());
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = to.as_sockaddr_ptr() as *mut libc::c_void;
        msg.msg_namelen = to.len();
        msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = bufs.len() as _;
        match retry_on_eintr("sendmsg(2)", || unsafe {
            libc::sendmsg(self.fd, &msg, libc::MSG_DONTWAIT)
        }) {
            Ok(n) => Ok(IoStatus::Transferred(n as usize)),
            Err(e) if e.is_would_block() => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// The address this socket is bound to.
    pub fn local_address(&self) -> Result<Address> {
        self.name_query("getsockname(2)", libc::getsockname)
    }

    /// The address of the connected peer.
    pub fn peer_address(&self) -> Result<Address> {
        self.name_query("getpeername(2)", libc::getpeername)
    }

    fn name_query(
        &self,
        context: &'static str,
        query: unsafe extern "C" fn(libc::c_int, *mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int,
    ) -> Result<Address> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        retry_on_eintr(context, || unsafe {
            query(
                self.fd,
                &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
                &mut len,
            )
        })?;
        Ok(Address::from_raw(storage, len))
    }
}

impl AsRawFd for SysSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl fmt::Debug for SysSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket({})", self.fd)
    }
}

impl Drop for SysSocket {
    fn drop(&mut self) {
        if self.close_on_drop.get() {
            trace!(socket = self.fd, "close");
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_parse_round_trips_through_display() {
        let addr = Address::parse("127.0.0.1:8080").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
        let v6 = Address::parse("[::1]:53").unwrap();
        assert_eq!(v6.to_string(), "[::1]:53");
    }

    #[test]
    fn hostnames_are_rejected() {
        assert!(Address::parse("localhost:8080").is_err());
        assert!(Address::parse("not an address").is_err());
    }

    #[test]
    fn negative_descriptors_are_rejected() {
        assert!(SysSocket::new(-1, Ownership::Owned).is_err());
    }

    #[test]
    fn endpoint_creates_a_bindable_socket() {
        let ep = Endpoint::tcp("127.0.0.1:0").unwrap();
        let sock = ep.create().unwrap();
        sock.set_nonblocking(true).unwrap();
        sock.set_reuse_addr(true).unwrap();
        sock.bind(ep.address()).unwrap();
        sock.listen(4).unwrap();
        let local = sock.local_address().unwrap();
        let std_addr = local.to_socket_addr().unwrap();
        assert_eq!(std_addr.ip().to_string(), "127.0.0.1");
        assert_ne!(std_addr.port(), 0);
        assert!(sock.accept().unwrap().is_none(), "nothing to accept yet");
    }

    #[test]
    fn borrowed_sockets_leave_the_descriptor_open() {
        let ep = Endpoint::udp("127.0.0.1:0").unwrap();
        let owner = ep.create().unwrap();
        {
            let borrowed = SysSocket::new(owner.fd(), Ownership::Borrowed).unwrap();
            assert!(!borrowed.close_on_drop());
        }
        // still usable after the borrower went away
        owner.bind(ep.address()).unwrap();
    }
}
