//! The contract between the DNS driver and an external resolver.
//!
//! The resolver is a callback-free asynchronous DNS engine (GNU adns is the
//! model): queries are submitted and produce opaque ids, the resolver
//! publishes which descriptors and which deadline it wants watched, the
//! caller feeds readiness and elapsed time back in, and completed answers
//! are collected one at a time with [`Resolver::check`]. The
//! [`Dns`](crate::dns::Dns) driver adapts this shape onto the reactor; the
//! wire-level implementation itself is outside this library.

use crate::clock::Timestamp;
use crate::error::Result;
use crate::event::Events;
use crate::socket::Address;
use bitflags::bitflags;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;

/// Opaque resolver-side identifier for an in-flight query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub u64);

/// The record types the driver knows how to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Mx,
    Ptr,
}

bitflags! {
    /// Per-query flags passed through to the resolver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueryFlags: u32 {
        /// Refuse to follow CNAME chains.
        const CNAME_FORBID = 1 << 0;
    }
}

/// One descriptor the resolver wants watched, with the events it cares
/// about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub fd: RawFd,
    pub events: Events,
}

impl Default for PollSpec {
    fn default() -> Self {
        PollSpec {
            fd: -1,
            events: Events::empty(),
        }
    }
}

/// Result of [`Resolver::before_poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeforePoll {
    /// The first `count` entries of the buffer were filled. `timeout_ms` is
    /// the resolver's next internal deadline: `Some(0)` means timeouts are
    /// due right now, `None` means it needs no timer.
    Filled {
        count: usize,
        timeout_ms: Option<u32>,
    },
    /// The buffer cannot hold the descriptor list; retry with space for at
    /// least `needed` entries.
    BufferTooSmall { needed: usize },
}

/// Result of [`Resolver::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// One query completed.
    Completed(QueryId, Answer),
    /// Queries are in flight but none has completed.
    Pending,
    /// No queries are in flight at all.
    Idle,
}

/// Completion status of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStatus {
    Success,
    /// The owner name does not exist.
    NxDomain,
    /// The owner exists but carries no records of the requested type.
    NoData,
    /// Any other failure (server unreachable, timeout, malformed reply...).
    Failure,
}

/// One resource record of an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    A(Ipv4Addr),
    Mx {
        preference: u16,
        host: String,
        addresses: Vec<Ipv4Addr>,
    },
    Ptr(String),
}

/// A completed answer as the resolver reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub status: AnswerStatus,
    pub records: Vec<Record>,
}

impl Answer {
    pub fn success(records: Vec<Record>) -> Answer {
        Answer {
            status: AnswerStatus::Success,
            records,
        }
    }

    pub fn failed(status: AnswerStatus) -> Answer {
        debug_assert!(status != AnswerStatus::Success);
        Answer {
            status,
            records: Vec::new(),
        }
    }
}

/// A callback-free asynchronous DNS resolver.
///
/// `now` parameters carry the reactor's clock snapshot so the resolver
/// never reads the system clock itself.
pub trait Resolver {
    /// Submit a forward query for `owner`, returning its id.
    fn submit(
        &mut self,
        owner: &str,
        rrtype: RecordType,
        flags: QueryFlags,
        now: Timestamp,
    ) -> Result<QueryId>;

    /// Submit a reverse (PTR) query for an address.
    fn submit_reverse(&mut self, addr: &Address, now: Timestamp) -> Result<QueryId>;

    /// Report the descriptors and deadline to watch until the next call.
    fn before_poll(&mut self, fds: &mut [PollSpec], now: Timestamp) -> Result<BeforePoll>;

    /// The given descriptor became readable.
    fn process_readable(&mut self, fd: RawFd, now: Timestamp) -> Result<()>;

    /// The given descriptor became writable.
    fn process_writable(&mut self, fd: RawFd, now: Timestamp) -> Result<()>;

    /// The given descriptor has priority data pending.
    fn process_exceptional(&mut self, fd: RawFd, now: Timestamp) -> Result<()>;

    /// Time passed; expire retransmits and deadlines.
    fn process_timeouts(&mut self, now: Timestamp) -> Result<()>;

    /// Collect one completed query, without blocking.
    fn check(&mut self) -> Result<Check>;
}
