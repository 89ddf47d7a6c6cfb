//! A mock [`Resolver`] serving canned answers.
//!
//! The mock reproduces the external resolver's observable behavior without
//! any wire traffic. In the default descriptor-driven mode it owns one UDP
//! socket looped back to itself: every submitted query sends a one-byte
//! datagram, which makes the descriptor readable, which makes the driver
//! call `process_readable`, which completes the query. In latency mode
//! (`with_latency`) there is no descriptor at all; completions happen when
//! the driver feeds elapsed time into `process_timeouts`, exercising the
//! deadline-timer path instead.

use muxio::clock::Timestamp;
use muxio::error::{Errno, Result, SysError};
use muxio::event::Events;
use muxio::resolver::{
    Answer, AnswerStatus, BeforePoll, Check, PollSpec, QueryFlags, QueryId, Record, RecordType,
    Resolver,
};
use muxio::socket::Address;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};

struct Pending {
    id: QueryId,
    answer: Answer,
    /// Absolute due second in latency mode; `None` in descriptor mode.
    due: Option<i64>,
}

pub struct MockResolver {
    sock: UdpSocket,
    answers: HashMap<(String, RecordType), Answer>,
    pending: VecDeque<Pending>,
    ready: VecDeque<(QueryId, Answer)>,
    next_id: u64,
    latency_secs: Option<u32>,
    idle_timeout_ms: Option<u32>,
}

impl MockResolver {
    /// Descriptor-driven mock: queries complete via socket readiness.
    pub fn new() -> MockResolver {
        let sock = UdpSocket::bind("127.0.0.1:0").expect("bind mock resolver socket");
        let local = sock.local_addr().expect("mock resolver local address");
        sock.connect(local).expect("connect mock resolver socket to itself");
        sock.set_nonblocking(true).expect("mock resolver nonblocking");
        MockResolver {
            sock,
            answers: HashMap::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            next_id: 1,
            latency_secs: None,
            idle_timeout_ms: Some(10_000),
        }
    }

    /// Timer-driven mock: queries complete `seconds` after submission, via
    /// `process_timeouts` only. No descriptor is ever requested.
    pub fn with_latency(seconds: u32) -> MockResolver {
        let mut mock = MockResolver::new();
        mock.latency_secs = Some(seconds);
        mock
    }

    /// The deadline reported alongside the descriptor in descriptor mode.
    pub fn set_idle_timeout_ms(&mut self, timeout: Option<u32>) {
        self.idle_timeout_ms = timeout;
    }

    /// The descriptor the driver is expected to register.
    pub fn fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    pub fn answer_a(&mut self, owner: &str, addrs: &[&str]) {
        let records = addrs
            .iter()
            .map(|a| Record::A(a.parse::<Ipv4Addr>().expect("mock A address")))
            .collect();
        self.answers
            .insert((owner.into(), RecordType::A), Answer::success(records));
    }

    pub fn answer_mx(&mut self, owner: &str, entries: &[(u16, &str, &[&str])]) {
        let records = entries
            .iter()
            .map(|(preference, host, addrs)| Record::Mx {
                preference: *preference,
                host: (*host).into(),
                addresses: addrs
                    .iter()
                    .map(|a| a.parse::<Ipv4Addr>().expect("mock MX address"))
                    .collect(),
            })
            .collect();
        self.answers
            .insert((owner.into(), RecordType::Mx), Answer::success(records));
    }

    pub fn answer_ptr(&mut self, owner: &str, hostname: &str) {
        self.answers.insert(
            (owner.into(), RecordType::Ptr),
            Answer::success(vec![Record::Ptr(hostname.into())]),
        );
    }

    pub fn answer_nodata(&mut self, owner: &str, rrtype: RecordType) {
        self.answers
            .insert((owner.into(), rrtype), Answer::failed(AnswerStatus::NoData));
    }

    pub fn fail(&mut self, owner: &str, rrtype: RecordType) {
        self.answers
            .insert((owner.into(), rrtype), Answer::failed(AnswerStatus::Failure));
    }

    /// The PTR owner name of an address, `in-addr.arpa` style.
    pub fn reverse_owner(addr: &Address) -> String {
        match addr.to_socket_addr() {
            Some(SocketAddr::V4(v4)) => {
                let [a, b, c, d] = v4.ip().octets();
                format!("{d}.{c}.{b}.{a}.in-addr.arpa")
            }
            other => format!("{other:?}.in-addr.arpa"),
        }
    }

    fn enqueue(&mut self, owner: &str, rrtype: RecordType, now: Timestamp) -> Result<QueryId> {
        let id = QueryId(self.next_id);
        self.next_id += 1;
        let answer = self
            .answers
            .get(&(owner.to_string(), rrtype))
            .cloned()
            .unwrap_or_else(|| Answer::failed(AnswerStatus::NxDomain));
        let due = self.latency_secs.map(|secs| now.sec + i64::from(secs));
        self.pending.push_back(Pending { id, answer, due });
        if self.latency_secs.is_none() {
            self.sock
                .send(&[1])
                .map_err(|e| SysError::new("send(2)", Errno::from_raw(e.raw_os_error().unwrap_or(0))))?;
        }
        Ok(id)
    }

    fn drain_socket(&mut self) {
        let mut buf = [0u8; 8];
        while self.sock.recv(&mut buf).is_ok() {}
    }
}

impl Default for MockResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for MockResolver {
    fn submit(
        &mut self,
        owner: &str,
        rrtype: RecordType,
        _flags: QueryFlags,
        now: Timestamp,
    ) -> Result<QueryId> {
        self.enqueue(owner, rrtype, now)
    }

    fn submit_reverse(&mut self, addr: &Address, now: Timestamp) -> Result<QueryId> {
        let owner = Self::reverse_owner(addr);
        self.enqueue(&owner, RecordType::Ptr, now)
    }

    fn before_poll(&mut self, fds: &mut [PollSpec], now: Timestamp) -> Result<BeforePoll> {
        if self.latency_secs.is_some() {
            let next_due = self.pending.iter().filter_map(|p| p.due).min();
            let timeout_ms = next_due.map(|due| {
                let remaining = due - now.sec;
                u32::try_from(remaining.max(0)).unwrap_or(u32::MAX).saturating_mul(1000)
            });
            return Ok(BeforePoll::Filled {
                count: 0,
                timeout_ms,
            });
        }
        if self.pending.is_empty() && self.ready.is_empty() {
            return Ok(BeforePoll::Filled {
                count: 0,
                timeout_ms: None,
            });
        }
        if fds.is_empty() {
            return Ok(BeforePoll::BufferTooSmall { needed: 1 });
        }
        fds[0] = PollSpec {
            fd: self.fd(),
            events: Events::READABLE,
        };
        Ok(BeforePoll::Filled {
            count: 1,
            timeout_ms: self.idle_timeout_ms,
        })
    }

    fn process_readable(&mut self, fd: RawFd, _now: Timestamp) -> Result<()> {
        assert_eq!(fd, self.fd(), "driver fed readiness for a foreign descriptor");
        self.drain_socket();
        while let Some(p) = self.pending.pop_front() {
            self.ready.push_back((p.id, p.answer));
        }
        Ok(())
    }

    fn process_writable(&mut self, _fd: RawFd, _now: Timestamp) -> Result<()> {
        Ok(())
    }

    fn process_exceptional(&mut self, _fd: RawFd, _now: Timestamp) -> Result<()> {
        Ok(())
    }

    fn process_timeouts(&mut self, now: Timestamp) -> Result<()> {
        let mut still_pending = VecDeque::new();
        while let Some(p) = self.pending.pop_front() {
            match p.due {
                Some(due) if due <= now.sec => self.ready.push_back((p.id, p.answer)),
                _ => still_pending.push_back(p),
            }
        }
        self.pending = still_pending;
        Ok(())
    }

    fn check(&mut self) -> Result<Check> {
        if let Some((id, answer)) = self.ready.pop_front() {
            return Ok(Check::Completed(id, answer));
        }
        if self.pending.is_empty() {
            return Ok(Check::Idle);
        }
        Ok(Check::Pending)
    }
}
