//! A single-threaded reactor for POSIX systems.
//!
//! muxio multiplexes three classes of events into one cooperative event
//! loop: readiness on registered sockets, firing of scheduled timers, and
//! completion of asynchronous DNS lookups. Applications register callbacks
//! against these sources and drive the loop themselves; the library never
//! spawns threads, never owns application data, and blocks only inside
//! [`Reactor::wait`].
//!
//! # Architecture
//!
//! - [`demux`] turns one blocking wait into per-descriptor readiness
//!   events, over epoll, poll, or select (chosen at build time).
//! - [`dispatch`] layers a descriptor-to-handler table on top of it.
//! - [`schedule`] orders one-shot tasks by absolute due time; a scoped
//!   [`Timeout`] cancels its task on drop.
//! - [`dns`] adapts an external callback-free resolver (the [`Resolver`]
//!   trait) onto the two layers above.
//! - [`reactor`] composes everything behind `run`/`wait`.
//!
//! # Example
//!
//! ```no_run
//! use muxio::{Reactor, Timeout};
//!
//! fn main() -> muxio::Result<()> {
//!     let reactor = Reactor::new()?;
//!     let _t = Timeout::with_after(reactor.schedule(), 1, || {
//!         println!("one second passed");
//!         Ok(())
//!     });
//!     while !reactor.is_empty() {
//!         let seconds = reactor.run()?;
//!         if seconds == 0 {
//!             break;
//!         }
//!         reactor.wait(seconds)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod clock;
pub mod demux;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod event;
pub mod reactor;
pub mod resolver;
pub mod schedule;
pub mod signals;
pub mod socket;

pub use acceptor::Acceptor;
pub use clock::{Clock, Timestamp};
pub use dispatch::{Dispatch, Handler, RegisteredSocket};
pub use dns::{Dns, HostAddrList, MxName, MxNameList};
pub use error::{Errno, Error, Result, SysError};
pub use event::Events;
pub use reactor::Reactor;
pub use resolver::{
    Answer, AnswerStatus, BeforePoll, Check, PollSpec, QueryFlags, QueryId, Record, RecordType,
    Resolver,
};
pub use schedule::{Schedule, Task, TaskId, Timeout};
pub use signals::{BlockSignals, UnblockSignals};
pub use socket::{Address, Endpoint, IoStatus, Ownership, SysSocket};
