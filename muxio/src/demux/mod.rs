//! Readiness demultiplexers.
//!
//! Three interchangeable backends translate a set of (descriptor,
//! requested-events) registrations into one blocking wait and a stream of
//! ready events. Their external semantics are identical: after any sequence
//! of `register`/`modify`/`unregister`, the set of descriptors and masks
//! asked for is exactly what the next `wait` tests; `pop_event` never
//! yields an unregistered descriptor or an empty event set; `wait` is the
//! only place the library blocks, returns cleanly on EINTR, and must not be
//! called with more seconds than `max_timeout()` allows.
//!
//! The default backend is epoll on Linux and poll elsewhere; the `poll` and
//! `select` cargo features force the respective backend. All compiled
//! backends stay usable under their own names.

#[cfg(target_os = "linux")]
pub mod epoll;
pub mod poll;
pub mod select;

#[cfg(all(
    target_os = "linux",
    not(feature = "poll"),
    not(feature = "select")
))]
pub use epoll::Epoll as Demux;

#[cfg(any(
    all(feature = "poll", not(feature = "select")),
    all(not(target_os = "linux"), not(feature = "poll"), not(feature = "select"))
))]
pub use poll::Poll as Demux;

#[cfg(feature = "select")]
pub use select::Select as Demux;
