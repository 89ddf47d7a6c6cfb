//! The canonical readiness event set.
//!
//! Every demultiplexer backend translates its native bits into these three
//! flags, so the rest of the library never sees platform-specific values.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// A set of readiness events on one descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Events: u32 {
        /// Data can be read without blocking.
        const READABLE = 1 << 0;
        /// Data can be written without blocking.
        const WRITABLE = 1 << 1;
        /// Priority (out-of-band) data is pending.
        const PRIDATA = 1 << 2;
    }
}

impl fmt::Display for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("None")?;
        }
        if self.contains(Events::READABLE) {
            f.write_str("Read")?;
        }
        if self.contains(Events::WRITABLE) {
            f.write_str("Write")?;
        }
        if self.contains(Events::PRIDATA) {
            f.write_str("Pridata")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_the_zero_element() {
        let ev = Events::READABLE | Events::empty();
        assert_eq!(ev, Events::READABLE);
        assert_eq!(Events::READABLE & Events::empty(), Events::empty());
    }

    #[test]
    fn display_matches_the_wire_log_format() {
        assert_eq!(Events::empty().to_string(), "None");
        assert_eq!(Events::READABLE.to_string(), "Read");
        assert_eq!((Events::READABLE | Events::WRITABLE).to_string(), "ReadWrite");
        assert_eq!(Events::all().to_string(), "ReadWritePridata");
    }
}
