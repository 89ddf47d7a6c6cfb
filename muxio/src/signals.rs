//! Scoped signal-mask helpers.
//!
//! The library installs no signal handlers. Applications block signals in
//! their top-level loop with [`BlockSignals`] and let the reactor deliver
//! them only while it sleeps: the demultiplexer backends either wait with a
//! signal-mask-carrying primitive or open an [`UnblockSignals`] scope around
//! the plain syscall.

use crate::error::{Result, SysError};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow};
use tracing::warn;

/// Blocks every signal for the lifetime of the value; the previous mask is
/// restored on drop.
pub struct BlockSignals {
    prev: SigSet,
}

impl BlockSignals {
    pub fn new() -> Result<BlockSignals> {
        let mut prev = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::all()), Some(&mut prev))
            .map_err(|errno| SysError::new("sigprocmask(2)", errno))?;
        Ok(BlockSignals { prev })
    }
}

impl Drop for BlockSignals {
    fn drop(&mut self) {
        if let Err(errno) = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.prev), None) {
            warn!(%errno, "failed to restore signal mask");
        }
    }
}

/// Unblocks every signal for the lifetime of the value; the previous mask is
/// restored on drop.
pub struct UnblockSignals {
    prev: SigSet,
}

impl UnblockSignals {
    pub fn new() -> Result<UnblockSignals> {
        let mut prev = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), Some(&mut prev))
            .map_err(|errno| SysError::new("sigprocmask(2)", errno))?;
        Ok(UnblockSignals { prev })
    }
}

impl Drop for UnblockSignals {
    fn drop(&mut self) {
        if let Err(errno) = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.prev), None) {
            warn!(%errno, "failed to restore signal mask");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;

    #[test]
    fn block_scope_restores_the_previous_mask() {
        let mut before = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_SETMASK, None, Some(&mut before)).unwrap();
        {
            let _guard = BlockSignals::new().unwrap();
            let mut inside = SigSet::empty();
            sigprocmask(SigmaskHow::SIG_SETMASK, None, Some(&mut inside)).unwrap();
            assert!(inside.contains(Signal::SIGUSR1));
        }
        let mut after = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_SETMASK, None, Some(&mut after)).unwrap();
        assert_eq!(after.contains(Signal::SIGUSR1), before.contains(Signal::SIGUSR1));
    }
}
