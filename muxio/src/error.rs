//! Error types and the syscall retry combinator.

use std::fmt;

pub use nix::errno::Errno;

/// A Result type using the crate-wide [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// How often a syscall interrupted by a signal is restarted before the
/// interruption is reported as an error.
const MAX_EINTR_RETRIES: u32 = 5;

/// An operating-system failure: the `errno` reported by the kernel plus the
/// name of the call that produced it.
///
/// `SysError { errno: Errno::ENOSPC, context: "write(2)" }` displays as
/// `write(2): No space left on device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysError {
    pub errno: Errno,
    pub context: &'static str,
}

impl SysError {
    pub fn new(context: &'static str, errno: Errno) -> Self {
        SysError { errno, context }
    }

    /// EWOULDBLOCK and EAGAIN are never errors; callers translate them into
    /// the operation's "no progress" return shape.
    pub fn is_would_block(&self) -> bool {
        self.errno == Errno::EWOULDBLOCK || self.errno == Errno::EAGAIN
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.errno.desc())
    }
}

impl std::error::Error for SysError {}

/// Error type for muxio operations.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument was rejected before any syscall was made.
    InvalidArgument(String),
    /// A syscall failed.
    Sys(SysError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Sys(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Sys(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SysError> for Error {
    fn from(e: SysError) -> Self {
        Error::Sys(e)
    }
}

/// Return values of the raw syscalls we make.
pub(crate) trait SysRet: Copy {
    fn is_minus_one(self) -> bool;
}

impl SysRet for i32 {
    fn is_minus_one(self) -> bool {
        self == -1
    }
}

impl SysRet for isize {
    fn is_minus_one(self) -> bool {
        self == -1
    }
}

/// Run a syscall, restarting it on EINTR a bounded number of times.
///
/// Any other failure (including EINTR past the retry budget) is returned as
/// a [`SysError`] carrying `context`. EWOULDBLOCK is a failure here as well;
/// callers that expect it match on [`SysError::is_would_block`].
pub(crate) fn retry_on_eintr<T, F>(context: &'static str, mut call: F) -> std::result::Result<T, SysError>
where
    T: SysRet,
    F: FnMut() -> T,
{
    let mut retries = MAX_EINTR_RETRIES;
    loop {
        let rc = call();
        if !rc.is_minus_one() {
            return Ok(rc);
        }
        let errno = Errno::last();
        if errno == Errno::EINTR && retries > 0 {
            retries -= 1;
            continue;
        }
        return Err(SysError::new(context, errno));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sys_error_display_prepends_context() {
        let e = SysError::new("write(2)", Errno::ENOSPC);
        let text = e.to_string();
        assert!(text.starts_with("write(2): "), "{text}");
    }

    #[test]
    fn retry_gives_up_after_bounded_eintr() {
        let mut calls = 0u32;
        let r: std::result::Result<i32, _> = retry_on_eintr("test", || {
            calls += 1;
            Errno::EINTR.set();
            -1
        });
        let err = r.unwrap_err();
        assert_eq!(err.errno, Errno::EINTR);
        assert_eq!(calls, MAX_EINTR_RETRIES + 1);
    }

    #[test]
    fn would_block_is_recognized() {
        assert!(SysError::new("read(2)", Errno::EAGAIN).is_would_block());
        assert!(!SysError::new("read(2)", Errno::EBADF).is_would_block());
    }
}
