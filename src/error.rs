//! This module stores the error utilities shared by every subsystem.

use std::fmt;

/// Type representing a POSIX-style errno, for the external syscall-shaped surface.
pub type Errno = i32;

/// Operation would require blocking but none was requested, or a resource is
/// temporarily exhausted.
pub const EAGAIN: Errno = 0;
/// No child processes / no such process.
pub const ESRCH: Errno = 1;
/// No child processes (distinct from `ESRCH` at the waitpid layer).
pub const ECHILD: Errno = 2;
/// Invalid argument.
pub const EINVAL: Errno = 3;
/// Resource deadlock would occur.
pub const EDEADLK: Errno = 4;
/// Not enough space.
pub const ENOMEM: Errno = 5;
/// Function not implemented.
pub const EUNIMP: Errno = 6;
/// Bad address.
pub const EFAULT: Errno = 7;
/// I/O error.
pub const EIO: Errno = 8;

/// An error produced by the process or memory subsystems.
///
/// Every variant maps to exactly one [`Errno`] via [`Error::to_errno`], matching the
/// external syscall surface the core preserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The target identifier does not name a live process record.
    NoSuchProcess,
    /// The target exists but the caller is not its parent.
    NotAChild,
    /// A bad flag, bad signal number, detached target, or self-join.
    InvalidArgument,
    /// A thread attempted to join itself.
    Deadlock,
    /// A frame, swap slot, or process-table entry could not be reserved.
    OutOfMemory,
    /// The caller asked for a non-blocking operation that has no result yet.
    TryAgain,
    /// A signal number outside the eight recognized signals.
    Unimplemented,
    /// A fault at a virtual address not covered by any vm_object.
    BadAddress,
    /// Swap I/O failed. The design has no recovery path; callers generally
    /// escalate this to a panic rather than propagate it further.
    IoError,
}

impl Error {
    /// Returns the POSIX-style numeric code this error maps to at the syscall boundary.
    pub fn to_errno(self) -> Errno {
        match self {
            Error::NoSuchProcess => ESRCH,
            Error::NotAChild => ECHILD,
            Error::InvalidArgument => EINVAL,
            Error::Deadlock => EDEADLK,
            Error::OutOfMemory => ENOMEM,
            Error::TryAgain => EAGAIN,
            Error::Unimplemented => EUNIMP,
            Error::BadAddress => EFAULT,
            Error::IoError => EIO,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoSuchProcess => "no such process",
            Error::NotAChild => "not a child of the caller",
            Error::InvalidArgument => "invalid argument",
            Error::Deadlock => "resource deadlock would occur",
            Error::OutOfMemory => "out of memory",
            Error::TryAgain => "resource temporarily unavailable",
            Error::Unimplemented => "not implemented",
            Error::BadAddress => "bad address",
            Error::IoError => "I/O error",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type EdukResult<T> = Result<T, Error>;
