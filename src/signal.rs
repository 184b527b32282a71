//! This module implements the eight-signal state machine shared by every process
//! record, plus the exit-status encoding used at the syscall boundary.

use crate::error::Error;

/// One of the eight signals the core recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Hangup. Terminating.
    Hup,
    /// Interrupt. Terminating.
    Int,
    /// Kill. Terminating, cannot be caught or ignored.
    Kill,
    /// Terminate. Terminating.
    Term,
    /// Stop the target until continued.
    Stop,
    /// Resume a stopped target.
    Cont,
    /// Window-size change. Recognized but ignored.
    Winch,
    /// Status-info request. Recognized but ignored.
    Info,
}

impl Signal {
    /// The numeric signal value, matching common POSIX assignments closely enough
    /// to be a faithful stand-in for the external ABI.
    pub fn number(self) -> i32 {
        match self {
            Signal::Hup => 1,
            Signal::Int => 2,
            Signal::Kill => 9,
            Signal::Term => 15,
            Signal::Cont => 18,
            Signal::Stop => 19,
            Signal::Winch => 28,
            Signal::Info => 29,
        }
    }

    /// Whether delivering this signal terminates the target (HUP, INT, KILL, TERM).
    pub fn is_terminating(self) -> bool {
        matches!(self, Signal::Hup | Signal::Int | Signal::Kill | Signal::Term)
    }

    /// Parses a raw signal number from the `kill` syscall surface.
    ///
    /// Numbers outside `[1, 31]` are rejected as [`Error::InvalidArgument`]; numbers
    /// inside that range but not one of the eight recognized signals are rejected as
    /// [`Error::Unimplemented`], matching the set the original table marks as
    /// implemented.
    pub fn from_number(n: i32) -> Result<Signal, Error> {
        if !(1..=31).contains(&n) {
            return Err(Error::InvalidArgument);
        }
        match n {
            1 => Ok(Signal::Hup),
            2 => Ok(Signal::Int),
            9 => Ok(Signal::Kill),
            15 => Ok(Signal::Term),
            18 => Ok(Signal::Cont),
            19 => Ok(Signal::Stop),
            28 => Ok(Signal::Winch),
            29 => Ok(Signal::Info),
            _ => Err(Error::Unimplemented),
        }
    }
}

/// Encodes a normal exit with the given 8-bit exit code.
///
/// Bits 0–7 of the result are the signal number (zero, since the process exited
/// normally); bits 8–15 carry the exit code.
pub fn encode_exit(code: u8) -> i32 {
    (code as i32) << 8
}

/// Encodes termination by `signal`, with no exit code.
pub fn encode_signal(signal: Signal) -> i32 {
    signal.number() & 0xff
}

/// `WIFSIGNALED` — true if `status` encodes termination by a signal.
pub fn wifsignaled(status: i32) -> bool {
    (status & 0xff) != 0
}

/// `WTERMSIG` — the terminating signal number, valid only if [`wifsignaled`].
pub fn wtermsig(status: i32) -> i32 {
    status & 0xff
}

/// `WEXITSTATUS` — the 8-bit exit code passed to a normal exit.
pub fn wexitstatus(status: i32) -> i32 {
    (status >> 8) & 0xff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_round_trips() {
        let status = encode_exit(42);
        assert!(!wifsignaled(status));
        assert_eq!(wexitstatus(status), 42);
    }

    #[test]
    fn signal_round_trips() {
        let status = encode_signal(Signal::Kill);
        assert!(wifsignaled(status));
        assert_eq!(wtermsig(status), Signal::Kill.number());
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(Signal::from_number(0), Err(Error::InvalidArgument));
        assert_eq!(Signal::from_number(32), Err(Error::InvalidArgument));
    }

    #[test]
    fn rejects_unimplemented_in_range() {
        assert_eq!(Signal::from_number(3), Err(Error::Unimplemented));
    }
}
