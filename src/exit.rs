//! Exit signal
//!
//! `proc_exit` does not return to the guest. Instead of unwinding, the
//! dispatcher hands back `Err(Trap::Exit(..))`; the engine glue is expected
//! to abort the guest's call stack when it sees a trap, and the invocation
//! driver turns the signal into the instance's exit status.

use thiserror::Error;

/// Request to terminate the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal {
    pub code: u32,
}

impl ExitSignal {
    pub fn new(code: u32) -> Self {
        Self { code }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Non-errno outcomes of a host call; these abort guest execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    /// The guest called `proc_exit`
    #[error("guest exited with code {}", .0.code)]
    Exit(ExitSignal),

    /// The host or engine glue broke the calling convention
    #[error("host bug: {0}")]
    HostBug(String),
}

impl Trap {
    /// Exit code if this trap is an exit request
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            Trap::Exit(signal) => Some(signal.code),
            Trap::HostBug(_) => None,
        }
    }
}

impl From<ExitSignal> for Trap {
    fn from(signal: ExitSignal) -> Self {
        Trap::Exit(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_trap() {
        let trap: Trap = ExitSignal::new(2).into();
        assert_eq!(trap.exit_code(), Some(2));
        assert_eq!(trap.to_string(), "guest exited with code 2");
        assert!(!ExitSignal::new(2).is_success());
        assert!(ExitSignal::new(0).is_success());
    }

    #[test]
    fn test_host_bug_is_not_an_exit() {
        let trap = Trap::HostBug("fd_write expects 4 arguments, got 3".into());
        assert_eq!(trap.exit_code(), None);
        assert!(trap.to_string().starts_with("host bug"));
    }
}
