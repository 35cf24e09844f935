//! Script-style error handling.
//!
//! Library calls always return [`Result`]. Exploit scripts that would
//! rather stop at the first failure can call [`OrExit::or_exit`], which
//! prints the error once to stderr and terminates the process with a
//! code identifying the error class.

use crate::error::{Error, Result};

/// Process exit code for `err`.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Io { .. } => 1,
        Error::Config(_) | Error::Pointer(_) => 2,
        Error::OracleNotFound { .. } => 3,
        Error::Protocol(_) => 4,
        Error::Bounds(_) => 5,
    }
}

/// The single line printed by [`OrExit::or_exit`] before exiting.
pub fn failure_message(what: &str, err: &Error) -> String {
    format!("{} failed: {}", what, err)
}

pub trait OrExit<T> {
    /// Unwrap the value or exit the process, naming `what` failed.
    fn or_exit(self, what: &str) -> T;
}

impl<T> OrExit<T> for Result<T> {
    fn or_exit(self, what: &str) -> T {
        match self {
            Ok(v) => v,
            Err(e) => {
                eprintln!("{}", failure_message(what, &e));
                std::process::exit(exit_code(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_per_class() {
        let io = Error::io("leak at 0x1000", std::io::Error::other("closed"));
        assert_eq!(exit_code(&io), 1);
        assert_eq!(exit_code(&Error::Config("x".into())), 2);
        assert_eq!(
            exit_code(&Error::OracleNotFound {
                expected: "0x42424242".into(),
                probes: 10
            }),
            3
        );
        assert_eq!(exit_code(&Error::Protocol("x".into())), 4);
        assert_eq!(exit_code(&Error::Bounds("x".into())), 5);
    }

    #[test]
    fn failure_message_names_step_once() {
        let err = Error::OracleNotFound {
            expected: "0x4242424242424242".into(),
            probes: 200,
        };
        let msg = failure_message("calibration", &err);
        assert!(msg.starts_with("calibration failed: "));
        assert_eq!(msg.matches("calibration").count(), 1);
        assert!(!msg.contains('\n'));
    }

    #[test]
    fn ok_passes_through() {
        let r: Result<u32> = Ok(7);
        assert_eq!(r.or_exit("nothing"), 7);
    }

    #[test]
    fn io_context_in_message() {
        let err = Error::io("write of 255 (1 bytes) at 0xdeadbeef", std::io::Error::other("gone"));
        assert_eq!(err.to_string(), "write of 255 (1 bytes) at 0xdeadbeef: gone");
    }
}
