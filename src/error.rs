//! Error types used by multiple modules.
//!
//! There are two error types that are used widely within the crate.
//!
//! The most important is [`Failed`]. This error indicates that an
//! operation had to be canceled for some reason and callers can assume
//! that all diagnostic information has been logged and they need not do
//! anything further. It is returned by object parsing, validation and
//! transport requests, all of which are allowed to fail routinely as
//! part of normal operation.
//!
//! Secondly, [`Fatal`] is used when a whole run can no longer continue:
//! impossible configuration, a corrupted framed message, or a worker
//! process that went away unexpectedly. It carries enough information to
//! pick a process exit code via [`Fatal::exit_code`].

use std::fmt;
use log::error;

//------------ Failed --------------------------------------------------------

/// An operation has failed to complete.
///
/// This error type is used to indicate that an operation has failed,
/// diagnostic information has already been printed or logged, and the
/// caller can't really do anything to recover other than drop whatever it
/// was working on and move to the next item.
#[derive(Clone, Copy, Debug)]
pub struct Failed;

impl fmt::Display for Failed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("operation failed")
    }
}

impl std::error::Error for Failed { }

//------------ Fatal ----------------------------------------------------------

/// An error that requires terminating the whole process.
#[derive(Clone, Copy, Debug)]
pub enum Fatal {
    /// The configuration makes it impossible to even start.
    ///
    /// E.g., no TALs could be found, or the cache directory cannot be
    /// created or is not writable.
    Config,

    /// A framed IPC message could not be decoded.
    ///
    /// This includes a length prefix that would overflow `usize` or
    /// exceeds the configured maximum frame size -- either means the
    /// peer is confused or hostile and the channel can no longer be
    /// trusted.
    Framing,

    /// A worker process exited unexpectedly.
    WorkerGone,
}

impl Fatal {
    /// Returns the process exit code appropriate for this error.
    pub fn exit_code(self) -> i32 {
        match self {
            Fatal::Config => 1,
            Fatal::Framing => 1,
            Fatal::WorkerGone => 1,
        }
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Fatal::Config => f.write_str("fatal configuration error"),
            Fatal::Framing => f.write_str("fatal IPC framing error"),
            Fatal::WorkerGone => {
                f.write_str("a worker process exited unexpectedly")
            }
        }
    }
}

impl std::error::Error for Fatal { }

impl From<Failed> for Fatal {
    fn from(_: Failed) -> Fatal {
        Fatal::Config
    }
}

//------------ ExitError -----------------------------------------------------

/// The final outcome of a run, translated into a process exit status.
///
/// Per the run's exit-code rule: zero iff at least one TA produced at
/// least one VRP, one if validation completed but nothing validated, two
/// if a fatal error terminated the run early.
#[derive(Clone, Copy, Debug)]
pub enum ExitError {
    /// A fatal error occurred; `0` is never appropriate.
    Fatal(Fatal),

    /// The run completed but produced no VRPs from any TA.
    NoVrps,
}

impl ExitError {
    pub fn code(self) -> i32 {
        match self {
            ExitError::Fatal(err) => {
                error!("{}. Exiting.", err);
                2
            }
            ExitError::NoVrps => 1,
        }
    }
}

impl From<Fatal> for ExitError {
    fn from(err: Fatal) -> ExitError {
        ExitError::Fatal(err)
    }
}
