use std::fmt::{Display, Formatter};

/// The error taxonomy shared by every component of the harness. Each module keeps its own error
/// type; `ErrorKind` is how callers tell the families apart without matching on module-specific
/// variants.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// A malformed object description.
    Validation,
    /// An object with the same identity already exists.
    Conflict,
    /// The control plane could not be reached or returned an unexpected failure.
    Unavailable,
    /// The object does not exist.
    NotFound,
    /// A readiness condition was not reached in time.
    Timeout,
    /// The run context was cancelled.
    Cancelled,
    /// A probe found no live workload instance.
    NoInstance,
    /// A command executed inside a workload failed.
    Exec,
    /// Observed output did not match expectations.
    Assertion,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NoInstance => "no instance",
            ErrorKind::Exec => "exec",
            ErrorKind::Assertion => "assertion",
        };
        f.write_str(s)
    }
}

/// Maps an error onto the shared [`ErrorKind`] taxonomy.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }
}
