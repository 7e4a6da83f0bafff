use crate::clients;
use crate::error::{Classify, ErrorKind};
use crate::resource::ObjectRef;
use crate::{dependency_store, probe, wait};
use snafu::Snafu;

/// The ways Setup can stop.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to create {}: {}", object, source))]
    Create {
        object: ObjectRef,
        source: clients::Error,
    },

    #[snafu(display("{} did not become ready: {}", object, source))]
    Readiness {
        object: ObjectRef,
        source: wait::Error,
    },

    #[snafu(display("Run cancelled during {}", phase))]
    Cancelled { phase: String },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Create { source, .. } => source.kind(),
            Error::Readiness { source, .. } => source.kind(),
            Error::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why an assessment could not reach a verdict.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AssessError {
    #[snafu(display("Probe failed: {}", source))]
    Probe { source: probe::Error },

    #[snafu(display("Unable to query learned dependencies: {}", source))]
    Store { source: dependency_store::Error },
}

impl Classify for AssessError {
    fn kind(&self) -> ErrorKind {
        match self {
            AssessError::Probe { source } => source.kind(),
            AssessError::Store { source } => source.kind(),
        }
    }
}

/// A single failure during Teardown. Teardown never stops at one of these.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TeardownError {
    #[snafu(display("Unable to delete {}: {}", object, source))]
    Delete {
        object: ObjectRef,
        source: clients::Error,
    },

    #[snafu(display("{} was not removed: {}", object, source))]
    Settle {
        object: ObjectRef,
        source: wait::Error,
    },
}

impl TeardownError {
    pub fn object(&self) -> &ObjectRef {
        match self {
            TeardownError::Delete { object, .. } | TeardownError::Settle { object, .. } => object,
        }
    }
}

impl Classify for TeardownError {
    fn kind(&self) -> ErrorKind {
        match self {
            TeardownError::Delete { source, .. } => source.kind(),
            TeardownError::Settle { source, .. } => source.kind(),
        }
    }
}
