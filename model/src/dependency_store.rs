/*!

The dependency-learning filter may persist what it learned. How and where it does so is not
settled, so the harness only knows the store through [`DependencyStore`]: a query for the
dependencies recorded for a run.

!*/

use crate::context::RunContext;
use crate::error::{Classify, ErrorKind};
use crate::probe::DependencyMarker;
use async_trait::async_trait;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Dependency store '{}' is unavailable: {}", store, reason))]
    Unavailable { store: String, reason: String },

    #[snafu(display("Dependency store '{}' returned malformed data: {}", store, reason))]
    Malformed { store: String, reason: String },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Unavailable { .. } => ErrorKind::Unavailable,
            Error::Malformed { .. } => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A caller identity and the destination it was observed calling. This is the same pair the
/// filter stamps into responses.
pub type DependencyEdge = DependencyMarker;

/// A queryable record of learned dependencies.
#[async_trait]
pub trait DependencyStore: Send + Sync {
    /// A short name for log messages and reports.
    fn name(&self) -> &str;

    /// Every dependency recorded for the run `ctx` belongs to. An empty list means nothing was
    /// learned yet, not that the store is unreachable.
    async fn learned(&self, ctx: &RunContext) -> Result<Vec<DependencyEdge>>;
}
