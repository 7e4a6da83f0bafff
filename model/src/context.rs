use crate::params::RunParameters;
use crate::resource::ObjectRef;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Carries cancellation and the run's shared configuration from one phase to the next.
///
/// A `RunContext` is never mutated in place. Phases derive a new context from the one they
/// received (`with_created`, `child`) and hand it on, so setup and teardown only share what
/// setup explicitly returned.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancellation: CancellationToken,
    params: Arc<RunParameters>,
    cluster: Option<String>,
    created: Arc<Vec<ObjectRef>>,
}

impl RunContext {
    pub fn new(params: RunParameters) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            params: Arc::new(params),
            cluster: None,
            created: Arc::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &RunParameters {
        &self.params
    }

    /// The name of the cluster the run is executing against, when known.
    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    /// Objects whose creation has been attempted, in creation order.
    pub fn created(&self) -> &[ObjectRef] {
        &self.created
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancellation.cancel()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn with_cluster<S>(&self, cluster: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            cluster: Some(cluster.into()),
            ..self.clone()
        }
    }

    pub fn with_created(&self, created: Vec<ObjectRef>) -> Self {
        Self {
            created: Arc::new(created),
            ..self.clone()
        }
    }

    /// A context whose cancellation can be triggered without cancelling `self`, but which is
    /// cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }

    /// A context for work that must run even after `self` was cancelled, such as teardown.
    pub fn detached(&self) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            ..self.clone()
        }
    }
}
