use super::error::{AssessError, ProbeSnafu, StoreSnafu};
use super::report::Verdict;
use super::LifecycleConfig;
use crate::clients::ObjectClient;
use crate::constants::{LABEL_APP, SERVICE_ACCOUNT};
use crate::context::RunContext;
use crate::dependency_store::{DependencyEdge, DependencyStore};
use crate::params::RunParameters;
use crate::probe::{DependencyMarker, Expectation, Probe, ProbeRequest};
use async_trait::async_trait;
use log::info;
use maplit::btreemap;
use snafu::ResultExt;
use std::sync::Arc;

/// One Assess step. Assessments read the run's state through the context they are given and
/// report a [`Verdict`]; an `Err` means no verdict could be reached.
#[async_trait]
pub trait Assessment<C: ObjectClient>: Send + Sync {
    fn name(&self) -> &str;

    async fn assess(
        &self,
        client: &C,
        ctx: &RunContext,
        config: &LifecycleConfig,
    ) -> Result<Verdict, AssessError>;
}

/// The marker the filter is expected to stamp on the client's request to the server.
pub fn expected_marker(params: &RunParameters) -> DependencyMarker {
    DependencyMarker::new(
        params.client_identity(SERVICE_ACCOUNT),
        params.server_upstream_cluster(),
    )
}

/// Sends a request from the client workload to the server and checks that the response carries
/// the dependency header.
#[derive(Debug, Clone, Default)]
pub struct DependencyHeaderAssessment;

impl DependencyHeaderAssessment {
    pub fn request(params: &RunParameters, config: &LifecycleConfig) -> ProbeRequest {
        ProbeRequest {
            namespace: params.client_namespace.clone(),
            selector: btreemap! { LABEL_APP.to_string() => params.client_name.clone() },
            container: params.container_name.clone(),
            command: params.probe_command(),
            expectations: vec![
                Expectation::Status(200),
                Expectation::marker(&params.response_header, &expected_marker(params)),
            ],
            timeout: config.probe_timeout,
        }
    }
}

#[async_trait]
impl<C: ObjectClient> Assessment<C> for DependencyHeaderAssessment {
    fn name(&self) -> &str {
        "send sample request and check headers"
    }

    async fn assess(
        &self,
        client: &C,
        ctx: &RunContext,
        config: &LifecycleConfig,
    ) -> Result<Verdict, AssessError> {
        let request = Self::request(ctx.params(), config);
        let result = Probe::new(client)
            .run(ctx, &request)
            .await
            .context(ProbeSnafu)?;
        if result.passed() {
            Ok(Verdict::Passed)
        } else {
            Ok(Verdict::failed(
                result.failures().into_iter().map(ToString::to_string),
            ))
        }
    }
}

/// Checks that the dependency the filter observed was persisted. Skipped when no store is
/// configured.
#[derive(Clone, Default)]
pub struct PersistedDependencyAssessment {
    store: Option<Arc<dyn DependencyStore>>,
}

impl PersistedDependencyAssessment {
    pub fn new(store: Option<Arc<dyn DependencyStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<C: ObjectClient> Assessment<C> for PersistedDependencyAssessment {
    fn name(&self) -> &str {
        "check learned dependency state"
    }

    async fn assess(
        &self,
        _client: &C,
        ctx: &RunContext,
        _config: &LifecycleConfig,
    ) -> Result<Verdict, AssessError> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(Verdict::skipped("no dependency store is configured")),
        };
        let expected: DependencyEdge = expected_marker(ctx.params());
        let learned = store.learned(ctx).await.context(StoreSnafu)?;
        info!(
            "dependency store '{}' holds {} edge(s)",
            store.name(),
            learned.len()
        );
        if learned.contains(&expected) {
            Ok(Verdict::Passed)
        } else {
            Ok(Verdict::failed(vec![format!(
                "expected '{}' in store '{}', found {} other edge(s)",
                expected,
                store.name(),
                learned.len()
            )]))
        }
    }
}
