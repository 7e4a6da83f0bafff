pub(crate) mod mock;

use async_trait::async_trait;
use mock::MockObjectClient;
use model::dependency_store::{self, DependencyEdge, DependencyStore};
use model::lifecycle::{
    expected_marker, DependencyHeaderAssessment, PersistedDependencyAssessment,
};
use model::{
    Classify, ErrorKind, HarnessConfig, Lifecycle, LifecycleConfig, ObjectRef, ResourceKind,
    RunContext, RunParameters, Topology, TopologyBuilder, Verdict,
};
use std::sync::Arc;
use std::time::Duration;

fn params() -> RunParameters {
    RunParameters::with_names(
        &HarnessConfig::default(),
        "run-1",
        "client-1",
        "server-1",
        "fallback-1",
    )
}

fn topology(params: &RunParameters) -> Topology {
    TopologyBuilder::new(params).dependency_detection().unwrap()
}

/// The response the client sees when the filter works.
fn good_response(params: &RunParameters) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nserver: istio-envoy\r\n{}: {}\r\n\r\n",
        params.response_header,
        expected_marker(params)
    )
    .into_bytes()
}

fn lifecycle<'a>(
    client: &'a MockObjectClient,
    params: &RunParameters,
    config: LifecycleConfig,
) -> Lifecycle<'a, MockObjectClient> {
    Lifecycle::new(client, topology(params), config)
        .assess(DependencyHeaderAssessment)
        .assess(PersistedDependencyAssessment::new(None))
}

#[tokio::test(start_paused = true)]
async fn full_run_passes_and_leaves_nothing_behind() {
    let params = params();
    let client = MockObjectClient::new();
    client.set_exec_output(&good_response(&params));

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&RunContext::new(params.clone()))
        .await;

    assert!(report.passed(), "{}", report);
    assert_eq!(report.assessments[0].verdict, Verdict::Passed);
    assert!(matches!(
        report.assessments[1].verdict,
        Verdict::Skipped { .. }
    ));
    assert_eq!(report.teardown.deleted.len(), topology(&params).len());
    assert!(client.objects().is_empty(), "{:?}", client.objects());
    assert_eq!(client.exec_pods(), vec!["client-0"]);
}

#[tokio::test(start_paused = true)]
async fn objects_are_created_in_dependency_order() {
    let params = params();
    let client = MockObjectClient::new();
    client.set_exec_output(&good_response(&params));
    let topology = topology(&params);

    lifecycle(&client, &params, LifecycleConfig::default())
        .run(&RunContext::new(params.clone()))
        .await;

    let created = client.created();
    assert_eq!(created, topology.object_refs());
    for spec in topology.specs() {
        let position = created.iter().position(|o| o == &spec.object_ref()).unwrap();
        for dependency in &spec.depends_on {
            assert!(created.iter().position(|o| o == dependency).unwrap() < position);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn teardown_attempts_every_object_despite_a_failed_delete() {
    let params = params();
    let client = MockObjectClient::new();
    client.set_exec_output(&good_response(&params));
    let gateway = ObjectRef::namespaced(
        ResourceKind::Gateway,
        &params.mesh_namespace,
        &params.fallback_name,
    );
    client.fail_delete(gateway.clone());

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&RunContext::new(params.clone()))
        .await;

    assert!(!report.passed());
    assert_eq!(report.teardown.failures.len(), 1);
    assert_eq!(report.teardown.failures[0].object(), &gateway);
    assert!(report.teardown.failures[0].is_kind(ErrorKind::Unavailable));
    let deleted = client.deleted();
    for object in topology(&params).object_refs() {
        assert!(deleted.contains(&object), "{} was not attempted", object);
    }
    assert_eq!(client.objects(), vec![gateway]);
}

#[tokio::test(start_paused = true)]
async fn sequential_runs_leave_zero_residual_objects() {
    let client = MockObjectClient::new();
    let config = HarnessConfig::default();
    for params in [
        RunParameters::generate(&config),
        RunParameters::generate(&config),
        params(),
        params(),
    ] {
        client.set_exec_output(&good_response(&params));
        let report = lifecycle(&client, &params, LifecycleConfig::from(&config))
            .run(&RunContext::new(params.clone()))
            .await;
        assert!(report.passed(), "{}", report);
        assert!(client.objects().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn setup_failure_skips_assessments_but_tears_down() {
    let params = params();
    let client = MockObjectClient::new();
    let service =
        ObjectRef::namespaced(ResourceKind::Service, &params.server_namespace, &params.server_name);
    client.fail_create(service.clone());

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&RunContext::new(params.clone()))
        .await;

    assert!(!report.passed());
    let setup_error = report.setup_error.as_ref().unwrap();
    assert!(setup_error.is_kind(ErrorKind::Validation), "{}", setup_error);
    assert!(report.assessments.is_empty());
    assert!(client.exec_pods().is_empty());
    assert!(report.teardown.deleted.contains(&service));
    assert_eq!(report.teardown.deleted.len(), client.created().len());
    assert!(client.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unready_workload_times_out_setup() {
    let params = params();
    let client = MockObjectClient::new();
    client.never_ready(ObjectRef::namespaced(
        ResourceKind::Deployment,
        &params.server_namespace,
        &params.server_name,
    ));

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&RunContext::new(params.clone()))
        .await;

    let setup_error = report.setup_error.as_ref().unwrap();
    assert!(setup_error.is_kind(ErrorKind::Timeout), "{}", setup_error);
    assert!(report.assessments.is_empty());
    assert!(report.teardown.is_clean());
    assert!(client.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unavailable_response_fails_the_run_without_stopping_it() {
    let params = params();
    let client = MockObjectClient::new();
    client.set_exec_output(b"HTTP/1.1 503 Service Unavailable\r\n");

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&RunContext::new(params.clone()))
        .await;

    assert!(!report.passed());
    assert!(report.setup_error.is_none());
    match &report.assessments[0].verdict {
        Verdict::Failed { failures } => assert_eq!(failures.len(), 2),
        other => panic!("unexpected verdict: {}", other),
    }
    assert!(report.teardown.is_clean());
    assert!(client.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fail_fast_skips_remaining_assessments() {
    let params = params();
    let client = MockObjectClient::new();
    client.set_exec_output(b"HTTP/1.1 503 Service Unavailable\r\n");
    let config = LifecycleConfig {
        fail_fast: true,
        ..LifecycleConfig::default()
    };

    let report = Lifecycle::new(&client, topology(&params), config)
        .assess(DependencyHeaderAssessment)
        .assess(DependencyHeaderAssessment)
        .run(&RunContext::new(params.clone()))
        .await;

    assert!(report.assessments[0].verdict.is_failure());
    assert_eq!(
        report.assessments[1].verdict,
        Verdict::skipped("an earlier assessment failed")
    );
    assert_eq!(client.exec_pods().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_creates_nothing() {
    let params = params();
    let client = MockObjectClient::new();
    let ctx = RunContext::new(params.clone());
    ctx.cancel();

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&ctx)
        .await;

    assert!(report
        .setup_error
        .as_ref()
        .unwrap()
        .is_kind(ErrorKind::Cancelled));
    assert!(client.created().is_empty());
    assert!(report.teardown.deleted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_readiness_still_tears_down() {
    let params = params();
    let client = MockObjectClient::new();
    client.never_ready(ObjectRef::namespaced(
        ResourceKind::Deployment,
        &params.client_namespace,
        &params.client_name,
    ));
    let ctx = RunContext::new(params.clone());
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        canceller.cancel();
    });

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&ctx)
        .await;

    let setup_error = report.setup_error.as_ref().unwrap();
    assert!(setup_error.is_kind(ErrorKind::Cancelled), "{}", setup_error);
    assert!(report.assessments.is_empty());
    assert_eq!(client.created(), topology(&params).object_refs());
    assert!(report.teardown.is_clean());
    assert_eq!(report.teardown.deleted.len(), topology(&params).len());
    assert!(client.objects().is_empty(), "{:?}", client.objects());
}

#[tokio::test(start_paused = true)]
async fn conflicting_object_survives_teardown() {
    let params = params();
    let client = MockObjectClient::new();
    let topology = topology(&params);
    let gateway = ObjectRef::namespaced(
        ResourceKind::Gateway,
        &params.mesh_namespace,
        &params.fallback_name,
    );
    client.insert(topology.get(&gateway).unwrap());

    let report = lifecycle(&client, &params, LifecycleConfig::default())
        .run(&RunContext::new(params.clone()))
        .await;

    let setup_error = report.setup_error.as_ref().unwrap();
    assert!(setup_error.is_kind(ErrorKind::Conflict), "{}", setup_error);
    assert!(report.assessments.is_empty());
    assert!(client.created().contains(&gateway));
    assert!(!client.deleted().contains(&gateway));
    let deleted = client.deleted();
    for object in client.created().iter().filter(|o| **o != gateway) {
        assert!(deleted.contains(object), "{} was not deleted", object);
    }
    assert_eq!(client.objects(), vec![gateway]);
}

#[tokio::test(start_paused = true)]
async fn teardown_can_wait_for_removal() {
    let params = params();
    let client = MockObjectClient::new();
    client.set_exec_output(&good_response(&params));
    let config = LifecycleConfig {
        await_deletion: true,
        ..LifecycleConfig::default()
    };

    let report = lifecycle(&client, &params, config)
        .run(&RunContext::new(params.clone()))
        .await;
    assert!(report.passed(), "{}", report);
}

struct RecordedStore {
    edges: Vec<DependencyEdge>,
}

#[async_trait]
impl DependencyStore for RecordedStore {
    fn name(&self) -> &str {
        "recorded"
    }

    async fn learned(&self, _: &RunContext) -> dependency_store::Result<Vec<DependencyEdge>> {
        Ok(self.edges.clone())
    }
}

struct UnreachableStore;

#[async_trait]
impl DependencyStore for UnreachableStore {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn learned(&self, _: &RunContext) -> dependency_store::Result<Vec<DependencyEdge>> {
        dependency_store::UnavailableSnafu {
            store: "unreachable",
            reason: "connection refused",
        }
        .fail()
    }
}

#[tokio::test(start_paused = true)]
async fn persisted_dependency_is_checked_against_the_store() {
    let params = params();
    let client = MockObjectClient::new();
    client.set_exec_output(&good_response(&params));
    let store: Arc<dyn DependencyStore> = Arc::new(RecordedStore {
        edges: vec![expected_marker(&params)],
    });

    let report = Lifecycle::new(&client, topology(&params), LifecycleConfig::default())
        .assess(PersistedDependencyAssessment::new(Some(store)))
        .run(&RunContext::new(params.clone()))
        .await;
    assert_eq!(report.assessments[0].verdict, Verdict::Passed);

    let store: Arc<dyn DependencyStore> = Arc::new(RecordedStore { edges: vec![] });
    let report = Lifecycle::new(&client, topology(&params), LifecycleConfig::default())
        .assess(PersistedDependencyAssessment::new(Some(store)))
        .run(&RunContext::new(params.clone()))
        .await;
    assert!(matches!(
        report.assessments[0].verdict,
        Verdict::Failed { .. }
    ));

    let store: Arc<dyn DependencyStore> = Arc::new(UnreachableStore);
    let report = Lifecycle::new(&client, topology(&params), LifecycleConfig::default())
        .assess(PersistedDependencyAssessment::new(Some(store)))
        .run(&RunContext::new(params.clone()))
        .await;
    assert!(matches!(
        report.assessments[0].verdict,
        Verdict::Errored {
            kind: ErrorKind::Unavailable,
            ..
        }
    ));
    assert!(client.objects().is_empty());
}
