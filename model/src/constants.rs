/// Helper macro to avoid retyping the base domain-like name of the harness when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name.
/// When given a string literal parameter it adds `/parameter` to the end.
macro_rules! harness {
    () => {
        "mesh-harness.dev"
    };
    ($s:literal) => {
        concat!(harness!(), "/", $s)
    };
}

// Label keys
pub const LABEL_RUN: &str = harness!("run");
pub const LABEL_COMPONENT: &str = harness!("component");
pub const LABEL_APP: &str = "app";
pub const LABEL_ISTIO_INJECTION: &str = "istio-injection";

// Component label values
pub const COMPONENT_DEPENDENCY_LEARNER: &str = "dependency-learner";

// Mesh defaults
pub const DEFAULT_MESH_NAMESPACE: &str = "istio-system";
pub const DEFAULT_MESH_VERSION: &str = "1.22.0";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_GATEWAY_NAME: &str = "test-gateway";
pub const DEFAULT_GATEWAY_SELECTOR_KEY: &str = "istio";
pub const DEFAULT_GATEWAY_SELECTOR_VALUE: &str = "test-gateway";
pub const MESH_GATEWAY: &str = "mesh";
pub const MESH_DEFAULT_TELEMETRY: &str = "mesh-default";
pub const ACCESS_LOG_PROVIDER: &str = "envoy";

// Filter deployment
pub const DEFAULT_FILTER_HOST_PATH: &str = "/dependency-learner";
pub const DEFAULT_FILTER_MOUNT_PATH: &str = "/dependency-learner";
pub const DEFAULT_FILTER_VOLUME_NAME: &str = "dependency-learner";
pub const DEFAULT_FILTER_ARTIFACT_PATH: &str = "target/wasm32-wasi/release/dependency_learner.wasm";
pub const DEFAULT_RESPONSE_HEADER: &str = "detected-dependency";

// Workloads
pub const DEFAULT_WORKLOAD_IMAGE: &str = "nginx";
pub const DEFAULT_WORKLOAD_VERSION: &str = "1.25.5";
pub const CLIENT_NAME: &str = "client";
pub const SERVER_NAME: &str = "server";
pub const CONTAINER_NAME: &str = "testapp";
pub const SERVER_PORT: i32 = 80;
pub const SERVER_PORT_NAME: &str = "http";
pub const GATEWAY_PORT: i32 = 443;
pub const GATEWAY_PORT_NAME: &str = "https";
pub const SERVICE_ACCOUNT: &str = "default";

// Random name prefixes
pub const CLIENT_NAMESPACE_PREFIX: &str = "client";
pub const SERVER_NAMESPACE_PREFIX: &str = "server";
pub const FALLBACK_PREFIX: &str = "fallback";

#[test]
fn harness_constants_macro_test() {
    assert_eq!("mesh-harness.dev", harness!());
    assert_eq!("mesh-harness.dev/run", LABEL_RUN);
    assert_eq!("mesh-harness.dev/foo", harness!("foo"));
}
