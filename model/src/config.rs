use crate::constants::{
    DEFAULT_CLUSTER_DOMAIN, DEFAULT_FILTER_ARTIFACT_PATH, DEFAULT_FILTER_HOST_PATH,
    DEFAULT_FILTER_MOUNT_PATH, DEFAULT_FILTER_VOLUME_NAME, DEFAULT_GATEWAY_NAME,
    DEFAULT_GATEWAY_SELECTOR_KEY, DEFAULT_GATEWAY_SELECTOR_VALUE, DEFAULT_MESH_NAMESPACE,
    DEFAULT_MESH_VERSION, DEFAULT_RESPONSE_HEADER, DEFAULT_WORKLOAD_IMAGE,
    DEFAULT_WORKLOAD_VERSION,
};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use std::time::Duration;

/// The prefix of every environment variable read by [`HarnessConfig::from_env`].
pub const ENV_PREFIX: &str = "MESH_HARNESS_";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to read harness configuration from the environment: {}", source))]
    Env { source: envy::Error },
}

/// Every tunable of a harness run. Each field can be set with an environment variable made of
/// [`ENV_PREFIX`] and the field name in upper case.
///
/// # Example
///
/// ```text
/// MESH_HARNESS_MESH_VERSION=1.22.0
/// MESH_HARNESS_READINESS_TIMEOUT_SECS=600
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Version of the mesh charts and images.
    pub mesh_version: String,
    /// The namespace the control plane and the gateway are installed into.
    pub mesh_namespace: String,
    pub cluster_domain: String,
    pub gateway_name: String,
    pub gateway_selector_key: String,
    pub gateway_selector_value: String,
    /// Directory on the node that holds the filter artifact.
    pub filter_host_path: String,
    /// Where `filter_host_path` is mounted inside the gateway.
    pub filter_mount_path: String,
    pub filter_volume_name: String,
    /// Path of the filter artifact relative to `filter_mount_path`.
    pub filter_artifact_path: String,
    /// Name of the response header the filter stamps.
    pub response_header: String,
    pub workload_image: String,
    pub workload_version: String,
    pub readiness_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub probe_timeout_secs: u64,
    /// Consecutive transport failures the readiness waiter tolerates before giving up.
    pub max_transport_failures: u32,
    /// Skip the remaining assessments once one has failed.
    pub fail_fast: bool,
    /// Wait for deleted objects to disappear before teardown returns.
    pub await_deletion: bool,
    pub deletion_timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mesh_version: DEFAULT_MESH_VERSION.to_string(),
            mesh_namespace: DEFAULT_MESH_NAMESPACE.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            gateway_name: DEFAULT_GATEWAY_NAME.to_string(),
            gateway_selector_key: DEFAULT_GATEWAY_SELECTOR_KEY.to_string(),
            gateway_selector_value: DEFAULT_GATEWAY_SELECTOR_VALUE.to_string(),
            filter_host_path: DEFAULT_FILTER_HOST_PATH.to_string(),
            filter_mount_path: DEFAULT_FILTER_MOUNT_PATH.to_string(),
            filter_volume_name: DEFAULT_FILTER_VOLUME_NAME.to_string(),
            filter_artifact_path: DEFAULT_FILTER_ARTIFACT_PATH.to_string(),
            response_header: DEFAULT_RESPONSE_HEADER.to_string(),
            workload_image: DEFAULT_WORKLOAD_IMAGE.to_string(),
            workload_version: DEFAULT_WORKLOAD_VERSION.to_string(),
            readiness_timeout_secs: 300,
            poll_interval_ms: 2000,
            probe_timeout_secs: 60,
            max_transport_failures: 5,
            fail_fast: false,
            await_deletion: false,
            deletion_timeout_secs: 120,
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Result<Self, Error> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<HarnessConfig>()
            .context(EnvSnafu)
    }

    pub fn workload_image_ref(&self) -> String {
        format!("{}:{}", self.workload_image, self.workload_version)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn deletion_timeout(&self) -> Duration {
        Duration::from_secs(self.deletion_timeout_secs)
    }
}

#[test]
fn config_defaults_fill_missing_fields() {
    let config: HarnessConfig =
        envy::from_iter(vec![("MESH_VERSION".to_string(), "1.23.1".to_string())]).unwrap();
    assert_eq!(config.mesh_version, "1.23.1");
    assert_eq!(config.mesh_namespace, "istio-system");
    assert_eq!(config.workload_image_ref(), "nginx:1.25.5");
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
}
