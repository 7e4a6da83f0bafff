use crate::config::HarnessConfig;
use crate::constants::{
    CLIENT_NAME, CLIENT_NAMESPACE_PREFIX, CONTAINER_NAME, FALLBACK_PREFIX, SERVER_NAME,
    SERVER_NAMESPACE_PREFIX, SERVER_PORT,
};
use std::path::Path;
use uuid::Uuid;

/// Number of random hex characters appended to generated names.
const RANDOM_SUFFIX_LEN: usize = 12;

/// Returns `prefix-<random>`. The suffix is taken from a v4 uuid so that concurrent runs against
/// the same cluster do not collide.
pub fn random_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix: String = suffix.chars().take(RANDOM_SUFFIX_LEN).collect();
    if prefix.is_empty() {
        suffix
    } else {
        format!("{}-{}", prefix, suffix)
    }
}

/// The immutable description of one run: every generated name and every fixed name that setup,
/// assessments and teardown agree on. Built once, then shared by all phases.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParameters {
    /// Unique identifier of the run, also used as a label value on every created object.
    pub run_id: String,
    pub client_namespace: String,
    pub server_namespace: String,
    /// Name shared by the mesh-level gateway, routing rule and filter deployment of this run.
    pub fallback_name: String,
    pub client_name: String,
    pub server_name: String,
    pub container_name: String,
    pub server_port: i32,
    pub mesh_namespace: String,
    pub cluster_domain: String,
    pub gateway_name: String,
    pub gateway_selector_key: String,
    pub gateway_selector_value: String,
    pub filter_url: String,
    pub response_header: String,
    pub workload_image: String,
}

impl RunParameters {
    /// Generates fresh unique names and takes the fixed ones from `config`.
    pub fn generate(config: &HarnessConfig) -> Self {
        Self::with_names(
            config,
            random_name(""),
            random_name(CLIENT_NAMESPACE_PREFIX),
            random_name(SERVER_NAMESPACE_PREFIX),
            random_name(FALLBACK_PREFIX),
        )
    }

    /// Builds parameters with caller-chosen unique names, e.g. to retry a run against the same
    /// identities.
    pub fn with_names<S1, S2, S3, S4>(
        config: &HarnessConfig,
        run_id: S1,
        client_namespace: S2,
        server_namespace: S3,
        fallback_name: S4,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
    {
        let filter_path = Path::new(&config.filter_mount_path).join(&config.filter_artifact_path);
        Self {
            run_id: run_id.into(),
            client_namespace: client_namespace.into(),
            server_namespace: server_namespace.into(),
            fallback_name: fallback_name.into(),
            client_name: CLIENT_NAME.to_string(),
            server_name: SERVER_NAME.to_string(),
            container_name: CONTAINER_NAME.to_string(),
            server_port: SERVER_PORT,
            mesh_namespace: config.mesh_namespace.clone(),
            cluster_domain: config.cluster_domain.clone(),
            gateway_name: config.gateway_name.clone(),
            gateway_selector_key: config.gateway_selector_key.clone(),
            gateway_selector_value: config.gateway_selector_value.clone(),
            filter_url: format!("file://{}", filter_path.display()),
            response_header: config.response_header.clone(),
            workload_image: config.workload_image_ref(),
        }
    }

    /// The short host the client requests, e.g. `server.server-abc.svc`.
    pub fn server_short_host(&self) -> String {
        format!("{}.{}.svc", self.server_name, self.server_namespace)
    }

    /// The fully qualified host the server's service registers.
    pub fn server_host(&self) -> String {
        fqdn(&self.server_name, &self.server_namespace, &self.cluster_domain)
    }

    /// Hosts captured by the fallback routing objects: every service, by short and by fully
    /// qualified name.
    pub fn fallback_hosts(&self) -> Vec<String> {
        vec!["*.svc".to_string(), format!("*.svc.{}", self.cluster_domain)]
    }

    pub fn gateway_host(&self) -> String {
        fqdn(&self.gateway_name, &self.mesh_namespace, &self.cluster_domain)
    }

    /// The workload identity the mesh assigns to the client.
    pub fn client_identity(&self, service_account: &str) -> String {
        format!(
            "spiffe://{}/ns/{}/sa/{}",
            self.cluster_domain, self.client_namespace, service_account
        )
    }

    /// The upstream cluster name the proxy resolves requests to the server to.
    pub fn server_upstream_cluster(&self) -> String {
        format!("outbound|{}||{}", self.server_port, self.server_host())
    }

    /// The command the client runs to reach the server.
    pub fn probe_command(&self) -> Vec<String> {
        vec![
            "curl".to_string(),
            "-I".to_string(),
            format!("http://{}", self.server_short_host()),
        ]
    }
}

fn fqdn(name: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{}.{}.svc.{}", name, namespace, cluster_domain)
}
