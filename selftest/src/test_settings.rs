use anyhow::{format_err, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Test settings provides a way to send arguments into the environment bootstrap using
/// environment variables prefixed with `SELFTEST_`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestSettings {
    /// The path to the [kind] binary. Defaults to `kind` (i.e. by default the kind binary is
    /// expected to be found via `$PATH`).
    ///
    /// # Example
    ///
    /// ```text
    /// SELFTEST_KIND_PATH=/wherever/kind
    /// ```
    ///
    /// [kind]: https://kind.sigs.k8s.io/
    #[serde(default = "kind")]
    pub kind_path: String,

    /// The path to the `helm` binary. Defaults to `helm`.
    #[serde(default = "helm")]
    pub helm_path: String,

    /// A kind cluster configuration file. Takes precedence over `filter_source_dir`.
    #[serde(default)]
    pub cluster_config: Option<PathBuf>,

    /// A local directory holding the built filter. When set, and no `cluster_config` is given,
    /// the cluster is created with this directory mounted at the filter host path on the node.
    #[serde(default)]
    pub filter_source_dir: Option<PathBuf>,

    /// Leave the cluster running after the environment finishes.
    #[serde(default)]
    pub keep_cluster: bool,
}

impl TestSettings {
    /// The settings read from the environment once per process.
    pub fn get() -> Result<&'static TestSettings> {
        TEST_SETTINGS
            .as_ref()
            .map_err(|e| format_err!("Error parsing TestSettings environment variables: {}", e))
    }
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            kind_path: kind(),
            helm_path: helm(),
            cluster_config: None,
            filter_source_dir: None,
            keep_cluster: false,
        }
    }
}

lazy_static::lazy_static! {
    static ref TEST_SETTINGS: std::result::Result<TestSettings, envy::Error> =
        envy::prefixed("SELFTEST_").from_env::<TestSettings>();
}

/// We need these to provide defaults for serde.
fn kind() -> String {
    String::from("kind")
}

fn helm() -> String {
    String::from("helm")
}

#[test]
fn settings_default_to_binaries_on_path() {
    let settings: TestSettings = envy::prefixed("SELFTEST_")
        .from_iter(vec![(
            "SELFTEST_CLUSTER_CONFIG".to_string(),
            "/tmp/cluster.yaml".to_string(),
        )])
        .unwrap();
    assert_eq!(settings.kind_path, "kind");
    assert_eq!(settings.helm_path, "helm");
    assert_eq!(
        settings.cluster_config,
        Some(PathBuf::from("/tmp/cluster.yaml"))
    );
    assert!(!settings.keep_cluster);
}
