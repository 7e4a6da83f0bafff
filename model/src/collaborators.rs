/*!

Interfaces to the collaborators that provide the environment the harness runs in: something that
creates clusters and loads images into them, and something that installs charts. The engine only
depends on these signatures. The `selftest` crate implements them with `kind` and `helm`.

!*/

use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::path::PathBuf;

/// How to create a cluster.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ClusterConfig {
    pub name: String,
    /// A provider-specific configuration file.
    pub config_file: Option<PathBuf>,
}

impl ClusterConfig {
    pub fn new<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            name: name.into(),
            config_file: None,
        }
    }

    pub fn config_file<P>(mut self, path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.config_file = Some(path.into());
        self
    }
}

/// Creates and destroys clusters.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// A created cluster.
    type Handle: Send + Sync;

    /// The error type returned by this trait's functions.
    type E: Debug + Display + Send + Sync + 'static;

    async fn create_cluster(&self, config: &ClusterConfig) -> Result<Self::Handle, Self::E>;

    async fn destroy_cluster(&self, handle: &Self::Handle) -> Result<(), Self::E>;

    /// Make a locally available image usable by the cluster's nodes without a registry pull.
    async fn load_image(&self, handle: &Self::Handle, image: &str) -> Result<(), Self::E>;
}

/// One chart installation.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChartRelease {
    /// The release name.
    pub name: String,
    /// The chart reference, e.g. `istio/base`.
    pub chart: String,
    pub namespace: String,
    pub version: Option<String>,
    /// Value overrides as `key=value` pairs, applied in order.
    pub overrides: Vec<(String, String)>,
    /// Block until every object of the release is ready.
    pub wait: bool,
}

impl ChartRelease {
    pub fn new<S1, S2, S3>(name: S1, chart: S2, namespace: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            name: name.into(),
            chart: chart.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn version<S>(mut self, version: S) -> Self
    where
        S: Into<String>,
    {
        self.version = Some(version.into());
        self
    }

    pub fn set<S1, S2>(mut self, key: S1, value: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// Installs charts from chart repositories.
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// The error type returned by this trait's functions.
    type E: Debug + Display + Send + Sync + 'static;

    async fn add_repo(&self, name: &str, url: &str) -> Result<(), Self::E>;

    async fn update_repo(&self) -> Result<(), Self::E>;

    async fn remove_repo(&self, name: &str) -> Result<(), Self::E>;

    async fn install(&self, release: &ChartRelease) -> Result<(), Self::E>;
}

#[test]
fn release_builder_keeps_override_order() {
    let release = ChartRelease::new("gateway", "istio/gateway", "istio-system")
        .version("1.22.0")
        .set("name", "test-gateway")
        .set("service.type", "ClusterIP")
        .wait(true);
    assert_eq!(release.version.as_deref(), Some("1.22.0"));
    assert_eq!(
        release.overrides,
        vec![
            ("name".to_string(), "test-gateway".to_string()),
            ("service.type".to_string(), "ClusterIP".to_string()),
        ]
    );
    assert!(release.wait);
}
