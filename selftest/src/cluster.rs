use crate::command::{run, run_blocking};
use crate::test_settings::TestSettings;
use anyhow::{format_err, Context, Error, Result};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use log::{info, warn};
use model::clients::KubeObjectClient;
use model::collaborators::{ClusterConfig, ClusterProvider};
use std::convert::TryInto;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

pub const KUBECONFIG_FILENAME: &str = "kubeconfig.yaml";
pub const CLUSTER_CONFIG_FILENAME: &str = "cluster.yaml";

/// Creates `kind` clusters.
#[derive(Debug, Clone)]
pub struct Kind {
    kind_path: String,
}

impl Kind {
    pub fn new<S>(kind_path: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind_path: kind_path.into(),
        }
    }
}

impl Default for Kind {
    fn default() -> Self {
        Self::new("kind")
    }
}

/// Represents a `kind` cluster. The `Drop` trait is implemented deleting the `kind` cluster when it
/// goes out of scope, unless it was destroyed already or is being kept.
#[derive(Debug)]
pub struct Cluster {
    name: String,
    kind_path: String,
    kubeconfig_dir: TempDir,
    destroyed: AtomicBool,
    keep: bool,
}

impl Cluster {
    /// Creates a kind cluster named `cluster_name` using the `kind` binary from the test settings.
    pub async fn new(cluster_name: &str) -> Result<Cluster> {
        let settings = TestSettings::get()?;
        Kind::new(&settings.kind_path)
            .create_cluster(&ClusterConfig::new(cluster_name))
            .await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path to the kubeconfig file in the `TempDir` created for the cluster.
    pub fn kubeconfig(&self) -> PathBuf {
        self.kubeconfig_dir.path().join(KUBECONFIG_FILENAME)
    }

    /// Do not delete the cluster when `self` is dropped or destroyed.
    pub fn keep(mut self) -> Self {
        self.keep = true;
        self
    }

    /// Create the k8s client for the cluster.
    pub async fn k8s_client(&self) -> Result<Client> {
        let kubeconfig = Kubeconfig::read_from(self.kubeconfig())?;
        let config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        Ok(config.try_into()?)
    }

    /// An object client for the cluster with every harness kind registered.
    pub async fn object_client(&self) -> Result<KubeObjectClient> {
        Ok(KubeObjectClient::new_from_k8s_client(
            self.k8s_client().await?,
        ))
    }

    fn delete_args(&self) -> [&str; 5] {
        ["delete", "cluster", "--name", self.name.as_str(), "--quiet"]
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if self.keep || self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = run_blocking(&self.kind_path, self.delete_args()) {
            eprintln!("unable to delete kind cluster '{}': {}", self.name, e)
        }
    }
}

/// Writes a kind configuration that mounts `source_dir` on the node at `node_path`.
pub fn write_mount_config(dir: &Path, source_dir: &Path, node_path: &str) -> Result<PathBuf> {
    let source_dir = source_dir
        .to_str()
        .ok_or_else(|| format_err!("non utf-8 path '{}'", source_dir.to_string_lossy()))?;
    let path = dir.join(CLUSTER_CONFIG_FILENAME);
    let contents = format!(
        r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
- role: control-plane
  extraMounts:
  - hostPath: {}
    containerPath: {}
"#,
        source_dir, node_path
    );
    std::fs::write(&path, contents)
        .with_context(|| format!("Unable to write '{}'", path.display()))?;
    Ok(path)
}

#[async_trait]
impl ClusterProvider for Kind {
    type Handle = Cluster;
    type E = Error;

    /// Creates a kind cluster. If a cluster with the same name already exists, it is deleted
    /// first.
    async fn create_cluster(&self, config: &ClusterConfig) -> Result<Cluster> {
        let kubeconfig_dir = TempDir::new()?;
        let kubeconfig = kubeconfig_dir.path().join(KUBECONFIG_FILENAME);
        let kubeconfig = kubeconfig
            .to_str()
            .ok_or_else(|| format_err!("non utf-8 path '{}'", kubeconfig.to_string_lossy()))?;
        run(
            &self.kind_path,
            ["delete", "cluster", "--name", config.name.as_str()],
        )
        .await?;

        let mut args = vec![
            "--kubeconfig".to_string(),
            kubeconfig.to_string(),
            "create".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            config.name.clone(),
        ];
        if let Some(config_file) = &config.config_file {
            args.push("--config".to_string());
            args.push(config_file.to_string_lossy().into_owned());
        }
        info!("creating kind cluster '{}'", config.name);
        run(&self.kind_path, &args)
            .await
            .with_context(|| format!("Unable to create kind cluster '{}'", config.name))?;
        Ok(Cluster {
            name: config.name.clone(),
            kind_path: self.kind_path.clone(),
            kubeconfig_dir,
            destroyed: AtomicBool::new(false),
            keep: false,
        })
    }

    async fn destroy_cluster(&self, cluster: &Cluster) -> Result<()> {
        if cluster.keep {
            warn!("keeping kind cluster '{}'", cluster.name);
            return Ok(());
        }
        info!("deleting kind cluster '{}'", cluster.name);
        run(&self.kind_path, cluster.delete_args())
            .await
            .with_context(|| format!("Unable to delete kind cluster '{}'", cluster.name))?;
        cluster.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Uses `kind load` to load an image from the machine to the kind cluster. The image must have
    /// been pulled locally.
    async fn load_image(&self, cluster: &Cluster, image: &str) -> Result<()> {
        info!("loading image '{}' into '{}'", image, cluster.name);
        run(
            &self.kind_path,
            ["load", "docker-image", image, "--name", cluster.name.as_str()],
        )
        .await
        .with_context(|| format!("Unable to load image '{}'", image))?;
        Ok(())
    }
}
