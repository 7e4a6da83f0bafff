use crate::cluster::{write_mount_config, Cluster, Kind};
use crate::helm::Helm;
use crate::test_settings::TestSettings;
use anyhow::{format_err, Context, Result};
use log::{error, info};
use model::clients::{KubeObjectClient, ObjectClient};
use model::collaborators::{ChartInstaller, ChartRelease, ClusterConfig, ClusterProvider};
use model::lifecycle::{apply_topology, teardown_topology};
use model::params::random_name;
use model::{
    HarnessConfig, LifecycleConfig, ObjectRef, ResourceKind, ResourceSpec, RunContext,
    RunParameters, Topology, TopologyBuilder,
};
use std::path::PathBuf;
use tempfile::TempDir;

pub const CLUSTER_NAME_PREFIX: &str = "test-cluster-istio";
pub const MESH_REPO_NAME: &str = "istio";
pub const MESH_REPO_URL: &str = "https://istio-release.storage.googleapis.com/charts";
pub const BASE_CHART: &str = "istio/base";
pub const BASE_RELEASE: &str = "istio-base";
pub const CONTROL_PLANE_CHART: &str = "istio/istiod";
pub const CONTROL_PLANE_RELEASE: &str = "istiod";
pub const GATEWAY_CHART: &str = "istio/gateway";
pub const GATEWAY_RELEASE: &str = "gateway";

/// The images the environment needs, which must have been pulled locally.
pub fn images(config: &HarnessConfig) -> Vec<String> {
    vec![
        format!("istio/proxyv2:{}", config.mesh_version),
        format!("istio/pilot:{}", config.mesh_version),
        config.workload_image_ref(),
    ]
}

/// The chart installations that make up the mesh, in installation order.
pub fn mesh_releases(config: &HarnessConfig) -> Vec<ChartRelease> {
    let release = |name: &str, chart: &str| {
        ChartRelease::new(name, chart, &config.mesh_namespace)
            .version(&config.mesh_version)
            .wait(true)
    };
    vec![
        release(BASE_RELEASE, BASE_CHART),
        release(CONTROL_PLANE_RELEASE, CONTROL_PLANE_CHART)
            .set("global.imagePullPolicy", "IfNotPresent"),
        release(GATEWAY_RELEASE, GATEWAY_CHART)
            .set("name", &config.gateway_name)
            .set("service.type", "ClusterIP")
            .set(
                format!("labels.{}", config.gateway_selector_key),
                &config.gateway_selector_value,
            )
            .set("volumes[0].name", &config.filter_volume_name)
            .set("volumes[0].hostPath.path", &config.filter_host_path)
            .set("volumeMounts[0].name", &config.filter_volume_name)
            .set("volumeMounts[0].mountPath", &config.filter_mount_path)
            .set("imagePullPolicy", "IfNotPresent"),
    ]
}

/// Loads the mesh images into `cluster` and installs the mesh charts. Any failure is fatal.
pub async fn install_mesh<P, I>(
    provider: &P,
    cluster: &P::Handle,
    installer: &I,
    config: &HarnessConfig,
) -> Result<()>
where
    P: ClusterProvider,
    I: ChartInstaller,
{
    for image in images(config) {
        provider
            .load_image(cluster, &image)
            .await
            .map_err(|e| format_err!("Unable to load image '{}': {}", image, e))?;
    }
    installer
        .add_repo(MESH_REPO_NAME, MESH_REPO_URL)
        .await
        .map_err(|e| format_err!("Failed to add the mesh chart repository: {}", e))?;
    installer
        .update_repo()
        .await
        .map_err(|e| format_err!("Failed to update chart repositories: {}", e))?;
    for release in mesh_releases(config) {
        installer
            .install(&release)
            .await
            .map_err(|e| format_err!("Failed to install {}: {}", release.name, e))?;
    }
    Ok(())
}

/// A kind cluster with the mesh installed, ready for harness runs.
pub struct Environment {
    kind: Kind,
    helm: Helm,
    cluster: Cluster,
    client: KubeObjectClient,
    config: HarnessConfig,
    defaults: Topology,
    /// Everything the environment created through the object client.
    ctx: RunContext,
    _config_dir: TempDir,
}

impl Environment {
    /// Creates a cluster and installs the mesh into it. If a step fails, whatever was created is
    /// removed again before the error is returned.
    pub async fn bootstrap(config: HarnessConfig) -> Result<Self> {
        let settings = TestSettings::get()?;
        let kind = Kind::new(&settings.kind_path);
        let config_dir = TempDir::new()?;
        let mut cluster_config = ClusterConfig::new(random_name(CLUSTER_NAME_PREFIX));
        if let Some(path) = &settings.cluster_config {
            cluster_config = cluster_config.config_file(path);
        } else if let Some(source_dir) = &settings.filter_source_dir {
            cluster_config = cluster_config.config_file(write_mount_config(
                config_dir.path(),
                source_dir,
                &config.filter_host_path,
            )?);
        }

        let mut cluster = kind.create_cluster(&cluster_config).await?;
        if settings.keep_cluster {
            cluster = cluster.keep();
        }
        let client = cluster.object_client().await?;
        let helm = Helm::new(&settings.helm_path).kubeconfig(cluster.kubeconfig());
        let params = RunParameters::generate(&config);
        let defaults = TopologyBuilder::new(&params).mesh_defaults()?;
        let mut environment = Self {
            kind,
            helm,
            cluster,
            client,
            ctx: RunContext::new(params).with_cluster(cluster_config.name.clone()),
            config,
            defaults,
            _config_dir: config_dir,
        };

        if let Err(e) = environment.install().await {
            error!("environment bootstrap failed: {:#}", e);
            if let Err(finish_error) = environment.finish().await {
                error!("{}", finish_error);
            }
            return Err(e);
        }
        info!("environment '{}' is ready", environment.cluster.name());
        Ok(environment)
    }

    async fn install(&mut self) -> Result<()> {
        let namespace =
            ResourceSpec::new(ResourceKind::Namespace, None, &self.config.mesh_namespace);
        self.client
            .create(&namespace)
            .await
            .with_context(|| format!("Unable to create namespace '{}'", namespace.name))?;
        self.ctx = self.ctx.with_created(vec![namespace.object_ref()]);

        install_mesh(&self.kind, &self.cluster, &self.helm, &self.config).await?;

        let (ctx, applied) = apply_topology(
            &self.client,
            &self.ctx,
            &self.defaults,
            &LifecycleConfig::from(&self.config),
        )
        .await;
        self.ctx = ctx;
        applied.context("Unable to create the mesh defaults")
    }

    pub fn client(&self) -> &KubeObjectClient {
        &self.client
    }

    pub fn kubeconfig(&self) -> PathBuf {
        self.cluster.kubeconfig()
    }

    /// The context runs in this environment derive from.
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Removes the mesh defaults, the chart repository, the mesh namespace and the cluster. Every
    /// step is attempted; the failures are reported together.
    pub async fn finish(self) -> Result<()> {
        let mut failures = Vec::new();
        let mesh_namespace = ObjectRef::namespace(&self.config.mesh_namespace);
        let defaults_ctx = self.ctx.detached().with_created(
            self.ctx
                .created()
                .iter()
                .filter(|object| **object != mesh_namespace)
                .cloned()
                .collect(),
        );
        let teardown = teardown_topology(
            &self.client,
            &defaults_ctx,
            &self.defaults,
            &LifecycleConfig::from(&self.config),
        )
        .await;
        failures.extend(teardown.failures.iter().map(ToString::to_string));

        if let Err(e) = self.helm.remove_repo(MESH_REPO_NAME).await {
            failures.push(format!("{:#}", e));
        }
        if self.ctx.created().contains(&mesh_namespace) {
            if let Err(e) = self.client.delete(&mesh_namespace).await {
                failures.push(e.to_string());
            }
        }
        if let Err(e) = self.kind.destroy_cluster(&self.cluster).await {
            failures.push(format!("{:#}", e));
        }

        if failures.is_empty() {
            info!("environment '{}' finished", self.cluster.name());
            Ok(())
        } else {
            Err(format_err!(
                "Unable to finish the environment cleanly:\n{}",
                failures.join("\n")
            ))
        }
    }
}
