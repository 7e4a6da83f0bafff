use crate::command::run;
use anyhow::{Context, Error, Result};
use async_trait::async_trait;
use log::info;
use model::collaborators::{ChartInstaller, ChartRelease};
use std::path::PathBuf;

/// Installs charts by shelling out to `helm`.
#[derive(Debug, Clone)]
pub struct Helm {
    helm_path: String,
    kubeconfig: Option<PathBuf>,
}

impl Helm {
    pub fn new<S>(helm_path: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            helm_path: helm_path.into(),
            kubeconfig: None,
        }
    }

    /// Target the cluster described by `kubeconfig` instead of the current context.
    pub fn kubeconfig<P>(mut self, kubeconfig: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    fn args<I>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut all: Vec<String> = args.into_iter().collect();
        if let Some(kubeconfig) = &self.kubeconfig {
            all.push("--kubeconfig".to_string());
            all.push(kubeconfig.to_string_lossy().into_owned());
        }
        all
    }

    /// The arguments of `helm install` for `release`.
    pub fn install_args(&self, release: &ChartRelease) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            release.name.clone(),
            release.chart.clone(),
            "--namespace".to_string(),
            release.namespace.clone(),
        ];
        if let Some(version) = &release.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        for (key, value) in &release.overrides {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        if release.wait {
            args.push("--wait".to_string());
        }
        self.args(args)
    }
}

impl Default for Helm {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl ChartInstaller for Helm {
    type E = Error;

    async fn add_repo(&self, name: &str, url: &str) -> Result<()> {
        info!("adding chart repository '{}' ({})", name, url);
        let args = self.args(["repo", "add", name, url].map(String::from));
        run(&self.helm_path, &args)
            .await
            .with_context(|| format!("Unable to add chart repository '{}'", name))?;
        Ok(())
    }

    async fn update_repo(&self) -> Result<()> {
        let args = self.args(["repo", "update"].map(String::from));
        run(&self.helm_path, &args)
            .await
            .context("Unable to update chart repositories")?;
        Ok(())
    }

    async fn remove_repo(&self, name: &str) -> Result<()> {
        info!("removing chart repository '{}'", name);
        let args = self.args(["repo", "remove", name].map(String::from));
        run(&self.helm_path, &args)
            .await
            .with_context(|| format!("Unable to remove chart repository '{}'", name))?;
        Ok(())
    }

    async fn install(&self, release: &ChartRelease) -> Result<()> {
        info!(
            "installing '{}' as '{}' in '{}'",
            release.chart, release.name, release.namespace
        );
        run(&self.helm_path, &self.install_args(release))
            .await
            .with_context(|| format!("Unable to install '{}'", release.name))?;
        Ok(())
    }
}

#[test]
fn install_args_carry_every_override() {
    let helm = Helm::default().kubeconfig("/tmp/kubeconfig.yaml");
    let release = ChartRelease::new("istiod", "istio/istiod", "istio-system")
        .version("1.22.0")
        .set("global.imagePullPolicy", "IfNotPresent")
        .wait(true);
    assert_eq!(
        helm.install_args(&release),
        vec![
            "install",
            "istiod",
            "istio/istiod",
            "--namespace",
            "istio-system",
            "--version",
            "1.22.0",
            "--set",
            "global.imagePullPolicy=IfNotPresent",
            "--wait",
            "--kubeconfig",
            "/tmp/kubeconfig.yaml",
        ]
    );
}
