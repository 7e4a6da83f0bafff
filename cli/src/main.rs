/*!

This is the command line interface for running the mesh dependency-detection harness, either
against an existing cluster or in a throwaway `kind` environment.

!*/

mod e2e;
mod render;
mod run;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use model::clients::KubeObjectClient;
use model::HarnessConfig;
use std::path::PathBuf;

/// The command line interface for the mesh dependency-detection harness.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    /// Path to the kubeconfig file. Also can be passed with the KUBECONFIG environment variable.
    #[clap(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Print the objects a run would create, without contacting a cluster.
    Render(render::Render),
    /// Run the harness against an existing cluster with the mesh installed.
    Run(run::Run),
    /// Create a kind cluster, install the mesh, run the harness and remove everything again.
    E2e(e2e::E2e),
}

/// Settings that can be given on the command line. They take precedence over the `MESH_HARNESS_`
/// environment variables.
#[derive(Debug, Default, clap::Args)]
pub(crate) struct Overrides {
    /// Skip the remaining assessments once one has failed.
    #[clap(long = "fail-fast")]
    fail_fast: bool,
    /// Wait for deleted objects to be gone before finishing.
    #[clap(long = "await-deletion")]
    await_deletion: bool,
    /// How long to wait for each workload to become available, in seconds.
    #[clap(long = "readiness-timeout")]
    readiness_timeout: Option<u64>,
    /// The response header the filter stamps.
    #[clap(long = "response-header")]
    response_header: Option<String>,
}

impl Overrides {
    pub(crate) fn config(&self) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::from_env().context("Unable to read configuration")?;
        config.fail_fast |= self.fail_fast;
        config.await_deletion |= self.await_deletion;
        if let Some(readiness_timeout) = self.readiness_timeout {
            config.readiness_timeout_secs = readiness_timeout;
        }
        if let Some(response_header) = &self.response_header {
            config.response_header = response_header.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Render(render) => render.run(),
        Command::Run(run) => run.run(client(args.kubeconfig).await?).await,
        Command::E2e(e2e) => e2e.run().await,
    }
}

async fn client(kubeconfig: Option<PathBuf>) -> Result<KubeObjectClient> {
    Ok(match kubeconfig {
        Some(path) => KubeObjectClient::new_from_kubeconfig_path(&path)
            .await
            .context(format!("Unable to create client from path '{:?}'", path))?,
        None => KubeObjectClient::new()
            .await
            .context("Unable to create default client")?,
    })
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for the harness crates only.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("model"), level)
                .filter(Some("selftest"), level)
                .init();
        }
    }
}
