use crate::run::{check, execute};
use crate::Overrides;
use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use model::{RunContext, RunParameters};
use selftest::Environment;

/// Bootstrap a kind environment with the mesh, run the harness in it, and finish the environment.
#[derive(Debug, Parser)]
pub(crate) struct E2e {
    #[clap(flatten)]
    overrides: Overrides,
}

impl E2e {
    pub(crate) async fn run(self) -> Result<()> {
        let config = self.overrides.config()?;
        let environment = Environment::bootstrap(config.clone())
            .await
            .context("Unable to bootstrap the environment")?;

        let mut ctx = RunContext::new(RunParameters::generate(&config));
        if let Some(cluster) = environment.context().cluster() {
            ctx = ctx.with_cluster(cluster);
        }
        let report = execute(environment.client(), &config, &ctx).await;
        let finished = environment.finish().await;
        if let Err(e) = &finished {
            error!("{:#}", e);
        }
        check(report?)?;
        finished
    }
}
