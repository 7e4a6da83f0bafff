use crate::Overrides;
use anyhow::{format_err, Context, Result};
use clap::Parser;
use log::warn;
use model::clients::ObjectClient;
use model::lifecycle::{DependencyHeaderAssessment, PersistedDependencyAssessment};
use model::{
    HarnessConfig, Lifecycle, LifecycleConfig, RunContext, RunParameters, RunReport,
    TopologyBuilder,
};

/// Create the test topology, assess it, and remove it again.
#[derive(Debug, Parser)]
pub(crate) struct Run {
    #[clap(flatten)]
    overrides: Overrides,
}

impl Run {
    pub(crate) async fn run<C: ObjectClient>(self, client: C) -> Result<()> {
        let config = self.overrides.config()?;
        let ctx = RunContext::new(RunParameters::generate(&config));
        let report = execute(&client, &config, &ctx).await?;
        check(report)
    }
}

/// Runs the dependency-detection lifecycle. Ctrl-C cancels the run; teardown still happens.
pub(crate) async fn execute<C: ObjectClient>(
    client: &C,
    config: &HarnessConfig,
    ctx: &RunContext,
) -> Result<RunReport> {
    let topology = TopologyBuilder::new(ctx.params())
        .dependency_detection()
        .context("Unable to build the topology")?;
    let lifecycle = Lifecycle::new(client, topology, LifecycleConfig::from(config))
        .assess(DependencyHeaderAssessment)
        .assess(PersistedDependencyAssessment::new(None));

    let canceller = ctx.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling the run");
            canceller.cancel();
        }
    });
    let report = lifecycle.run(ctx).await;
    signal.abort();
    println!("{}", report);
    Ok(report)
}

pub(crate) fn check(report: RunReport) -> Result<()> {
    if report.passed() {
        Ok(())
    } else {
        Err(format_err!("Run '{}' failed", report.run_id))
    }
}
