/*!

The lifecycle controller runs one test run through its phases:

```text
Setup ──ok──▶ Assess(1) ▶ … ▶ Assess(N) ──▶ Teardown
  │                                           ▲
  └──────────────failed / cancelled───────────┘
```

Setup creates the topology in dependency order and waits for readiness. Teardown always runs, on
a context that is detached from the run's cancellation, and attempts to delete every object whose
creation was attempted even when some deletions fail.

!*/

pub use assessment::{
    expected_marker, Assessment, DependencyHeaderAssessment, PersistedDependencyAssessment,
};
pub use error::{AssessError, Error, Result, TeardownError};
pub use report::{AssessmentReport, RunReport, TeardownReport, Verdict};

mod assessment;
mod error;
mod report;

use crate::clients::ObjectClient;
use crate::config::HarnessConfig;
use crate::context::RunContext;
use crate::error::{Classify, ErrorKind};
use crate::topology::Topology;
use crate::wait::{Condition, WaitCondition, Waiter};
use log::{debug, error, info, warn};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// The phase a run is in.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    Setup,
    /// The zero-based index of the assessment.
    Assess(usize),
    Teardown,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::Assess(index) => write!(f, "assess({})", index + 1),
            Phase::Teardown => f.write_str("teardown"),
        }
    }
}

/// Timing and failure policy of a run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LifecycleConfig {
    pub poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub probe_timeout: Duration,
    /// Consecutive transport failures a wait tolerates.
    pub max_transport_failures: u32,
    /// Skip the remaining assessments once one has failed.
    pub fail_fast: bool,
    /// Wait for deleted objects to disappear before Teardown returns.
    pub await_deletion: bool,
    pub deletion_timeout: Duration,
}

impl From<&HarnessConfig> for LifecycleConfig {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            readiness_timeout: config.readiness_timeout(),
            probe_timeout: config.probe_timeout(),
            max_transport_failures: config.max_transport_failures,
            fail_fast: config.fail_fast,
            await_deletion: config.await_deletion,
            deletion_timeout: config.deletion_timeout(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

/// Creates the objects of `topology` in order, then waits for the ones that declare a readiness
/// condition. Stops at the first failure.
///
/// The returned context records every object whose creation was attempted, including one whose
/// creation failed without a conflict, so that it can be handed to [`teardown_topology`] whatever
/// the outcome. An object that already existed is left out.
pub async fn apply_topology<C: ObjectClient>(
    client: &C,
    ctx: &RunContext,
    topology: &Topology,
    config: &LifecycleConfig,
) -> (RunContext, Result<()>) {
    let mut attempted = ctx.created().to_vec();
    for spec in topology.specs() {
        let object = spec.object_ref();
        if ctx.is_cancelled() {
            return (
                ctx.with_created(attempted),
                Err(Error::Cancelled {
                    phase: Phase::Setup.to_string(),
                }),
            );
        }
        let created = client.create(spec).await;
        // A conflicting object belongs to someone else and is never ours to delete.
        let owned = match &created {
            Ok(()) => true,
            Err(source) => !source.is_kind(ErrorKind::Conflict),
        };
        if owned && !attempted.contains(&object) {
            attempted.push(object.clone());
        }
        if let Err(source) = created {
            error!("unable to create {}: {}", object, source);
            return (
                ctx.with_created(attempted),
                Err(Error::Create { object, source }),
            );
        }
        info!("created {}", object);
    }

    let ctx = ctx.with_created(attempted);
    let waiter = Waiter::new(client, config.poll_interval, config.max_transport_failures);
    for spec in topology.specs() {
        if let Some(condition) = &spec.readiness {
            let object = spec.object_ref();
            let wait =
                WaitCondition::new(object.clone(), condition.clone(), config.readiness_timeout);
            if let Err(source) = waiter.wait_for(&ctx, &wait).await {
                error!("{} did not become ready: {}", object, source);
                return (ctx, Err(Error::Readiness { object, source }));
            }
            info!("{} is ready", object);
        }
    }
    (ctx, Ok(()))
}

/// Deletes every object recorded in `ctx` in the order given by `topology`. A failed deletion is
/// recorded and the remaining objects are still attempted.
pub async fn teardown_topology<C: ObjectClient>(
    client: &C,
    ctx: &RunContext,
    topology: &Topology,
    config: &LifecycleConfig,
) -> TeardownReport {
    let mut report = TeardownReport::default();
    for object in topology.deletion_order(ctx.created()) {
        match client.delete(&object).await {
            Ok(()) => {
                info!("deleted {}", object);
                report.deleted.push(object);
            }
            Err(source) => {
                warn!("unable to delete {}: {}", object, source);
                report.failures.push(TeardownError::Delete { object, source });
            }
        }
    }

    if config.await_deletion {
        let waiter = Waiter::new(client, config.poll_interval, config.max_transport_failures);
        for object in &report.deleted {
            let wait =
                WaitCondition::new(object.clone(), Condition::Absent, config.deletion_timeout);
            if let Err(source) = waiter.wait_for(ctx, &wait).await {
                warn!("{} was not removed: {}", object, source);
                report.failures.push(TeardownError::Settle {
                    object: object.clone(),
                    source,
                });
            }
        }
    }
    report
}

/// Runs Setup, the assessments, and Teardown for one topology.
pub struct Lifecycle<'a, C: ObjectClient> {
    client: &'a C,
    topology: Topology,
    assessments: Vec<Box<dyn Assessment<C> + 'a>>,
    config: LifecycleConfig,
}

impl<'a, C: ObjectClient> Lifecycle<'a, C> {
    pub fn new(client: &'a C, topology: Topology, config: LifecycleConfig) -> Self {
        Self {
            client,
            topology,
            assessments: Vec::new(),
            config,
        }
    }

    /// Appends an Assess step. Assessments run in the order they were added.
    pub fn assess<A>(mut self, assessment: A) -> Self
    where
        A: Assessment<C> + 'a,
    {
        self.assessments.push(Box::new(assessment));
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Runs every phase and reports what happened. This never returns early: Teardown runs even
    /// when Setup failed or `ctx` was cancelled.
    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        let run_id = ctx.params().run_id.clone();
        info!(
            "starting run '{}' with {} objects and {} assessments",
            run_id,
            self.topology.len(),
            self.assessments.len()
        );

        debug!("entering {}", Phase::Setup);
        let (ctx, setup) = apply_topology(self.client, ctx, &self.topology, &self.config).await;

        let assessments = match &setup {
            Ok(()) => self.run_assessments(&ctx).await,
            Err(e) => {
                warn!("setup failed, assessments will not run: {}", e);
                Vec::new()
            }
        };

        debug!("entering {}", Phase::Teardown);
        let teardown = teardown_topology(
            self.client,
            &ctx.detached(),
            &self.topology,
            &self.config,
        )
        .await;
        if !teardown.is_clean() {
            error!(
                "teardown left {} failure(s) behind",
                teardown.failures.len()
            );
        }

        let report = RunReport {
            run_id,
            setup_error: setup.err(),
            assessments,
            teardown,
        };
        info!("run '{}' {}", report.run_id, if report.passed() { "passed" } else { "failed" });
        report
    }

    async fn run_assessments(&self, ctx: &RunContext) -> Vec<AssessmentReport> {
        let mut reports: Vec<AssessmentReport> = Vec::with_capacity(self.assessments.len());
        for (index, assessment) in self.assessments.iter().enumerate() {
            let phase = Phase::Assess(index);
            let name = assessment.name().to_string();
            let verdict = if ctx.is_cancelled() {
                Verdict::skipped("the run was cancelled")
            } else if self.config.fail_fast && reports.iter().any(|r| r.verdict.is_failure()) {
                Verdict::skipped("an earlier assessment failed")
            } else {
                debug!("entering {} '{}'", phase, name);
                match assessment.assess(self.client, ctx, &self.config).await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        error!("'{}' could not complete [{}]: {}", name, e.kind(), e);
                        Verdict::errored(&e)
                    }
                }
            };
            info!("'{}': {}", name, verdict);
            reports.push(AssessmentReport { name, verdict });
        }
        reports
    }
}
