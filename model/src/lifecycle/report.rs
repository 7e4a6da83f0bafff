use super::error::{Error, TeardownError};
use crate::error::{Classify, ErrorKind};
use crate::resource::ObjectRef;
use std::fmt::{Display, Formatter};

/// The outcome of one assessment.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Verdict {
    Passed,
    /// The observed behavior did not match. Holds every failed assertion.
    Failed { failures: Vec<String> },
    /// The assessment could not observe anything, e.g. the probe found no instance.
    Errored { kind: ErrorKind, message: String },
    Skipped { reason: String },
}

impl Verdict {
    pub fn failed<I, S>(failures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Verdict::Failed {
            failures: failures.into_iter().map(Into::into).collect(),
        }
    }

    pub fn skipped<S>(reason: S) -> Self
    where
        S: Into<String>,
    {
        Verdict::Skipped {
            reason: reason.into(),
        }
    }

    pub fn errored<E>(error: &E) -> Self
    where
        E: Classify + Display,
    {
        Verdict::Errored {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// The kind of failure, if any. A `Failed` verdict is an assertion failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Verdict::Failed { .. } => Some(ErrorKind::Assertion),
            Verdict::Errored { kind, .. } => Some(*kind),
            Verdict::Passed | Verdict::Skipped { .. } => None,
        }
    }

    /// True for `Failed` and `Errored`.
    pub fn is_failure(&self) -> bool {
        self.kind().is_some()
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed => f.write_str("passed"),
            Verdict::Failed { failures } => write!(
                f,
                "failed [{}]: {} expectation(s) not met",
                ErrorKind::Assertion,
                failures.len()
            ),
            Verdict::Errored { kind, message } => write!(f, "error [{}]: {}", kind, message),
            Verdict::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AssessmentReport {
    pub name: String,
    pub verdict: Verdict,
}

/// What Teardown did.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Objects whose deletion was accepted, in deletion order.
    pub deleted: Vec<ObjectRef>,
    pub failures: Vec<TeardownError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Every object deletion was attempted for.
    pub fn attempted(&self) -> Vec<&ObjectRef> {
        let mut attempted: Vec<&ObjectRef> = self.deleted.iter().collect();
        for failure in &self.failures {
            if !attempted.contains(&failure.object()) {
                attempted.push(failure.object());
            }
        }
        attempted
    }
}

/// Everything a run did, phase by phase.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    /// `None` if Setup succeeded.
    pub setup_error: Option<Error>,
    /// One entry per assessment. Empty when Setup failed.
    pub assessments: Vec<AssessmentReport>,
    pub teardown: TeardownReport,
}

impl RunReport {
    /// True only if Setup succeeded, no assessment failed and Teardown was clean.
    pub fn passed(&self) -> bool {
        self.setup_error.is_none()
            && !self.assessments.iter().any(|a| a.verdict.is_failure())
            && self.teardown.is_clean()
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "run {}", self.run_id)?;
        match &self.setup_error {
            None => writeln!(f, "  setup: ok")?,
            Some(e) => writeln!(f, "  setup: FAILED [{}]: {}", e.kind(), e)?,
        }
        for assessment in &self.assessments {
            writeln!(f, "  assess '{}': {}", assessment.name, assessment.verdict)?;
            if let Verdict::Failed { failures } = &assessment.verdict {
                for failure in failures {
                    writeln!(f, "    - {}", failure)?;
                }
            }
        }
        writeln!(
            f,
            "  teardown: {} deleted, {} failed",
            self.teardown.deleted.len(),
            self.teardown.failures.len()
        )?;
        for failure in &self.teardown.failures {
            writeln!(f, "    - [{}] {}", failure.kind(), failure)?;
        }
        write!(f, "  result: {}", if self.passed() { "PASS" } else { "FAIL" })
    }
}
