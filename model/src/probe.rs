use crate::clients::{self, selector_string, ObjectClient};
use crate::context::RunContext;
use crate::error::{Classify, ErrorKind};
use log::{debug, info, trace};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("No running instance matches '{}' in '{}'", selector, namespace))]
    NoInstance { namespace: String, selector: String },

    #[snafu(display("Unable to list instances in '{}': {}", namespace, source))]
    List {
        namespace: String,
        source: clients::Error,
    },

    #[snafu(display("Probe in pod '{}' failed: {}", pod, source))]
    Exec { pod: String, source: clients::Error },

    #[snafu(display("Probe in pod '{}' did not finish within {:?}", pod, timeout))]
    Timeout { pod: String, timeout: Duration },

    #[snafu(display("Probe cancelled"))]
    Cancelled,
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::NoInstance { .. } => ErrorKind::NoInstance,
            Error::List { source, .. } | Error::Exec { source, .. } => source.kind(),
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The first line of an HTTP response, e.g. `HTTP/1.1 200 OK`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatusLine {
    pub raw: String,
    pub version: Option<String>,
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl StatusLine {
    pub fn parse(line: &str) -> Self {
        let raw = line.trim().to_string();
        let mut parts = raw.splitn(3, ' ');
        let first = parts.next().filter(|part| part.starts_with("HTTP/"));
        let (version, code, reason) = match first {
            Some(version) => (
                Some(version.to_string()),
                parts.next().and_then(|code| code.parse::<u16>().ok()),
                parts
                    .next()
                    .map(str::to_string)
                    .filter(|reason| !reason.is_empty()),
            ),
            None => (None, None, None),
        };
        Self {
            raw,
            version,
            code,
            reason,
        }
    }

    /// True if the line reports `code`. Lines that cannot be parsed are searched for the code
    /// as a substring.
    pub fn has_code(&self, code: u16) -> bool {
        match self.code {
            Some(parsed) => parsed == code,
            None => self.raw.contains(&code.to_string()),
        }
    }
}

/// The value the filter stamps: `<caller identity> -> <routing decision>`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DependencyMarker {
    pub caller: String,
    pub destination: String,
}

impl DependencyMarker {
    pub const SEPARATOR: &'static str = " -> ";

    pub fn new<S1, S2>(caller: S1, destination: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            caller: caller.into(),
            destination: destination.into(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (caller, destination) = value.trim().split_once(Self::SEPARATOR)?;
        Some(Self::new(caller.trim(), destination.trim()))
    }
}

impl Display for DependencyMarker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.caller, Self::SEPARATOR, self.destination)
    }
}

/// Structured form of a probe's stdout: a status line followed by header lines.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ProbeOutput {
    pub status_line: Option<StatusLine>,
    /// Header names and values in the order they appeared.
    pub headers: Vec<(String, String)>,
}

impl ProbeOutput {
    pub fn parse(stdout: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stdout);
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));
        let status_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .map(StatusLine::parse);
        let headers = lines
            .take_while(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        Self {
            status_line,
            headers,
        }
    }

    /// Every value of the header `name`, compared case-insensitively.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_line.as_ref().and_then(|line| line.code)
    }

    /// Dependency markers found in the header `name`.
    pub fn markers(&self, name: &str) -> Vec<DependencyMarker> {
        self.header_values(name)
            .into_iter()
            .filter_map(DependencyMarker::parse)
            .collect()
    }
}

/// A property the probe output must have.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Expectation {
    /// The status line reports this code.
    Status(u16),
    /// The response carries header `name` with exactly `value`.
    Header { name: String, value: String },
    /// The raw stdout contains this text.
    Contains(String),
}

impl Expectation {
    pub fn marker(header: &str, marker: &DependencyMarker) -> Self {
        Expectation::Header {
            name: header.to_string(),
            value: marker.to_string(),
        }
    }
}

impl Display for Expectation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expectation::Status(code) => write!(f, "status {}", code),
            Expectation::Header { name, value } => write!(f, "header '{}: {}'", name, value),
            Expectation::Contains(text) => write!(f, "output containing '{}'", text),
        }
    }
}

/// How one expectation fared against the observed output.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AssertionOutcome {
    pub expectation: Expectation,
    pub passed: bool,
    pub observed: String,
}

impl Display for AssertionOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let verdict = if self.passed { "ok" } else { "FAILED" };
        write!(
            f,
            "{}: expected {}, observed {}",
            verdict, self.expectation, self.observed
        )
    }
}

/// Checks every expectation independently; a failed one does not stop the others.
pub fn check(
    output: &ProbeOutput,
    stdout: &[u8],
    expectations: &[Expectation],
) -> Vec<AssertionOutcome> {
    expectations
        .iter()
        .map(|expectation| {
            let (passed, observed) = match expectation {
                Expectation::Status(code) => match &output.status_line {
                    Some(line) => (line.has_code(*code), format!("'{}'", line.raw)),
                    None => (false, "no status line".to_string()),
                },
                Expectation::Header { name, value } => {
                    let values = output.header_values(name);
                    let passed = values.iter().any(|observed| observed == value);
                    let observed = if values.is_empty() {
                        format!("no '{}' header", name)
                    } else {
                        format!("'{}: {}'", name, values.join(", "))
                    };
                    (passed, observed)
                }
                Expectation::Contains(text) => {
                    let passed = String::from_utf8_lossy(stdout).contains(text.as_str());
                    let observed = if passed { "present" } else { "absent" };
                    (passed, observed.to_string())
                }
            };
            AssertionOutcome {
                expectation: expectation.clone(),
                passed,
                observed,
            }
        })
        .collect()
}

/// Everything one probe captured and concluded. Scoped to the assessment that ran it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProbeResult {
    pub pod: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub output: ProbeOutput,
    pub assertions: Vec<AssertionOutcome>,
}

impl ProbeResult {
    pub fn from_output<S>(
        pod: S,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        expectations: &[Expectation],
    ) -> Self
    where
        S: Into<String>,
    {
        let output = ProbeOutput::parse(&stdout);
        let assertions = check(&output, &stdout, expectations);
        Self {
            pod: pod.into(),
            stdout,
            stderr,
            output,
            assertions,
        }
    }

    pub fn passed(&self) -> bool {
        self.assertions.iter().all(|assertion| assertion.passed)
    }

    pub fn failures(&self) -> Vec<&AssertionOutcome> {
        self.assertions
            .iter()
            .filter(|assertion| !assertion.passed)
            .collect()
    }
}

/// Where to probe from, what to run, and what to expect.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProbeRequest {
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub container: String,
    pub command: Vec<String>,
    pub expectations: Vec<Expectation>,
    pub timeout: Duration,
}

/// Runs a command inside a live workload and checks its output.
pub struct Probe<'a, C: ObjectClient> {
    client: &'a C,
}

impl<'a, C: ObjectClient> Probe<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Picks an instance, runs the request's command in it and checks the output.
    ///
    /// Instances are filtered to those in the `Running` phase and sorted by name; the first one
    /// is used, so repeated probes against the same workload hit the same pod. Assertion failures
    /// are reported in the returned [`ProbeResult`], not as an error.
    pub async fn run(&self, ctx: &RunContext, request: &ProbeRequest) -> Result<ProbeResult> {
        if ctx.is_cancelled() {
            return CancelledSnafu.fail();
        }
        let selector = selector_string(&request.selector);
        let instances = self
            .client
            .list_instances(&request.namespace, &request.selector)
            .await
            .map_err(|source| Error::List {
                namespace: request.namespace.clone(),
                source,
            })?;
        trace!(
            "found {} instance(s) for '{}' in '{}'",
            instances.len(),
            selector,
            request.namespace
        );
        let mut running: Vec<_> = instances
            .into_iter()
            .filter(|instance| instance.is_running())
            .collect();
        running.sort_by(|a, b| a.name.cmp(&b.name));
        let pod = match running.into_iter().next() {
            Some(instance) => instance.name,
            None => {
                return NoInstanceSnafu {
                    namespace: &request.namespace,
                    selector,
                }
                .fail()
            }
        };

        info!(
            "probing from '{}/{}': {}",
            request.namespace,
            pod,
            request.command.join(" ")
        );
        let exec = self.client.exec_in(
            &request.namespace,
            &pod,
            &request.container,
            &request.command,
        );
        let executed = tokio::select! {
            biased;
            _ = ctx.cancelled() => return CancelledSnafu.fail(),
            executed = tokio::time::timeout(request.timeout, exec) => executed,
        };
        let output = match executed {
            Err(_elapsed) => {
                return TimeoutSnafu {
                    pod,
                    timeout: request.timeout,
                }
                .fail()
            }
            Ok(Err(source)) => {
                if let clients::Error::Exec { stdout, stderr, .. } = &source {
                    debug!(
                        "partial output of failed probe:\n{}\n{}",
                        String::from_utf8_lossy(stdout),
                        String::from_utf8_lossy(stderr)
                    );
                }
                return Err(Error::Exec { pod, source });
            }
            Ok(Ok(output)) => output,
        };

        let result =
            ProbeResult::from_output(pod, output.stdout, output.stderr, &request.expectations);
        info!("got response:\n{}", String::from_utf8_lossy(&result.stdout));
        for assertion in &result.assertions {
            debug!("{}", assertion);
        }
        Ok(result)
    }
}
