/*!

The readiness waiter polls an object through an [`ObjectClient`] until a [`Condition`] holds, the
timeout elapses, or the run is cancelled.

```text
            ┌──────────── satisfied
            │
 polling ───┼──────────── timed-out        (TimeoutError, carries the last observed state)
   ▲  │     │
   └──┘     ├──────────── cancelled        (CancelledError, never reported as a timeout)
  retry     │
            └──────────── transport-failed (UnavailableError after too many consecutive failures)
```

!*/

use crate::clients::{self, ObjectClient};
use crate::context::RunContext;
use crate::error::{Classify, ErrorKind};
use crate::resource::ObjectRef;
use log::{debug, trace, warn};
use serde_json::Value;
use snafu::Snafu;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "Timeout waiting more than {:?} for {} to be {}, last observed: {}",
        timeout,
        object,
        condition,
        last_state
    ))]
    Timeout {
        object: ObjectRef,
        condition: String,
        timeout: Duration,
        last_state: String,
    },

    #[snafu(display("Cancelled while waiting for {}", object))]
    Cancelled { object: ObjectRef },

    #[snafu(display(
        "Unable to observe {} after {} consecutive attempts: {}",
        object,
        attempts,
        source
    ))]
    Unavailable {
        object: ObjectRef,
        attempts: u32,
        source: clients::Error,
    },

    #[snafu(display("Unable to observe {}: {}", object, source))]
    Client {
        object: ObjectRef,
        source: clients::Error,
    },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Unavailable { .. } => ErrorKind::Unavailable,
            Error::Client { source, .. } => source.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A predicate over the state the control plane reports for an object.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Condition {
    /// The object exists.
    Exists,
    /// The object does not exist (e.g. its deletion has completed).
    Absent,
    /// `status.conditions` holds an entry of `condition_type` with the given `status`.
    StatusCondition {
        condition_type: String,
        status: String,
    },
}

/// The result of evaluating a [`Condition`] once.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Observation {
    pub satisfied: bool,
    /// A short human readable description of what was observed.
    pub state: String,
}

impl Condition {
    /// The deployment condition `Available=True`.
    pub fn available() -> Self {
        Condition::StatusCondition {
            condition_type: "Available".to_string(),
            status: "True".to_string(),
        }
    }

    pub fn evaluate(&self, object: Option<&Value>) -> Observation {
        match (self, object) {
            (Condition::Exists, found) | (Condition::Absent, found) => {
                let exists = found.is_some();
                Observation {
                    satisfied: exists == matches!(self, Condition::Exists),
                    state: if exists { "present" } else { "absent" }.to_string(),
                }
            }
            (Condition::StatusCondition { .. }, None) => Observation {
                satisfied: false,
                state: "absent".to_string(),
            },
            (
                Condition::StatusCondition {
                    condition_type,
                    status,
                },
                Some(object),
            ) => {
                let reported = object
                    .pointer("/status/conditions")
                    .and_then(Value::as_array)
                    .and_then(|conditions| {
                        conditions.iter().find(|condition| {
                            condition.get("type").and_then(Value::as_str)
                                == Some(condition_type.as_str())
                        })
                    })
                    .and_then(|condition| condition.get("status").and_then(Value::as_str));
                match reported {
                    Some(reported) => Observation {
                        satisfied: reported == status,
                        state: format!("{}={}", condition_type, reported),
                    },
                    None => Observation {
                        satisfied: false,
                        state: format!("condition '{}' not reported", condition_type),
                    },
                }
            }
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Exists => f.write_str("present"),
            Condition::Absent => f.write_str("absent"),
            Condition::StatusCondition {
                condition_type,
                status,
            } => write!(f, "{}={}", condition_type, status),
        }
    }
}

/// What to wait for, on which object, and for how long.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WaitCondition {
    pub object: ObjectRef,
    pub condition: Condition,
    pub timeout: Duration,
}

impl WaitCondition {
    pub fn new(object: ObjectRef, condition: Condition, timeout: Duration) -> Self {
        Self {
            object,
            condition,
            timeout,
        }
    }
}

/// Polls an [`ObjectClient`] at a fixed interval.
pub struct Waiter<'a, C: ObjectClient> {
    client: &'a C,
    interval: Duration,
    max_transport_failures: u32,
}

impl<'a, C: ObjectClient> Waiter<'a, C> {
    pub fn new(client: &'a C, interval: Duration, max_transport_failures: u32) -> Self {
        Self {
            client,
            interval,
            max_transport_failures,
        }
    }

    /// Returns once `wait.condition` holds for `wait.object`. Never returns later than
    /// `wait.timeout` plus one poll interval after being called, and returns `Cancelled` as soon
    /// as `ctx` is cancelled.
    pub async fn wait_for(&self, ctx: &RunContext, wait: &WaitCondition) -> Result<()> {
        let object = &wait.object;
        let deadline = Instant::now() + wait.timeout;
        let mut last_state = "not yet observed".to_string();
        let mut failures = 0u32;
        debug!("waiting up to {:?} for {} to be {}", wait.timeout, object, wait.condition);

        loop {
            if ctx.is_cancelled() {
                return CancelledSnafu { object: object.clone() }.fail();
            }
            if Instant::now() >= deadline {
                return self.timed_out(wait, last_state);
            }

            let polled = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return CancelledSnafu { object: object.clone() }.fail();
                }
                polled = tokio::time::timeout_at(deadline, self.client.get(object)) => polled,
            };

            match polled {
                Err(_elapsed) => return self.timed_out(wait, last_state),
                Ok(Ok(found)) => {
                    failures = 0;
                    let observation = wait.condition.evaluate(found.as_ref());
                    trace!("{} observed as {}", object, observation.state);
                    last_state = observation.state;
                    if observation.satisfied {
                        debug!("{} is {}", object, wait.condition);
                        return Ok(());
                    }
                }
                Ok(Err(e)) if e.is_kind(ErrorKind::Unavailable) => {
                    failures += 1;
                    warn!(
                        "unable to observe {} ({} of {} tolerated failures): {}",
                        object, failures, self.max_transport_failures, e
                    );
                    if failures > self.max_transport_failures {
                        return Err(Error::Unavailable {
                            object: object.clone(),
                            attempts: failures,
                            source: e,
                        });
                    }
                    last_state = format!("unobservable: {}", e);
                }
                Ok(Err(e)) => {
                    return Err(Error::Client {
                        object: object.clone(),
                        source: e,
                    })
                }
            }

            let wake = std::cmp::min(Instant::now() + self.interval, deadline);
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return CancelledSnafu { object: object.clone() }.fail();
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn timed_out(&self, wait: &WaitCondition, last_state: String) -> Result<()> {
        Err(Error::Timeout {
            object: wait.object.clone(),
            condition: wait.condition.to_string(),
            timeout: wait.timeout,
            last_state,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_condition_matches() {
        let deployment = json!({
            "status": {
                "conditions": [
                    { "type": "Progressing", "status": "True" },
                    { "type": "Available", "status": "False" },
                ]
            }
        });
        let observation = Condition::available().evaluate(Some(&deployment));
        assert!(!observation.satisfied);
        assert_eq!(observation.state, "Available=False");

        let deployment = json!({
            "status": { "conditions": [ { "type": "Available", "status": "True" } ] }
        });
        assert!(Condition::available().evaluate(Some(&deployment)).satisfied);
    }

    #[test]
    fn missing_conditions_are_not_satisfied() {
        let observation = Condition::available().evaluate(Some(&json!({ "status": {} })));
        assert!(!observation.satisfied);
        assert_eq!(observation.state, "condition 'Available' not reported");
        assert!(!Condition::available().evaluate(None).satisfied);
    }

    #[test]
    fn existence_conditions() {
        let object = json!({});
        assert!(Condition::Exists.evaluate(Some(&object)).satisfied);
        assert!(!Condition::Exists.evaluate(None).satisfied);
        assert!(Condition::Absent.evaluate(None).satisfied);
        assert!(!Condition::Absent.evaluate(Some(&object)).satisfied);
    }
}
