use crate::error::{Classify, ErrorKind};
use crate::resource::{self, ObjectRef, ResourceKind};
use http::StatusCode;
use snafu::Snafu;

/// The `Result` type returned by `clients`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by an [`ObjectClient`](crate::clients::ObjectClient).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Error initializing the Kubernetes client: {}", source))]
    Initialization { source: kube::Error },

    #[snafu(display("Unable to read kubeconfig: {}", source))]
    ConfigRead {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("{} already exists", object))]
    Conflict { object: ObjectRef },

    #[snafu(display("{} was rejected as invalid: {}", object, reason))]
    Validation { object: ObjectRef, reason: String },

    #[snafu(display("{}", source))]
    InvalidSpec { source: resource::Error },

    #[snafu(display("No schema registered for kind {}", kind))]
    UnregisteredKind { kind: ResourceKind },

    #[snafu(display("{} not found", object))]
    NotFound { object: ObjectRef },

    #[snafu(display("Unable to {} {}: {}", operation, what, source))]
    Unavailable {
        operation: String,
        what: String,
        source: kube::Error,
    },

    #[snafu(display("Error converting {}: {}", what, source))]
    Serde {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Pod '{}/{}' is not running", namespace, pod))]
    NotRunning { namespace: String, pod: String },

    #[snafu(display("Command '{}' failed in pod '{}': {}", command, pod, reason))]
    Exec {
        pod: String,
        command: String,
        reason: String,
        /// Whatever the command wrote before failing.
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

impl Error {
    /// Converts a kube-rs failure into the client taxonomy based on the API status code.
    pub(crate) fn from_kube(source: kube::Error, operation: &str, object: &ObjectRef) -> Self {
        match api_status(&source) {
            Some(StatusCode::CONFLICT) => Error::Conflict {
                object: object.clone(),
            },
            Some(StatusCode::NOT_FOUND) => Error::NotFound {
                object: object.clone(),
            },
            Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNPROCESSABLE_ENTITY) => {
                let reason = match &source {
                    kube::Error::Api(response) => response.message.clone(),
                    other => other.to_string(),
                };
                Error::Validation {
                    object: object.clone(),
                    reason,
                }
            }
            _ => Error::Unavailable {
                operation: operation.to_string(),
                what: object.to_string(),
                source,
            },
        }
    }
}

/// The HTTP status carried by an API error. Transport failures have none.
fn api_status(error: &kube::Error) -> Option<StatusCode> {
    match error {
        kube::Error::Api(response) => StatusCode::from_u16(response.code).ok(),
        _ => None,
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Validation { .. }
            | Error::InvalidSpec { .. }
            | Error::UnregisteredKind { .. }
            | Error::Serde { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Initialization { .. } | Error::ConfigRead { .. } | Error::Unavailable { .. } => {
                ErrorKind::Unavailable
            }
            Error::NotRunning { .. } => ErrorKind::NoInstance,
            Error::Exec { .. } => ErrorKind::Exec,
        }
    }
}

/// Turns a `NotFound` error into `Ok(None)`, so that absent objects can be handled as a normal
/// outcome.
pub trait AllowNotFound<T> {
    fn allow_not_found(self) -> Result<Option<T>>;
}

impl<T> AllowNotFound<T> for Result<T> {
    fn allow_not_found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_kind(ErrorKind::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn kube_errors_are_classified_by_status() {
        let object = ObjectRef::namespace("client-ns");
        let cases = [
            (409, ErrorKind::Conflict),
            (404, ErrorKind::NotFound),
            (422, ErrorKind::Validation),
            (400, ErrorKind::Validation),
            (503, ErrorKind::Unavailable),
            (500, ErrorKind::Unavailable),
            (1000, ErrorKind::Unavailable),
        ];
        for (code, kind) in cases {
            assert_eq!(Error::from_kube(api_error(code), "create", &object).kind(), kind);
        }
    }

    #[test]
    fn only_api_errors_carry_a_status() {
        assert_eq!(api_status(&api_error(409)), Some(StatusCode::CONFLICT));
        assert_eq!(api_status(&api_error(1000)), None);
    }

    #[test]
    fn not_found_is_allowed() {
        let object = ObjectRef::namespace("client-ns");
        let missing: Result<()> = Err(Error::NotFound {
            object: object.clone(),
        });
        assert!(missing.allow_not_found().unwrap().is_none());
        let conflict: Result<()> = Err(Error::Conflict { object });
        assert!(conflict.allow_not_found().is_err());
    }
}
