use super::error::Result;
use crate::resource::{ObjectRef, ResourceKind, ResourceSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// A live workload instance (a pod) as seen by the control plane.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Instance {
    pub name: String,
    /// The pod phase, e.g. `Running` or `Pending`.
    pub phase: String,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

/// What a command executed inside a workload wrote.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// The `ObjectClient` is the harness' only door to the remote declarative-object store. It holds
/// no state between calls; every call is a remote read or mutation. The trait exists so that a
/// mock can be injected to exercise the engine without a cluster. In practice you will use
/// [`KubeObjectClient`](crate::clients::KubeObjectClient).
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Create the object described by `spec`. Fails with a `Conflict` error if an object with the
    /// same identity exists, and a `Validation` error if the payload is structurally invalid.
    async fn create(&self, spec: &ResourceSpec) -> Result<()>;

    /// Delete an object. Deleting an absent object succeeds.
    async fn delete(&self, object: &ObjectRef) -> Result<()>;

    /// Get the current state of an object, or `None` if it does not exist.
    async fn get(&self, object: &ObjectRef) -> Result<Option<Value>>;

    /// List every object of `kind` in `namespace`.
    async fn list(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<Value>>;

    /// List the workload instances in `namespace` whose labels match `selector`, in the order the
    /// control plane returns them.
    async fn list_instances(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Instance>>;

    /// Run `command` in `container` of `pod`. Fails with `NotRunning` if the pod does not exist
    /// and `Exec` if the command exits non-zero or the stream breaks; the `Exec` error keeps the
    /// partial output.
    async fn exec_in(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput>;
}

/// Renders a label map the way the API expects it in a `labelSelector` query.
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[test]
fn selector_is_comma_separated() {
    let selector = maplit::btreemap! {
        "app".to_string() => "client".to_string(),
        "tier".to_string() => "web".to_string(),
    };
    assert_eq!(selector_string(&selector), "app=client,tier=web");
    assert_eq!(selector_string(&BTreeMap::new()), "");
}
