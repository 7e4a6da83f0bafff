/*!

An in-memory [`ObjectClient`] that stands in for the control plane so that the waiter, the probe
and the lifecycle controller can be tested without a cluster. Failures are injected per object.

!*/

#![allow(dead_code)]

use async_trait::async_trait;
use kube::error::ErrorResponse;
use model::clients::{Error, ExecOutput, Instance, ObjectClient, Result};
use model::{ObjectRef, ResourceKind, ResourceSpec};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectRef, Value>,
    fail_create: HashSet<ObjectRef>,
    fail_delete: HashSet<ObjectRef>,
    /// Number of observations before an object reports `Available=True`. `None` means never.
    polls_until_ready: HashMap<ObjectRef, Option<u32>>,
    transport_failures: u32,
    instances: HashMap<String, Vec<Instance>>,
    exec_output: ExecOutput,
    exec_delay: Option<Duration>,
    get_calls: u32,
    created: Vec<ObjectRef>,
    deleted: Vec<ObjectRef>,
    exec_pods: Vec<String>,
}

/// Holds objects in memory. Deleting a namespace deletes everything in it.
#[derive(Default)]
pub struct MockObjectClient {
    state: Mutex<State>,
}

pub fn unavailable(operation: &str, what: &str) -> Error {
    Error::Unavailable {
        operation: operation.to_string(),
        what: what.to_string(),
        source: kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "injected failure".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        }),
    }
}

pub fn instance(name: &str, phase: &str) -> Instance {
    Instance {
        name: name.to_string(),
        phase: phase.to_string(),
    }
}

impl MockObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, object: ObjectRef) {
        self.state.lock().unwrap().fail_create.insert(object);
    }

    pub fn fail_delete(&self, object: ObjectRef) {
        self.state.lock().unwrap().fail_delete.insert(object);
    }

    pub fn never_ready(&self, object: ObjectRef) {
        self.state
            .lock()
            .unwrap()
            .polls_until_ready
            .insert(object, None);
    }

    pub fn ready_after(&self, object: ObjectRef, polls: u32) {
        self.state
            .lock()
            .unwrap()
            .polls_until_ready
            .insert(object, Some(polls));
    }

    /// The next `count` observations fail as if the control plane was unreachable.
    pub fn transport_failures(&self, count: u32) {
        self.state.lock().unwrap().transport_failures = count;
    }

    pub fn set_instances(&self, namespace: &str, instances: Vec<Instance>) {
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(namespace.to_string(), instances);
    }

    pub fn set_exec_output(&self, stdout: &[u8]) {
        self.state.lock().unwrap().exec_output = ExecOutput {
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
        };
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        self.state.lock().unwrap().exec_delay = Some(delay);
    }

    pub fn insert(&self, spec: &ResourceSpec) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(spec.object_ref(), spec.to_manifest());
    }

    pub fn objects(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn created(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn get_calls(&self) -> u32 {
        self.state.lock().unwrap().get_calls
    }

    pub fn exec_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().exec_pods.clone()
    }
}

fn labels_match(labels: Option<&Value>, selector: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
            == Some(value.as_str())
    })
}

#[async_trait]
impl ObjectClient for MockObjectClient {
    async fn create(&self, spec: &ResourceSpec) -> Result<()> {
        let object = spec.object_ref();
        let mut state = self.state.lock().unwrap();
        state.created.push(object.clone());
        if state.fail_create.contains(&object) {
            return Err(Error::Validation {
                object,
                reason: "injected failure".to_string(),
            });
        }
        if state.objects.contains_key(&object) {
            return Err(Error::Conflict { object });
        }
        state.objects.insert(object, spec.to_manifest());
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(object.clone());
        if state.fail_delete.contains(object) {
            return Err(unavailable("delete", &object.to_string()));
        }
        state.objects.remove(object);
        if object.kind == ResourceKind::Namespace {
            state
                .objects
                .retain(|other, _| other.namespace.as_deref() != Some(object.name.as_str()));
        }
        Ok(())
    }

    async fn get(&self, object: &ObjectRef) -> Result<Option<Value>> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        if state.transport_failures > 0 {
            state.transport_failures -= 1;
            return Err(unavailable("get", &object.to_string()));
        }
        let mut found = match state.objects.get(object) {
            Some(found) => found.clone(),
            None => return Ok(None),
        };
        let ready = match state.polls_until_ready.get_mut(object) {
            None => true,
            Some(None) => false,
            Some(Some(0)) => true,
            Some(Some(remaining)) => {
                *remaining -= 1;
                false
            }
        };
        found["status"] = json!({
            "conditions": [
                { "type": "Available", "status": if ready { "True" } else { "False" } }
            ]
        });
        Ok(Some(found))
    }

    async fn list(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<Value>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|(object, _)| {
                object.kind == kind
                    && (!kind.is_namespaced() || object.namespace.as_deref() == Some(namespace))
            })
            .map(|(_, value)| value.clone())
            .collect())
    }

    /// Returns the instances set for `namespace`, or one running pod per matching deployment.
    async fn list_instances(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Instance>> {
        let state = self.state.lock().unwrap();
        if let Some(instances) = state.instances.get(namespace) {
            return Ok(instances.clone());
        }
        Ok(state
            .objects
            .iter()
            .filter(|(object, manifest)| {
                object.kind == ResourceKind::Deployment
                    && object.namespace.as_deref() == Some(namespace)
                    && labels_match(manifest.pointer("/spec/template/metadata/labels"), selector)
            })
            .map(|(object, _)| instance(&format!("{}-0", object.name), "Running"))
            .collect())
    }

    async fn exec_in(
        &self,
        namespace: &str,
        pod: &str,
        _container: &str,
        _command: &[String],
    ) -> Result<ExecOutput> {
        let (delay, output) = {
            let mut state = self.state.lock().unwrap();
            state.exec_pods.push(pod.to_string());
            let known = state
                .instances
                .get(namespace)
                .map(|instances| instances.iter().any(|i| i.name == pod))
                .unwrap_or(true);
            if !known {
                return Err(Error::NotRunning {
                    namespace: namespace.to_string(),
                    pod: pod.to_string(),
                });
            }
            (state.exec_delay, state.exec_output.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(output)
    }
}
