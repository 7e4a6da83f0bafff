use super::error::{self, AllowNotFound, Error, Result};
use super::object_client::{selector_string, ExecOutput, Instance, ObjectClient};
use crate::resource::{ObjectRef, ResourceKind, ResourceSpec};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Api, Client, Config, ResourceExt};
use log::{debug, trace};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// An [`ObjectClient`] backed by the Kubernetes API. Objects are handled as `DynamicObject`s
/// using the schemas registered with the client, so mesh custom resources need no generated
/// types.
///
/// # Example
///
/// ```
///# use model::clients::{KubeObjectClient, ObjectClient};
///# use model::resource::ObjectRef;
///# async fn no_run() {
/// let client = KubeObjectClient::new().await.unwrap();
/// let namespace = client.get(&ObjectRef::namespace("istio-system")).await.unwrap();
///# }
/// ```
#[derive(Clone)]
pub struct KubeObjectClient {
    client: Client,
    schemas: HashMap<ResourceKind, ApiResource>,
}

impl KubeObjectClient {
    /// Create a client using the default kube config and register every known kind.
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context(error::InitializationSnafu)?;
        Ok(Self::new_from_k8s_client(client))
    }

    /// Create a client from the path to a kubeconfig file.
    pub async fn new_from_kubeconfig_path(kubeconfig_path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path).context(error::ConfigReadSnafu)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(error::ConfigReadSnafu)?;
        let client = Client::try_from(config).context(error::InitializationSnafu)?;
        Ok(Self::new_from_k8s_client(client))
    }

    pub fn new_from_k8s_client(client: Client) -> Self {
        let mut object_client = Self {
            client,
            schemas: HashMap::new(),
        };
        for kind in ResourceKind::ALL {
            object_client.register(kind);
        }
        object_client
    }

    /// Make `kind` known to the client.
    pub fn register(&mut self, kind: ResourceKind) {
        self.schemas.insert(kind, kind.schema().api_resource());
    }

    pub fn k8s_client(&self) -> &Client {
        &self.client
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let resource = self
            .schemas
            .get(&kind)
            .context(error::UnregisteredKindSnafu { kind })?;
        Ok(match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        })
    }

    fn object_api(&self, object: &ObjectRef) -> Result<Api<DynamicObject>> {
        self.api(object.kind, object.namespace.as_deref())
    }
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn create(&self, spec: &ResourceSpec) -> Result<()> {
        spec.validate().context(error::InvalidSpecSnafu)?;
        let object = spec.object_ref();
        let dynamic: DynamicObject =
            serde_json::from_value(spec.to_manifest()).context(error::SerdeSnafu {
                what: object.to_string(),
            })?;
        trace!("creating {}", object);
        self.object_api(&object)?
            .create(&PostParams::default(), &dynamic)
            .await
            .map_err(|e| Error::from_kube(e, "create", &object))?;
        debug!("created {}", object);
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        trace!("deleting {}", object);
        let deleted = self
            .object_api(object)?
            .delete(&object.name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube(e, "delete", object))
            .allow_not_found()?;
        match deleted {
            Some(_) => debug!("deleted {}", object),
            None => debug!("{} was already absent", object),
        }
        Ok(())
    }

    async fn get(&self, object: &ObjectRef) -> Result<Option<Value>> {
        let found = self
            .object_api(object)?
            .get_opt(&object.name)
            .await
            .map_err(|e| Error::from_kube(e, "get", object))?;
        found
            .map(|dynamic| {
                serde_json::to_value(dynamic).context(error::SerdeSnafu {
                    what: object.to_string(),
                })
            })
            .transpose()
    }

    async fn list(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<Value>> {
        let namespace = kind.is_namespaced().then_some(namespace);
        let api = self.api(kind, namespace)?;
        let what = format!("{}s", kind);
        api.list(&ListParams::default())
            .await
            .context(error::UnavailableSnafu {
                operation: "list",
                what: what.as_str(),
            })?
            .items
            .into_iter()
            .map(|item| {
                serde_json::to_value(item).context(error::SerdeSnafu {
                    what: what.as_str(),
                })
            })
            .collect()
    }

    async fn list_instances(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Instance>> {
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let label_selector = selector_string(selector);
        let pods = pod_api
            .list(&ListParams {
                label_selector: (!label_selector.is_empty()).then_some(label_selector),
                ..Default::default()
            })
            .await
            .context(error::UnavailableSnafu {
                operation: "list",
                what: format!("pods in '{}'", namespace),
            })?;
        Ok(pods
            .items
            .into_iter()
            .map(|pod| Instance {
                name: pod.name_any(),
                phase: pod.status.and_then(|status| status.phase).unwrap_or_default(),
            })
            .collect())
    }

    async fn exec_in(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let object = pod_api
            .get_opt(pod)
            .await
            .context(error::UnavailableSnafu {
                operation: "get",
                what: format!("pod '{}/{}'", namespace, pod),
            })?
            .context(error::NotRunningSnafu { namespace, pod })?;
        let phase = object
            .status
            .and_then(|status| status.phase)
            .unwrap_or_default();
        if phase != "Running" {
            return error::NotRunningSnafu { namespace, pod }.fail();
        }

        let command_line = command.join(" ");
        debug!("executing '{}' in '{}/{}'", command_line, namespace, pod);
        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);
        let mut attached = pod_api
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| Error::Exec {
                pod: pod.to_string(),
                command: command_line.clone(),
                reason: e.to_string(),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })?;

        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let status = attached.take_status();
        let (stdout, stderr) = tokio::join!(read_all(stdout_reader), read_all(stderr_reader));
        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        let joined = attached.join().await;

        let fail = |reason: String, stdout: Vec<u8>, stderr: Vec<u8>| Error::Exec {
            pod: pod.to_string(),
            command: command_line.clone(),
            reason,
            stdout,
            stderr,
        };
        let (stdout, stderr) = match (stdout, stderr) {
            (Ok(stdout), Ok(stderr)) => (stdout, stderr),
            (stdout, stderr) => {
                let reason = stdout
                    .as_ref()
                    .err()
                    .or(stderr.as_ref().err())
                    .map(|e| format!("unable to read output: {}", e))
                    .unwrap_or_default();
                return Err(fail(
                    reason,
                    stdout.unwrap_or_default(),
                    stderr.unwrap_or_default(),
                ));
            }
        };
        if let Err(e) = joined {
            return Err(fail(e.to_string(), stdout, stderr));
        }
        if let Some(status) = status {
            if status.status.as_deref() != Some("Success") {
                let reason = status
                    .message
                    .or(status.reason)
                    .unwrap_or_else(|| "command failed".to_string());
                return Err(fail(reason, stdout, stderr));
            }
        }
        Ok(ExecOutput { stdout, stderr })
    }
}

async fn read_all<R>(reader: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}

#[cfg(feature = "integ")]
mod test {
    use super::*;
    use crate::error::{Classify, ErrorKind};
    use selftest::Cluster;

    const CLUSTER_NAME: &str = "object-client";

    #[tokio::test]
    async fn object_client_round_trip() {
        let cluster = Cluster::new(CLUSTER_NAME).await.unwrap();
        let client = KubeObjectClient::new_from_k8s_client(cluster.k8s_client().await.unwrap());
        let spec = ResourceSpec::new(ResourceKind::Namespace, None, "round-trip");
        let object = spec.object_ref();

        client.create(&spec).await.unwrap();
        let conflict = client.create(&spec).await.unwrap_err();
        assert!(conflict.is_kind(ErrorKind::Conflict), "{}", conflict);
        assert!(client.get(&object).await.unwrap().is_some());
        let namespaces = client.list("", ResourceKind::Namespace).await.unwrap();
        assert!(namespaces
            .iter()
            .any(|namespace| namespace["metadata"]["name"] == "round-trip"));

        client.delete(&object).await.unwrap();
        client
            .delete(&ObjectRef::namespace("never-created"))
            .await
            .unwrap();

        let missing = client
            .exec_in("default", "no-such-pod", "main", &["true".to_string()])
            .await
            .unwrap_err();
        assert!(missing.is_kind(ErrorKind::NoInstance), "{}", missing);
    }
}
