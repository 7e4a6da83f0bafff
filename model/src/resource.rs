use crate::error::{Classify, ErrorKind};
use crate::wait::Condition;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use snafu::{ensure, Snafu};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The error returned when a `ResourceSpec` is structurally invalid.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Invalid name '{}' for {}: {}", name, kind, reason))]
    InvalidName {
        kind: ResourceKind,
        name: String,
        reason: &'static str,
    },

    #[snafu(display("{} '{}' is namespaced but no namespace was given", kind, name))]
    MissingNamespace { kind: ResourceKind, name: String },

    #[snafu(display(
        "{} '{}' is cluster scoped but namespace '{}' was given",
        kind,
        name,
        namespace
    ))]
    UnexpectedNamespace {
        kind: ResourceKind,
        name: String,
        namespace: String,
    },

    #[snafu(display("Invalid payload for {}: {}", object, reason))]
    InvalidPayload { object: ObjectRef, reason: String },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of remote objects a topology is made of.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    Gateway,
    VirtualService,
    ServiceEntry,
    DestinationRule,
    Telemetry,
    WasmPlugin,
    Deployment,
    Service,
}

/// Where a kind lives in the remote store's schema.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Schema {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl Schema {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: self.api_version(),
            kind: self.kind.to_string(),
            plural: self.plural.to_string(),
        }
    }
}

const ISTIO_NETWORKING: &str = "networking.istio.io";
const ISTIO_TELEMETRY: &str = "telemetry.istio.io";
const ISTIO_EXTENSIONS: &str = "extensions.istio.io";

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Namespace,
        ResourceKind::Gateway,
        ResourceKind::VirtualService,
        ResourceKind::ServiceEntry,
        ResourceKind::DestinationRule,
        ResourceKind::Telemetry,
        ResourceKind::WasmPlugin,
        ResourceKind::Deployment,
        ResourceKind::Service,
    ];

    pub fn schema(&self) -> Schema {
        let (group, version, kind, plural, namespaced) = match self {
            ResourceKind::Namespace => ("", "v1", "Namespace", "namespaces", false),
            ResourceKind::Gateway => (ISTIO_NETWORKING, "v1alpha3", "Gateway", "gateways", true),
            ResourceKind::VirtualService => (
                ISTIO_NETWORKING,
                "v1alpha3",
                "VirtualService",
                "virtualservices",
                true,
            ),
            ResourceKind::ServiceEntry => (
                ISTIO_NETWORKING,
                "v1alpha3",
                "ServiceEntry",
                "serviceentries",
                true,
            ),
            ResourceKind::DestinationRule => (
                ISTIO_NETWORKING,
                "v1alpha3",
                "DestinationRule",
                "destinationrules",
                true,
            ),
            ResourceKind::Telemetry => {
                (ISTIO_TELEMETRY, "v1alpha1", "Telemetry", "telemetries", true)
            }
            ResourceKind::WasmPlugin => {
                (ISTIO_EXTENSIONS, "v1alpha1", "WasmPlugin", "wasmplugins", true)
            }
            ResourceKind::Deployment => ("apps", "v1", "Deployment", "deployments", true),
            ResourceKind::Service => ("", "v1", "Service", "services", true),
        };
        Schema {
            group,
            version,
            kind,
            plural,
            namespaced,
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.schema().namespaced
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.schema().kind)
    }
}

/// Identifies a single remote object by kind, namespace and name.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn namespaced<S1, S2>(kind: ResourceKind, namespace: S1, name: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster<S>(kind: ResourceKind, name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self::cluster(ResourceKind::Namespace, name)
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} '{}/{}'", self.kind, namespace, self.name),
            None => write!(f, "{} '{}'", self.kind, self.name),
        }
    }
}

/// One object to create remotely, fully parameterized before creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// The kind-specific `spec` body. `Value::Null` for kinds without one (namespaces).
    pub payload: Value,
    /// Objects that must exist before this one is created.
    pub depends_on: Vec<ObjectRef>,
    /// The condition that makes this object usable, if it becomes ready asynchronously.
    pub readiness: Option<Condition>,
}

impl ResourceSpec {
    pub fn new<S>(kind: ResourceKind, namespace: Option<&str>, name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.into(),
            labels: BTreeMap::new(),
            payload: Value::Null,
            depends_on: Vec::new(),
            readiness: None,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn depends_on(mut self, object: ObjectRef) -> Self {
        if !self.depends_on.contains(&object) {
            self.depends_on.push(object);
        }
        self
    }

    pub fn ready_when(mut self, condition: Condition) -> Self {
        self.readiness = Some(condition);
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Checks the structural rules the remote store would otherwise reject the object for.
    pub fn validate(&self) -> Result<()> {
        validate_name(self.kind, &self.name)?;
        match (&self.namespace, self.kind.is_namespaced()) {
            (None, true) => {
                return MissingNamespaceSnafu {
                    kind: self.kind,
                    name: &self.name,
                }
                .fail()
            }
            (Some(namespace), false) => {
                return UnexpectedNamespaceSnafu {
                    kind: self.kind,
                    name: &self.name,
                    namespace,
                }
                .fail()
            }
            (Some(namespace), true) => validate_name(ResourceKind::Namespace, namespace)?,
            (None, false) => {}
        }
        match (&self.payload, self.kind) {
            (Value::Null, ResourceKind::Namespace) => Ok(()),
            (Value::Object(_), ResourceKind::Namespace) => InvalidPayloadSnafu {
                object: self.object_ref(),
                reason: "namespaces do not carry a spec",
            }
            .fail(),
            (Value::Object(map), _) if !map.is_empty() => Ok(()),
            _ => InvalidPayloadSnafu {
                object: self.object_ref(),
                reason: "expected a non-empty object",
            }
            .fail(),
        }
    }

    /// The wire representation: `apiVersion`, `kind`, `metadata` and `spec`.
    pub fn to_manifest(&self) -> Value {
        let schema = self.kind.schema();
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), json!(self.name));
        if let Some(namespace) = &self.namespace {
            metadata.insert("namespace".to_string(), json!(namespace));
        }
        if !self.labels.is_empty() {
            metadata.insert("labels".to_string(), json!(self.labels));
        }
        let mut manifest = Map::new();
        manifest.insert("apiVersion".to_string(), json!(schema.api_version()));
        manifest.insert("kind".to_string(), json!(schema.kind));
        manifest.insert("metadata".to_string(), Value::Object(metadata));
        if !self.payload.is_null() {
            manifest.insert("spec".to_string(), self.payload.clone());
        }
        Value::Object(manifest)
    }
}

/// RFC 1123 label rules, which every name in the topology must satisfy.
fn validate_name(kind: ResourceKind, name: &str) -> Result<()> {
    ensure!(
        !name.is_empty(),
        InvalidNameSnafu {
            kind,
            name,
            reason: "must not be empty"
        }
    );
    ensure!(
        name.len() <= 63,
        InvalidNameSnafu {
            kind,
            name,
            reason: "must be at most 63 characters"
        }
    );
    ensure!(
        name.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
        InvalidNameSnafu {
            kind,
            name,
            reason: "must consist of lower case alphanumeric characters or '-'"
        }
    );
    ensure!(
        !name.starts_with('-') && !name.ends_with('-'),
        InvalidNameSnafu {
            kind,
            name,
            reason: "must start and end with an alphanumeric character"
        }
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn manifest_has_wire_fields() {
        let spec = ResourceSpec::new(ResourceKind::Gateway, Some("istio-system"), "fallback-1")
            .with_labels(btreemap! { "a".to_string() => "b".to_string() })
            .with_payload(json!({ "selector": { "istio": "test-gateway" } }));
        let manifest = spec.to_manifest();
        assert_eq!(manifest["apiVersion"], "networking.istio.io/v1alpha3");
        assert_eq!(manifest["kind"], "Gateway");
        assert_eq!(manifest["metadata"]["namespace"], "istio-system");
        assert_eq!(manifest["metadata"]["labels"]["a"], "b");
        assert_eq!(manifest["spec"]["selector"]["istio"], "test-gateway");
    }

    #[test]
    fn namespace_manifest_has_no_spec() {
        let manifest = ResourceSpec::new(ResourceKind::Namespace, None, "client-abc").to_manifest();
        assert_eq!(manifest["apiVersion"], "v1");
        assert!(manifest.get("spec").is_none());
        assert!(manifest["metadata"].get("namespace").is_none());
    }

    #[test]
    fn validation_rejects_bad_specs() {
        let no_ns = ResourceSpec::new(ResourceKind::Service, None, "server")
            .with_payload(json!({ "ports": [] }));
        assert!(matches!(
            no_ns.validate(),
            Err(Error::MissingNamespace { .. })
        ));

        let bad_name = ResourceSpec::new(ResourceKind::Namespace, None, "Client_NS");
        assert!(matches!(bad_name.validate(), Err(Error::InvalidName { .. })));

        let empty_payload = ResourceSpec::new(ResourceKind::Service, Some("ns"), "server")
            .with_payload(json!({}));
        let err = empty_payload.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let cluster_scoped = ResourceSpec::new(ResourceKind::Namespace, Some("ns"), "other");
        assert!(matches!(
            cluster_scoped.validate(),
            Err(Error::UnexpectedNamespace { .. })
        ));
    }

    #[test]
    fn every_kind_has_a_schema() {
        for kind in ResourceKind::ALL {
            let resource = kind.schema().api_resource();
            assert_eq!(resource.kind, kind.to_string());
            assert!(!resource.plural.is_empty());
        }
        assert_eq!(
            ResourceKind::WasmPlugin.schema().api_version(),
            "extensions.istio.io/v1alpha1"
        );
    }
}
