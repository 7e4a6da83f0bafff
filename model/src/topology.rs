use crate::constants::{
    ACCESS_LOG_PROVIDER, COMPONENT_DEPENDENCY_LEARNER, GATEWAY_PORT, GATEWAY_PORT_NAME, LABEL_APP,
    LABEL_COMPONENT, LABEL_ISTIO_INJECTION, LABEL_RUN, MESH_DEFAULT_TELEMETRY, MESH_GATEWAY,
    SERVER_PORT_NAME,
};
use crate::error::{Classify, ErrorKind};
use crate::params::RunParameters;
use crate::resource::{self, ObjectRef, ResourceKind, ResourceSpec};
use crate::wait::Condition;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use maplit::btreemap;
use serde::Serialize;
use serde_json::{json, Value};
use snafu::{ensure, ResultExt, Snafu};
use std::collections::{BTreeMap, HashMap};
use topological_sort::TopologicalSort;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{} appears more than once in the topology", object))]
    DuplicateIdentity { object: ObjectRef },

    #[snafu(display("{} depends on {} which is not part of the topology", object, missing))]
    UnresolvedReference {
        object: ObjectRef,
        missing: ObjectRef,
    },

    #[snafu(display("The topology has a dependency cycle involving: {}", objects.join(", ")))]
    Cycle { objects: Vec<String> },

    #[snafu(display("{}", source))]
    InvalidSpec { source: resource::Error },

    #[snafu(display("Unable to serialize the payload of {}: {}", object, source))]
    Payload {
        object: ObjectRef,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to render {} as YAML: {}", object, source))]
    Yaml {
        object: ObjectRef,
        source: serde_yaml::Error,
    },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The full, ordered set of objects of one run. The order is a topological sort of the
/// dependency graph: every spec comes after every spec it depends on. A `Topology` cannot be
/// modified once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    specs: Vec<ResourceSpec>,
}

impl Topology {
    /// Validates `specs` and sorts them level by level: first every spec without dependencies,
    /// then every spec whose dependencies are all in earlier levels, and so on. Within a level,
    /// specs keep the order in which they were given.
    pub fn new(specs: Vec<ResourceSpec>) -> Result<Self> {
        let mut index = HashMap::new();
        for (position, spec) in specs.iter().enumerate() {
            spec.validate().context(InvalidSpecSnafu)?;
            let object = spec.object_ref();
            ensure!(
                !index.contains_key(&object),
                DuplicateIdentitySnafu { object }
            );
            index.insert(object, position);
        }

        let mut sort = TopologicalSort::<usize>::new();
        for (position, spec) in specs.iter().enumerate() {
            sort.insert(position);
            for dependency in &spec.depends_on {
                let dependency_position =
                    *index
                        .get(dependency)
                        .ok_or_else(|| Error::UnresolvedReference {
                            object: spec.object_ref(),
                            missing: dependency.clone(),
                        })?;
                sort.add_dependency(dependency_position, position);
            }
        }

        let mut order = Vec::with_capacity(specs.len());
        loop {
            let mut level = sort.pop_all();
            if level.is_empty() {
                break;
            }
            level.sort_unstable();
            order.extend(level);
        }
        ensure!(
            sort.is_empty(),
            CycleSnafu {
                objects: remaining(&specs, &order),
            }
        );

        let mut slots: Vec<Option<ResourceSpec>> = specs.into_iter().map(Some).collect();
        let specs = order
            .into_iter()
            .filter_map(|position| slots.get_mut(position).and_then(Option::take))
            .collect();
        Ok(Self { specs })
    }

    /// The specs in creation order.
    pub fn specs(&self) -> &[ResourceSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, object: &ObjectRef) -> Option<&ResourceSpec> {
        self.specs.iter().find(|spec| &spec.object_ref() == object)
    }

    /// Every object of the topology in creation order.
    pub fn object_refs(&self) -> Vec<ObjectRef> {
        self.specs.iter().map(ResourceSpec::object_ref).collect()
    }

    /// The order in which `created` objects must be deleted: the reverse of creation order, so
    /// that nothing is deleted before the objects that depend on it. Objects that are not part
    /// of the topology are deleted last, in the order given.
    pub fn deletion_order(&self, created: &[ObjectRef]) -> Vec<ObjectRef> {
        let mut order: Vec<ObjectRef> = self
            .specs
            .iter()
            .rev()
            .map(ResourceSpec::object_ref)
            .filter(|object| created.contains(object))
            .collect();
        for object in created {
            if !order.contains(object) {
                order.push(object.clone());
            }
        }
        order
    }

    /// The wire form of every spec, in creation order.
    pub fn manifests(&self) -> Vec<Value> {
        self.specs.iter().map(ResourceSpec::to_manifest).collect()
    }

    /// The wire form of every spec as a multi-document YAML stream, in creation order.
    pub fn to_yaml(&self) -> Result<String> {
        self.specs
            .iter()
            .map(|spec| {
                serde_yaml::to_string(&spec.to_manifest()).context(YamlSnafu {
                    object: spec.object_ref(),
                })
            })
            .collect()
    }
}

fn remaining(specs: &[ResourceSpec], order: &[usize]) -> Vec<String> {
    specs
        .iter()
        .enumerate()
        .filter(|(position, _)| !order.contains(position))
        .map(|(_, spec)| spec.object_ref().to_string())
        .collect()
}

/// Builds the topologies the harness provisions. Construction is pure: it returns data and never
/// talks to the control plane. Every name that must be unique was already generated in the
/// `RunParameters`, so building twice from the same parameters yields the same identities.
pub struct TopologyBuilder<'a> {
    params: &'a RunParameters,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(params: &'a RunParameters) -> Self {
        Self { params }
    }

    /// The objects the dependency detection feature needs: two meshed namespaces, the fallback
    /// gateway and its routing, the filter deployment, and a client and server workload.
    pub fn dependency_detection(&self) -> Result<Topology> {
        let p = self.params;
        let client_ns = ObjectRef::namespace(&p.client_namespace);
        let server_ns = ObjectRef::namespace(&p.server_namespace);
        let gateway = ObjectRef::namespaced(
            ResourceKind::Gateway,
            &p.mesh_namespace,
            &p.fallback_name,
        );
        let server_deployment = ObjectRef::namespaced(
            ResourceKind::Deployment,
            &p.server_namespace,
            &p.server_name,
        );
        let server_service =
            ObjectRef::namespaced(ResourceKind::Service, &p.server_namespace, &p.server_name);

        let specs = vec![
            self.meshed_namespace(&p.client_namespace),
            self.meshed_namespace(&p.server_namespace),
            self.labeled(ResourceSpec::new(
                ResourceKind::Gateway,
                Some(&p.mesh_namespace),
                &p.fallback_name,
            ))
            .with_payload(self.fallback_gateway()),
            self.labeled(ResourceSpec::new(
                ResourceKind::VirtualService,
                Some(&p.mesh_namespace),
                &p.fallback_name,
            ))
            .with_payload(self.gateway_routing())
            .depends_on(gateway)
            .depends_on(server_service.clone()),
            self.labeled(ResourceSpec::new(
                ResourceKind::WasmPlugin,
                Some(&p.mesh_namespace),
                &p.fallback_name,
            ))
            .with_payload(self.filter_deployment()),
            self.labeled(ResourceSpec::new(
                ResourceKind::ServiceEntry,
                Some(&p.client_namespace),
                &p.fallback_name,
            ))
            .with_payload(self.client_service_entry())
            .depends_on(client_ns.clone()),
            self.labeled(ResourceSpec::new(
                ResourceKind::VirtualService,
                Some(&p.client_namespace),
                &p.fallback_name,
            ))
            .with_payload(self.client_routing())
            .depends_on(client_ns.clone()),
            self.workload(&p.client_namespace, &p.client_name)?
                .depends_on(client_ns),
            self.workload(&p.server_namespace, &p.server_name)?
                .depends_on(server_ns.clone()),
            self.labeled(ResourceSpec::new(
                ResourceKind::Service,
                Some(&p.server_namespace),
                &p.server_name,
            ))
            .with_payload(to_payload(&server_service, &self.server_service())?)
            .depends_on(server_ns)
            .depends_on(server_deployment),
        ];
        Topology::new(specs)
    }

    /// Mesh-wide defaults the environment installs once: mutual TLS towards the gateway and
    /// access logging.
    pub fn mesh_defaults(&self) -> Result<Topology> {
        let p = self.params;
        let gateway_host = p.gateway_host();
        Topology::new(vec![
            self.labeled(ResourceSpec::new(
                ResourceKind::DestinationRule,
                Some(&p.mesh_namespace),
                &p.gateway_name,
            ))
            .with_payload(json!({
                "host": gateway_host,
                "trafficPolicy": {
                    "tls": {
                        "mode": "ISTIO_MUTUAL",
                        "sni": gateway_host,
                    }
                }
            })),
            self.labeled(ResourceSpec::new(
                ResourceKind::Telemetry,
                Some(&p.mesh_namespace),
                MESH_DEFAULT_TELEMETRY,
            ))
            .with_payload(json!({
                "accessLogging": [
                    { "providers": [ { "name": ACCESS_LOG_PROVIDER } ] }
                ]
            })),
        ])
    }

    fn labeled(&self, spec: ResourceSpec) -> ResourceSpec {
        spec.with_labels(btreemap! {
            LABEL_RUN.to_string() => self.params.run_id.clone(),
            LABEL_COMPONENT.to_string() => COMPONENT_DEPENDENCY_LEARNER.to_string(),
        })
    }

    fn meshed_namespace(&self, name: &str) -> ResourceSpec {
        self.labeled(ResourceSpec::new(ResourceKind::Namespace, None, name))
            .with_labels(btreemap! {
                LABEL_ISTIO_INJECTION.to_string() => "enabled".to_string(),
            })
    }

    fn gateway_selector(&self) -> BTreeMap<String, String> {
        btreemap! {
            self.params.gateway_selector_key.clone() => self.params.gateway_selector_value.clone(),
        }
    }

    fn fallback_gateway(&self) -> Value {
        json!({
            "selector": self.gateway_selector(),
            "servers": [{
                "name": self.params.fallback_name,
                "hosts": self.params.fallback_hosts(),
                "port": {
                    "number": GATEWAY_PORT,
                    "protocol": "HTTPS",
                    "name": GATEWAY_PORT_NAME,
                },
                "tls": { "mode": "ISTIO_MUTUAL" },
            }],
        })
    }

    /// Routes requests arriving at the fallback gateway for the server's short host to the
    /// server's service.
    fn gateway_routing(&self) -> Value {
        json!({
            "hosts": self.params.fallback_hosts(),
            "gateways": [self.params.fallback_name],
            "exportTo": ["."],
            "http": [{
                "match": [{
                    "authority": { "prefix": self.params.server_short_host() },
                }],
                "route": [{
                    "destination": { "host": self.params.server_host() },
                }],
            }],
        })
    }

    fn filter_deployment(&self) -> Value {
        json!({
            "selector": { "matchLabels": self.gateway_selector() },
            "url": self.params.filter_url,
            "type": "HTTP",
            "phase": "UNSPECIFIED_PHASE",
            "pluginConfig": {
                "response_header": self.params.response_header,
            },
        })
    }

    fn client_service_entry(&self) -> Value {
        json!({
            "hosts": self.params.fallback_hosts(),
            "resolution": "NONE",
            "exportTo": [self.params.client_namespace],
        })
    }

    /// Sends all in-mesh traffic of the client namespace through the fallback gateway.
    fn client_routing(&self) -> Value {
        json!({
            "hosts": self.params.fallback_hosts(),
            "gateways": [MESH_GATEWAY],
            "exportTo": ["."],
            "http": [{
                "route": [{
                    "destination": {
                        "host": self.params.gateway_host(),
                        "port": { "number": GATEWAY_PORT },
                    },
                }],
            }],
        })
    }

    fn workload(&self, namespace: &str, name: &str) -> Result<ResourceSpec> {
        let object = ObjectRef::namespaced(ResourceKind::Deployment, namespace, name);
        let labels = btreemap! { LABEL_APP.to_string() => name.to_string() };
        let deployment = DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: self.params.container_name.clone(),
                        image: Some(self.params.workload_image.clone()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        };
        Ok(
            self.labeled(ResourceSpec::new(ResourceKind::Deployment, Some(namespace), name))
                .with_payload(to_payload(&object, &deployment)?)
                .ready_when(Condition::available()),
        )
    }

    fn server_service(&self) -> ServiceSpec {
        ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(SERVER_PORT_NAME.to_string()),
                port: self.params.server_port,
                ..Default::default()
            }]),
            selector: Some(btreemap! {
                LABEL_APP.to_string() => self.params.server_name.clone(),
            }),
            ..Default::default()
        }
    }
}

fn to_payload<T: Serialize>(object: &ObjectRef, value: &T) -> Result<Value> {
    serde_json::to_value(value).context(PayloadSnafu {
        object: object.clone(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::HarnessConfig;

    fn params() -> RunParameters {
        RunParameters::with_names(
            &HarnessConfig::default(),
            "run-1",
            "client-abc",
            "server-abc",
            "fallback-abc",
        )
    }

    fn position(topology: &Topology, object: &ObjectRef) -> usize {
        topology
            .specs()
            .iter()
            .position(|spec| &spec.object_ref() == object)
            .unwrap()
    }

    #[test]
    fn every_spec_follows_its_dependencies() {
        let topology = TopologyBuilder::new(&params()).dependency_detection().unwrap();
        assert_eq!(topology.len(), 10);
        for (i, spec) in topology.specs().iter().enumerate() {
            for dependency in &spec.depends_on {
                assert!(
                    position(&topology, dependency) < i,
                    "{} comes before its dependency {}",
                    spec.object_ref(),
                    dependency
                );
            }
        }
    }

    #[test]
    fn routing_matches_the_server_service_host() {
        let p = params();
        let topology = TopologyBuilder::new(&p).dependency_detection().unwrap();
        let routing = topology
            .get(&ObjectRef::namespaced(
                ResourceKind::VirtualService,
                "istio-system",
                "fallback-abc",
            ))
            .unwrap();
        let service = topology
            .get(&ObjectRef::namespaced(
                ResourceKind::Service,
                "server-abc",
                "server",
            ))
            .unwrap();
        let destination = &routing.payload["http"][0]["route"][0]["destination"]["host"];
        assert_eq!(destination, "server.server-abc.svc.cluster.local");
        assert_eq!(
            routing.payload["http"][0]["match"][0]["authority"]["prefix"],
            "server.server-abc.svc"
        );
        assert_eq!(service.payload["selector"]["app"], "server");
        assert_eq!(service.payload["ports"][0]["port"], 80);
    }

    #[test]
    fn fallback_routing_follows_the_cluster_domain() {
        let config = HarnessConfig {
            cluster_domain: "corp.local".to_string(),
            ..HarnessConfig::default()
        };
        let p = RunParameters::with_names(&config, "run-1", "client-abc", "server-abc", "fb");
        let topology = TopologyBuilder::new(&p).dependency_detection().unwrap();
        let expected = json!(["*.svc", "*.svc.corp.local"]);
        for (kind, namespace) in [
            (ResourceKind::Gateway, "istio-system"),
            (ResourceKind::VirtualService, "istio-system"),
            (ResourceKind::ServiceEntry, "client-abc"),
            (ResourceKind::VirtualService, "client-abc"),
        ] {
            let spec = topology
                .get(&ObjectRef::namespaced(kind, namespace, "fb"))
                .unwrap();
            let hosts = match kind {
                ResourceKind::Gateway => &spec.payload["servers"][0]["hosts"],
                _ => &spec.payload["hosts"],
            };
            assert_eq!(hosts, &expected, "{}", spec.object_ref());
        }
        let routing = topology
            .get(&ObjectRef::namespaced(ResourceKind::VirtualService, "istio-system", "fb"))
            .unwrap();
        assert_eq!(
            routing.payload["http"][0]["route"][0]["destination"]["host"],
            "server.server-abc.svc.corp.local"
        );
    }

    #[test]
    fn workloads_wait_for_availability() {
        let topology = TopologyBuilder::new(&params()).dependency_detection().unwrap();
        let ready: Vec<_> = topology
            .specs()
            .iter()
            .filter(|spec| spec.readiness.is_some())
            .map(|spec| spec.kind)
            .collect();
        assert_eq!(ready, vec![ResourceKind::Deployment, ResourceKind::Deployment]);
        let client = topology
            .get(&ObjectRef::namespaced(
                ResourceKind::Deployment,
                "client-abc",
                "client",
            ))
            .unwrap();
        assert_eq!(
            client.payload["template"]["spec"]["containers"][0]["image"],
            "nginx:1.25.5"
        );
        assert_eq!(client.payload["selector"]["matchLabels"]["app"], "client");
    }

    #[test]
    fn filter_deployment_is_configured() {
        let topology = TopologyBuilder::new(&params()).dependency_detection().unwrap();
        let plugin = topology
            .get(&ObjectRef::namespaced(
                ResourceKind::WasmPlugin,
                "istio-system",
                "fallback-abc",
            ))
            .unwrap();
        assert_eq!(
            plugin.payload["pluginConfig"]["response_header"],
            "detected-dependency"
        );
        assert_eq!(plugin.payload["selector"]["matchLabels"]["istio"], "test-gateway");
        assert!(plugin.payload["url"]
            .as_str()
            .unwrap()
            .starts_with("file:///dependency-learner/"));
    }

    #[test]
    fn building_twice_yields_the_same_identities() {
        let p = params();
        let a = TopologyBuilder::new(&p).dependency_detection().unwrap();
        let b = TopologyBuilder::new(&p).dependency_detection().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn deletion_order_reverses_creation() {
        let topology = TopologyBuilder::new(&params()).dependency_detection().unwrap();
        let created = topology.object_refs();
        let deletion = topology.deletion_order(&created);
        assert_eq!(deletion.len(), created.len());
        for (i, object) in deletion.iter().enumerate() {
            let spec = topology.get(object).unwrap();
            for dependency in &spec.depends_on {
                let dependency_position = deletion.iter().position(|o| o == dependency).unwrap();
                assert!(dependency_position > i);
            }
        }
        // The namespaces go last, after the mesh-level objects.
        assert_eq!(deletion.last().unwrap(), &ObjectRef::namespace("client-abc"));
    }

    #[test]
    fn deletion_order_only_covers_created_objects() {
        let topology = TopologyBuilder::new(&params()).dependency_detection().unwrap();
        let created = topology.object_refs()[..3].to_vec();
        let deletion = topology.deletion_order(&created);
        assert_eq!(deletion.len(), 3);
        assert!(deletion.iter().all(|object| created.contains(object)));
    }

    #[test]
    fn invalid_graphs_are_rejected() {
        let ns = ResourceSpec::new(ResourceKind::Namespace, None, "a");
        let duplicate = Topology::new(vec![ns.clone(), ns.clone()]).unwrap_err();
        assert!(matches!(duplicate, Error::DuplicateIdentity { .. }));

        let dangling = ResourceSpec::new(ResourceKind::Namespace, None, "b")
            .depends_on(ObjectRef::namespace("missing"));
        let unresolved = Topology::new(vec![ns.clone(), dangling]).unwrap_err();
        assert!(matches!(unresolved, Error::UnresolvedReference { .. }));

        let x = ResourceSpec::new(ResourceKind::Namespace, None, "x")
            .depends_on(ObjectRef::namespace("y"));
        let y = ResourceSpec::new(ResourceKind::Namespace, None, "y")
            .depends_on(ObjectRef::namespace("x"));
        let cycle = Topology::new(vec![ns, x, y]).unwrap_err();
        assert!(matches!(cycle, Error::Cycle { .. }));
        assert_eq!(cycle.kind(), ErrorKind::Validation);
    }

    #[test]
    fn specs_are_sorted_level_by_level() {
        let specs = vec![
            ResourceSpec::new(ResourceKind::Namespace, None, "c")
                .depends_on(ObjectRef::namespace("b")),
            ResourceSpec::new(ResourceKind::Namespace, None, "a"),
            ResourceSpec::new(ResourceKind::Namespace, None, "b"),
        ];
        let names: Vec<_> = Topology::new(specs)
            .unwrap()
            .specs()
            .iter()
            .map(|spec| spec.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn mesh_defaults() {
        let topology = TopologyBuilder::new(&params()).mesh_defaults().unwrap();
        let manifests = topology.manifests();
        assert_eq!(manifests[0]["kind"], "DestinationRule");
        assert_eq!(
            manifests[0]["spec"]["trafficPolicy"]["tls"]["sni"],
            "test-gateway.istio-system.svc.cluster.local"
        );
        assert_eq!(manifests[1]["kind"], "Telemetry");
        assert_eq!(
            manifests[1]["spec"]["accessLogging"][0]["providers"][0]["name"],
            "envoy"
        );
    }

    #[test]
    fn yaml_has_one_document_per_object() {
        let topology = TopologyBuilder::new(&params()).mesh_defaults().unwrap();
        let yaml = topology.to_yaml().unwrap();
        assert_eq!(yaml.matches("---").count(), topology.len());
        assert!(yaml.contains("kind: Telemetry"));
    }
}
