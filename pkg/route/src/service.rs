use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use pkg_constants::annotations::{CLUSTER_EXPORT, CLUSTER_EXPORT_NAME};
use pkg_types::NamespacedName;
use pkg_types::endpoint::Endpoints;
use pkg_types::multicluster::ServiceImport;
use pkg_types::service::{Service, ServiceType};
use pkg_types::validate::validate_subdomain;

use crate::document::{ServiceRouteEntry, Target};
use crate::model::ServicePortName;
use crate::rejection::{Rejection, reason};

/// A ready endpoint address of one service port.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EndpointInfo {
    pub ip: String,
    pub port: i32,
    pub node_name: String,
    pub hostname: String,
}

impl EndpointInfo {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    ClusterIP,
    ExternalName,
}

/// Routable view of one service port. `name.port` carries the port name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: ServicePortName,
    pub kind: ServiceKind,
    pub cluster_ip: String,
    pub port: i32,
    pub target_port: i32,
    pub external_name: Option<String>,
    pub export: bool,
    pub export_name: String,
}

impl ServiceInfo {
    /// `clusterIP:port`, or `externalName:targetPort` for ExternalName services.
    pub fn address(&self) -> String {
        match (&self.kind, &self.external_name) {
            (ServiceKind::ExternalName, Some(host)) => format!("{}:{}", host, self.target_port),
            _ => format!("{}:{}", self.cluster_ip, self.port),
        }
    }
}

/// An endpoint of a service imported from another cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MultiClusterEndpoint {
    pub cluster_key: String,
    pub address: String,
}

/// Service-side state read from the cache under its lock.
#[derive(Debug, Clone, Default)]
pub struct ServiceSnapshot {
    pub services: BTreeMap<ServicePortName, ServiceInfo>,
    pub endpoints: BTreeMap<ServicePortName, Vec<EndpointInfo>>,
    pub imports: BTreeMap<ServicePortName, Vec<MultiClusterEndpoint>>,
}

/// `{services: {"ns/name[:port]": ["addr:port", ...]}}`, published as `registry.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistry {
    pub services: BTreeMap<String, Vec<String>>,
}

impl ServiceRegistry {
    pub fn add(&mut self, key: String, addresses: impl IntoIterator<Item = String>) {
        let entry = self.services.entry(key).or_default();
        entry.extend(addresses);
        entry.sort();
        entry.dedup();
    }

    pub fn from_entries(entries: &[ServiceRouteEntry]) -> Self {
        let mut registry = Self::default();
        for entry in entries {
            registry.add(entry.key(), entry.targets.iter().map(|t| t.address.clone()));
        }
        registry
    }
}

fn is_flag_set(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("yes" | "true" | "1" | "on")
    )
}

fn is_local_external_name(name: &str) -> bool {
    let name = name.trim_end_matches('.');
    if name.eq_ignore_ascii_case("localhost") {
        return true;
    }
    name.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Routable ports of a Service. NodePort and LoadBalancer services are
/// consumed externally and yield nothing; invalid ExternalName services
/// are rejected.
pub fn service_infos(svc: &Service, rejections: &mut Vec<Rejection>) -> Vec<ServiceInfo> {
    let key = svc.metadata.key();
    let kind = match svc.spec.type_ {
        ServiceType::ClusterIP => ServiceKind::ClusterIP,
        ServiceType::ExternalName => ServiceKind::ExternalName,
        ServiceType::NodePort | ServiceType::LoadBalancer => return Vec::new(),
    };

    if kind == ServiceKind::ExternalName {
        let name = svc.spec.external_name.as_deref().unwrap_or("");
        if is_local_external_name(name) {
            rejections.push(Rejection::new(
                format!("Service/{}", key),
                reason::INVALID_SERVICE,
                format!("externalName '{}' points at the local host", name),
            ));
            return Vec::new();
        }
        if let Err(e) = validate_subdomain(name) {
            rejections.push(Rejection::new(
                format!("Service/{}", key),
                reason::INVALID_SERVICE,
                e.to_string(),
            ));
            return Vec::new();
        }
    }

    let export = is_flag_set(svc.metadata.annotation(CLUSTER_EXPORT));
    let export_name = svc
        .metadata
        .annotation(CLUSTER_EXPORT_NAME)
        .unwrap_or("")
        .to_string();

    svc.spec
        .ports
        .iter()
        .map(|port| ServiceInfo {
            name: ServicePortName {
                service: key.clone(),
                port: Some(port.name.clone()).filter(|p| !p.is_empty()),
                protocol: port.protocol.clone(),
            },
            kind,
            cluster_ip: svc.spec.cluster_ip.clone().unwrap_or_default(),
            port: port.port,
            target_port: port.target_port_number(),
            external_name: svc.spec.external_name.clone(),
            export,
            export_name: export_name.clone(),
        })
        .collect()
}

/// Ready addresses of an Endpoints object, grouped by port name.
pub fn endpoint_infos(eps: &Endpoints) -> BTreeMap<ServicePortName, Vec<EndpointInfo>> {
    let key = eps.metadata.key();
    let mut result: BTreeMap<ServicePortName, Vec<EndpointInfo>> = BTreeMap::new();
    for subset in &eps.subsets {
        for port in &subset.ports {
            let name = ServicePortName {
                service: key.clone(),
                port: Some(port.name.clone()).filter(|p| !p.is_empty()),
                protocol: port.protocol.clone(),
            };
            let entry = result.entry(name).or_default();
            for addr in &subset.addresses {
                if addr.ip.is_empty() || port.port <= 0 {
                    continue;
                }
                entry.push(EndpointInfo {
                    ip: addr.ip.clone(),
                    port: port.port,
                    node_name: addr.node_name.clone().unwrap_or_default(),
                    hostname: addr.hostname.clone().unwrap_or_default(),
                });
            }
        }
    }
    for endpoints in result.values_mut() {
        endpoints.sort();
        endpoints.dedup();
    }
    result.retain(|_, v| !v.is_empty());
    result
}

/// Endpoints of a ServiceImport, grouped by port name.
pub fn import_endpoints(imp: &ServiceImport) -> BTreeMap<ServicePortName, Vec<MultiClusterEndpoint>> {
    let key = imp.metadata.key();
    let mut result: BTreeMap<ServicePortName, Vec<MultiClusterEndpoint>> = BTreeMap::new();
    for port in &imp.spec.ports {
        let name = ServicePortName {
            service: key.clone(),
            port: Some(port.name.clone()).filter(|p| !p.is_empty()),
            protocol: port.protocol.clone(),
        };
        let entry = result.entry(name).or_default();
        entry.extend(port.endpoints.iter().map(|ep| MultiClusterEndpoint {
            cluster_key: ep.cluster_key.clone(),
            address: ep.address(),
        }));
        entry.sort();
        entry.dedup();
    }
    result.retain(|_, v| !v.is_empty());
    result
}

/// Per-port entries of the cluster's `ServiceRoute` document.
pub fn service_routes(snapshot: &ServiceSnapshot) -> Vec<ServiceRouteEntry> {
    let mut entries: BTreeMap<&ServicePortName, ServiceRouteEntry> = BTreeMap::new();

    for (name, info) in &snapshot.services {
        let mut targets = Vec::new();
        match info.kind {
            ServiceKind::ClusterIP => {
                for ep in snapshot.endpoints.get(name).into_iter().flatten() {
                    let mut tags = BTreeMap::new();
                    if !ep.node_name.is_empty() {
                        tags.insert("Node".to_string(), ep.node_name.clone());
                    }
                    if !ep.hostname.is_empty() {
                        tags.insert("Host".to_string(), ep.hostname.clone());
                    }
                    targets.push(Target {
                        address: ep.address(),
                        tags,
                    });
                }
            }
            ServiceKind::ExternalName => targets.push(Target {
                address: info.address(),
                tags: BTreeMap::new(),
            }),
        }
        entries.insert(name, entry_for(&name.service, name, info.export, &info.export_name, targets));
    }

    for (name, endpoints) in &snapshot.imports {
        let entry = entries
            .entry(name)
            .or_insert_with(|| entry_for(&name.service, name, false, "", Vec::new()));
        entry.targets.extend(endpoints.iter().map(|ep| Target {
            address: ep.address.clone(),
            tags: BTreeMap::from([("Cluster".to_string(), ep.cluster_key.clone())]),
        }));
    }

    entries
        .into_values()
        .map(|mut entry| {
            entry.targets.sort_by(|a, b| a.address.cmp(&b.address));
            entry.targets.dedup_by(|a, b| a.address == b.address);
            entry
        })
        .collect()
}

fn entry_for(
    service: &NamespacedName,
    name: &ServicePortName,
    export: bool,
    export_name: &str,
    targets: Vec<Target>,
) -> ServiceRouteEntry {
    ServiceRouteEntry {
        name: service.name.clone(),
        namespace: service.namespace.clone(),
        port_name: name.port.clone().unwrap_or_default(),
        targets,
        export,
        export_name: export_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::ObjectMeta;
    use pkg_types::endpoint::{EndpointAddress, EndpointPort, EndpointSubset};
    use pkg_types::service::{IntOrString, ServicePort, ServiceSpec};

    fn make_service(name: &str, type_: ServiceType) -> Service {
        Service {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            spec: ServiceSpec {
                type_,
                cluster_ip: Some("10.96.0.10".to_string()),
                ports: vec![ServicePort {
                    name: "http".to_string(),
                    protocol: "TCP".to_string(),
                    port: 80,
                    target_port: Some(IntOrString::Int(8080)),
                    ..Default::default()
                }],
                ..Default::default()
            },
        }
    }

    fn make_endpoints(name: &str, ips: &[&str]) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            subsets: vec![EndpointSubset {
                addresses: ips
                    .iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        node_name: Some("node-1".to_string()),
                        ..Default::default()
                    })
                    .collect(),
                not_ready_addresses: vec![EndpointAddress {
                    ip: "10.0.0.99".to_string(),
                    ..Default::default()
                }],
                ports: vec![EndpointPort {
                    name: "http".to_string(),
                    port: 8080,
                    protocol: "TCP".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn node_port_services_are_ignored() {
        let mut rejections = Vec::new();
        assert!(service_infos(&make_service("np", ServiceType::NodePort), &mut rejections).is_empty());
        assert!(service_infos(&make_service("lb", ServiceType::LoadBalancer), &mut rejections).is_empty());
        assert!(rejections.is_empty());
        assert_eq!(service_infos(&make_service("web", ServiceType::ClusterIP), &mut rejections).len(), 1);
    }

    #[test]
    fn external_name_validation() {
        let mut rejections = Vec::new();
        let mut svc = make_service("ext", ServiceType::ExternalName);
        for bad in ["localhost", "127.0.0.1", "not_a_host"] {
            svc.spec.external_name = Some(bad.to_string());
            assert!(service_infos(&svc, &mut rejections).is_empty());
        }
        assert_eq!(rejections.len(), 3);

        svc.spec.external_name = Some("db.example.com".to_string());
        let infos = service_infos(&svc, &mut rejections);
        assert_eq!(infos[0].address(), "db.example.com:8080");
    }

    #[test]
    fn only_ready_addresses_are_kept() {
        let eps = endpoint_infos(&make_endpoints("web", &["10.0.0.6", "10.0.0.5"]));
        let key = ServicePortName::new(NamespacedName::new("default", "web"), Some("http".into()));
        let list = &eps[&key];
        assert_eq!(
            list.iter().map(EndpointInfo::address).collect::<Vec<_>>(),
            vec!["10.0.0.5:8080", "10.0.0.6:8080"]
        );
    }

    #[test]
    fn service_routes_carry_tags_and_exports() {
        let mut rejections = Vec::new();
        let mut svc = make_service("svc-x", ServiceType::ClusterIP);
        svc.metadata
            .annotations
            .insert(CLUSTER_EXPORT.to_string(), "true".to_string());
        svc.metadata
            .annotations
            .insert(CLUSTER_EXPORT_NAME.to_string(), "svc-x-global".to_string());

        let mut snapshot = ServiceSnapshot::default();
        for info in service_infos(&svc, &mut rejections) {
            snapshot.services.insert(info.name.clone(), info);
        }
        snapshot.endpoints = endpoint_infos(&make_endpoints("svc-x", &["10.0.0.5"]));
        let key = ServicePortName::new(NamespacedName::new("default", "svc-x"), Some("http".into()));
        snapshot.imports.insert(
            key,
            vec![MultiClusterEndpoint {
                cluster_key: "eu/b/default/c2".to_string(),
                address: "192.168.1.10:80".to_string(),
            }],
        );

        let routes = service_routes(&snapshot);
        assert_eq!(routes.len(), 1);
        let entry = &routes[0];
        assert!(entry.export);
        assert_eq!(entry.export_name, "svc-x-global");
        assert_eq!(entry.key(), "default/svc-x:http");
        assert_eq!(entry.targets[0].address, "10.0.0.5:8080");
        assert_eq!(entry.targets[0].tags["Node"], "node-1");
        assert_eq!(entry.targets[1].tags["Cluster"], "eu/b/default/c2");

        let registry = ServiceRegistry::from_entries(&routes);
        assert_eq!(
            registry.services["default/svc-x:http"],
            vec!["10.0.0.5:8080", "192.168.1.10:80"]
        );
    }
}
