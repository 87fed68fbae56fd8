use std::collections::{BTreeMap, BTreeSet};

use pkg_constants::annotations::{CLUSTER_EXPORT, UPSTREAM_SSL_SECRET};
use pkg_route::ingress::IngressLookup;
use pkg_route::service::{
    EndpointInfo, MultiClusterEndpoint, ServiceInfo, ServiceSnapshot, endpoint_infos,
    import_endpoints, service_infos,
};
use pkg_route::{Rejection, ServicePortName};
use pkg_types::NamespacedName;
use pkg_types::endpoint::{EndpointSlice, Endpoints};
use pkg_types::multicluster::ServiceImport;
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use tracing::debug;

use crate::store;
use crate::tracker::ChangeTracker;

/// Services and everything hanging off them: endpoints, slices, imports,
/// plus the secrets and namespace labels other indices look up.
#[derive(Debug, Default)]
pub struct ServiceIndex {
    services: BTreeMap<NamespacedName, Service>,
    endpoints: BTreeMap<NamespacedName, Endpoints>,
    slices: BTreeMap<NamespacedName, EndpointSlice>,
    slices_by_service: BTreeMap<NamespacedName, BTreeSet<NamespacedName>>,
    imports: BTreeMap<NamespacedName, ServiceImport>,
    secrets: BTreeMap<NamespacedName, Secret>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    /// portNumberToName
    port_names: BTreeMap<(NamespacedName, i32), String>,

    service_map: BTreeMap<ServicePortName, ServiceInfo>,
    endpoints_map: BTreeMap<ServicePortName, Vec<EndpointInfo>>,
    imports_map: BTreeMap<ServicePortName, Vec<MultiClusterEndpoint>>,

    service_changes: ChangeTracker<NamespacedName, Service>,
    endpoints_changes: ChangeTracker<NamespacedName, Endpoints>,
    import_changes: ChangeTracker<NamespacedName, ServiceImport>,
}

impl ServiceIndex {
    pub fn set_service(&mut self, key: &NamespacedName, service: Option<&Service>) -> bool {
        let previous = store(&mut self.services, key, service);
        if let Some(old) = &previous {
            for port in &old.spec.ports {
                self.port_names.remove(&(key.clone(), port.port));
            }
        }
        if let Some(svc) = service {
            for port in &svc.spec.ports {
                self.port_names
                    .insert((key.clone(), port.port), port.name.clone());
            }
        }
        self.service_changes.update(key, previous.as_ref(), service)
    }

    pub fn set_endpoints(&mut self, key: &NamespacedName, endpoints: Option<&Endpoints>) -> bool {
        let previous = store(&mut self.endpoints, key, endpoints);
        self.endpoints_changes
            .update(key, previous.as_ref(), endpoints)
    }

    /// Returns the owning service when the slice changed.
    pub fn set_slice(
        &mut self,
        key: &NamespacedName,
        slice: Option<&EndpointSlice>,
    ) -> Option<NamespacedName> {
        let previous = store(&mut self.slices, key, slice);
        if previous.as_ref() == slice {
            return None;
        }
        let old_owner = previous.as_ref().and_then(EndpointSlice::service_key);
        let new_owner = slice.and_then(EndpointSlice::service_key);
        if let Some(owner) = &old_owner
            && let Some(set) = self.slices_by_service.get_mut(owner)
        {
            set.remove(key);
            if set.is_empty() {
                self.slices_by_service.remove(owner);
            }
        }
        if let Some(owner) = &new_owner {
            self.slices_by_service
                .entry(owner.clone())
                .or_default()
                .insert(key.clone());
        }
        new_owner.or(old_owner)
    }

    pub fn set_import(&mut self, key: &NamespacedName, import: Option<&ServiceImport>) -> bool {
        let previous = store(&mut self.imports, key, import);
        self.import_changes.update(key, previous.as_ref(), import)
    }

    pub fn set_secret(&mut self, key: &NamespacedName, secret: Option<&Secret>) -> bool {
        let previous = store(&mut self.secrets, key, secret);
        previous.as_ref() != secret
    }

    pub fn set_namespace(&mut self, name: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
        let previous = match labels {
            Some(l) => self.namespaces.insert(name.to_string(), l.clone()),
            None => self.namespaces.remove(name),
        };
        previous.as_ref() != labels
    }

    /// Fold pending deltas into the derived maps. Returns the rejections
    /// raised by services that changed.
    pub fn apply_pending(&mut self) -> Vec<Rejection> {
        let mut rejections = Vec::new();

        let service_changes = self.service_changes.checkout();
        for (key, change) in &service_changes {
            self.service_map.retain(|name, _| &name.service != key);
            if let Some(svc) = &change.current {
                for info in service_infos(svc, &mut rejections) {
                    self.service_map.insert(info.name.clone(), info);
                }
            }
        }

        let endpoints_changes = self.endpoints_changes.checkout();
        for (key, change) in &endpoints_changes {
            self.endpoints_map.retain(|name, _| &name.service != key);
            if let Some(eps) = &change.current {
                self.endpoints_map.extend(endpoint_infos(eps));
            }
        }

        let import_changes = self.import_changes.checkout();
        for (key, change) in &import_changes {
            self.imports_map.retain(|name, _| &name.service != key);
            if let Some(imp) = &change.current {
                self.imports_map.extend(import_endpoints(imp));
            }
        }

        let total = service_changes.len() + endpoints_changes.len() + import_changes.len();
        if total > 0 {
            debug!(
                "Applied {} service, {} endpoints and {} import change(s)",
                service_changes.len(),
                endpoints_changes.len(),
                import_changes.len()
            );
        }
        rejections
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            services: self.service_map.clone(),
            endpoints: self.endpoints_map.clone(),
            imports: self.imports_map.clone(),
        }
    }

    pub fn endpoints_of(&self, name: &ServicePortName) -> Option<&Vec<EndpointInfo>> {
        self.endpoints_map.get(name)
    }

    pub fn service(&self, key: &NamespacedName) -> Option<&Service> {
        self.services.get(key)
    }

    pub fn service_keys(&self) -> BTreeSet<NamespacedName> {
        self.services.keys().cloned().collect()
    }

    pub fn slices_of(&self, service: &NamespacedName) -> Vec<EndpointSlice> {
        self.slices_by_service
            .get(service)
            .into_iter()
            .flatten()
            .filter_map(|key| self.slices.get(key).cloned())
            .collect()
    }

    pub fn secrets(&self) -> &BTreeMap<NamespacedName, Secret> {
        &self.secrets
    }

    pub fn namespace_labels(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.namespaces
    }

    pub fn is_exported(&self, key: &NamespacedName) -> bool {
        self.services
            .get(key)
            .and_then(|s| s.metadata.annotation(CLUSTER_EXPORT))
            .is_some_and(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "yes" | "true" | "1" | "on"
                )
            })
    }

    /// Whether any service names `secret` for upstream TLS.
    pub fn references_secret(&self, secret: &NamespacedName) -> bool {
        self.services.values().any(|svc| {
            svc.metadata
                .annotation(UPSTREAM_SSL_SECRET)
                .and_then(|v| NamespacedName::parse(v, &svc.metadata.namespace))
                .is_some_and(|k| &k == secret)
        })
    }
}

impl IngressLookup for ServiceIndex {
    fn port_name(&self, service: &NamespacedName, number: i32) -> Option<String> {
        self.port_names.get(&(service.clone(), number)).cloned()
    }

    fn secret(&self, key: &NamespacedName) -> Option<&Secret> {
        self.secrets.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::annotations::SERVICE_NAME_LABEL;
    use pkg_types::ObjectMeta;
    use pkg_types::endpoint::{EndpointAddress, EndpointPort, EndpointSubset};
    use pkg_types::service::{IntOrString, ServicePort, ServiceSpec};

    fn make_service(name: &str, ports: &[(&str, i32)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            spec: ServiceSpec {
                cluster_ip: Some("10.96.0.1".to_string()),
                ports: ports
                    .iter()
                    .map(|(n, p)| ServicePort {
                        name: n.to_string(),
                        protocol: "TCP".to_string(),
                        port: *p,
                        target_port: Some(IntOrString::Int(8080)),
                        ..Default::default()
                    })
                    .collect(),
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
                        ..Default::default()
                    })
                    .collect(),
                ports: vec![EndpointPort {
                    name: "http".to_string(),
                    port: 8080,
                    protocol: "TCP".to_string(),
                }],
                ..Default::default()
            }],
        }
    }

    fn key(name: &str) -> NamespacedName {
        NamespacedName::new("default", name)
    }

    #[test]
    fn derived_maps_follow_pending_changes() {
        let mut index = ServiceIndex::default();
        assert!(index.set_service(&key("web"), Some(&make_service("web", &[("http", 80)]))));
        assert!(index.set_endpoints(&key("web"), Some(&make_endpoints("web", &["10.0.0.1"]))));
        assert!(index.snapshot().services.is_empty());

        assert!(index.apply_pending().is_empty());
        let name = ServicePortName::new(key("web"), Some("http".to_string()));
        let snapshot = index.snapshot();
        assert!(snapshot.services.contains_key(&name));
        assert_eq!(snapshot.endpoints[&name][0].address(), "10.0.0.1:8080");

        assert!(index.set_endpoints(&key("web"), None));
        index.apply_pending();
        assert!(index.endpoints_of(&name).is_none());
    }

    #[test]
    fn identical_update_is_not_a_change() {
        let mut index = ServiceIndex::default();
        let svc = make_service("web", &[("http", 80)]);
        assert!(index.set_service(&key("web"), Some(&svc)));
        assert!(!index.set_service(&key("web"), Some(&svc)));
    }

    #[test]
    fn port_numbers_resolve_to_names() {
        let mut index = ServiceIndex::default();
        index.set_service(&key("web"), Some(&make_service("web", &[("http", 80), ("", 81)])));
        assert_eq!(index.port_name(&key("web"), 80).as_deref(), Some("http"));
        assert_eq!(index.port_name(&key("web"), 81).as_deref(), Some(""));
        assert_eq!(index.port_name(&key("web"), 82), None);

        index.set_service(&key("web"), Some(&make_service("web", &[("grpc", 90)])));
        assert_eq!(index.port_name(&key("web"), 80), None);
        assert_eq!(index.port_name(&key("web"), 90).as_deref(), Some("grpc"));
    }

    #[test]
    fn slices_are_indexed_by_owner() {
        let mut index = ServiceIndex::default();
        let mut slice = EndpointSlice {
            metadata: ObjectMeta {
                name: "web-abc".to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        slice
            .metadata
            .labels
            .insert(SERVICE_NAME_LABEL.to_string(), "web".to_string());

        assert_eq!(index.set_slice(&key("web-abc"), Some(&slice)), Some(key("web")));
        assert_eq!(index.set_slice(&key("web-abc"), Some(&slice)), None);
        assert_eq!(index.slices_of(&key("web")).len(), 1);

        assert_eq!(index.set_slice(&key("web-abc"), None), Some(key("web")));
        assert!(index.slices_of(&key("web")).is_empty());
    }
}
