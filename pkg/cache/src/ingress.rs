use std::collections::BTreeMap;

use pkg_constants::annotations::UPSTREAM_SSL_SECRET;
use pkg_route::ingress::{IngressRouteInfo, IngressSnapshot, ingress_routes};
use pkg_route::{Rejection, ServicePortName};
use pkg_types::NamespacedName;
use pkg_types::ingress::{Ingress, IngressClass};
use tracing::debug;

use crate::services::ServiceIndex;
use crate::store;
use crate::tracker::ChangeTracker;

/// Ingresses of the served class and the routes derived from them.
#[derive(Debug)]
pub struct IngressIndex {
    class: String,
    ingresses: BTreeMap<NamespacedName, Ingress>,
    classes: BTreeMap<String, IngressClass>,
    changes: ChangeTracker<NamespacedName, Ingress>,
    /// Something routes depend on outside the ingresses changed.
    stale: bool,
    routes: BTreeMap<ServicePortName, IngressRouteInfo>,
}

impl IngressIndex {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ingresses: BTreeMap::new(),
            classes: BTreeMap::new(),
            changes: ChangeTracker::default(),
            stale: false,
            routes: BTreeMap::new(),
        }
    }

    fn default_class(&self) -> Option<&str> {
        self.classes
            .values()
            .find(|c| c.is_default())
            .map(|c| c.metadata.name.as_str())
    }

    /// An Ingress with no class is ours when our class is the default, or
    /// when there is no default class at all.
    pub fn is_accepted(&self, ingress: &Ingress) -> bool {
        match ingress.class() {
            Some(class) => class == self.class,
            None => self
                .default_class()
                .is_none_or(|default| default == self.class),
        }
    }

    pub fn set_ingress(&mut self, key: &NamespacedName, ingress: Option<&Ingress>) -> bool {
        let previous = store(&mut self.ingresses, key, ingress);
        let relevant = previous.as_ref().is_some_and(|i| self.is_accepted(i))
            || ingress.is_some_and(|i| self.is_accepted(i));
        self.changes.update(key, previous.as_ref(), ingress) && relevant
    }

    pub fn set_class(&mut self, name: &str, class: Option<&IngressClass>) -> bool {
        let previous = match class {
            Some(c) => self.classes.insert(name.to_string(), c.clone()),
            None => self.classes.remove(name),
        };
        let changed = previous.as_ref() != class;
        if changed {
            self.stale = true;
        }
        changed
    }

    /// Force a full rebuild at the next sync.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    fn accepted(&self) -> Vec<&Ingress> {
        let mut accepted: Vec<&Ingress> = self
            .ingresses
            .values()
            .filter(|i| self.is_accepted(i))
            .collect();
        accepted.sort_by(|a, b| {
            (a.metadata.creation_timestamp, a.metadata.key())
                .cmp(&(b.metadata.creation_timestamp, b.metadata.key()))
        });
        accepted
    }

    pub fn references_service(&self, service: &NamespacedName) -> bool {
        self.accepted().into_iter().any(|ingress| {
            ingress
                .spec
                .rules
                .iter()
                .filter_map(|r| r.http.as_ref())
                .flat_map(|http| &http.paths)
                .filter_map(|p| p.backend.service.as_ref())
                .any(|b| {
                    b.name == service.name && ingress.metadata.namespace == service.namespace
                })
        })
    }

    pub fn references_secret(&self, secret: &NamespacedName) -> bool {
        self.accepted().into_iter().any(|ingress| {
            let ns = &ingress.metadata.namespace;
            let tls = ingress
                .spec
                .tls
                .iter()
                .filter_map(|t| t.secret_name.as_deref())
                .any(|name| ns == &secret.namespace && name == secret.name);
            let upstream = ingress
                .metadata
                .annotation(UPSTREAM_SSL_SECRET)
                .and_then(|v| NamespacedName::parse(v, ns))
                .is_some_and(|k| &k == secret);
            tls || upstream
        })
    }

    /// Rebuild the route map when anything changed. Routes are taken from
    /// ingresses oldest first; the first rule for a backend wins.
    pub fn rebuild(&mut self, services: &ServiceIndex) -> Vec<Rejection> {
        let changes = self.changes.checkout();
        if changes.is_empty() && !self.stale {
            return Vec::new();
        }
        self.stale = false;

        let mut rejections = Vec::new();
        let mut routes: BTreeMap<ServicePortName, IngressRouteInfo> = BTreeMap::new();
        for ingress in self.accepted() {
            for route in ingress_routes(ingress, services, &mut rejections) {
                if let Some(existing) = routes.get(&route.backend) {
                    debug!(
                        "Ingress {} route {}{} for {} shadowed by {}",
                        route.ingress, route.host, route.path, route.backend, existing.ingress
                    );
                    continue;
                }
                routes.insert(route.backend.clone(), route);
            }
        }
        debug!(
            "Rebuilt {} ingress route(s) after {} ingress change(s)",
            routes.len(),
            changes.len()
        );
        self.routes = routes;
        rejections
    }

    pub fn snapshot(&self, services: &ServiceIndex) -> IngressSnapshot {
        let endpoints = self
            .routes
            .values()
            .filter_map(|route| {
                services
                    .endpoints_of(&route.endpoints_key)
                    .map(|eps| (route.endpoints_key.clone(), eps.clone()))
            })
            .collect();
        IngressSnapshot {
            routes: self.routes.clone(),
            endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pkg_constants::annotations::{DEFAULT_INGRESS_CLASS_ANNOTATION, INGRESS_CLASS_ANNOTATION};
    use pkg_types::ObjectMeta;
    use pkg_types::ingress::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
        IngressSpec, ServiceBackendPort,
    };

    fn make_ingress(name: &str, age: i64, class: Option<&str>, path: &str) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                creation_timestamp: Utc.timestamp_opt(1_700_000_000 + age, 0).single(),
                ..Default::default()
            },
            spec: IngressSpec {
                ingress_class_name: class.map(str::to_string),
                rules: vec![IngressRule {
                    host: "shop.example".to_string(),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: path.to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: "bookstore".to_string(),
                                    port: ServiceBackendPort {
                                        name: Some("http".to_string()),
                                        number: None,
                                    },
                                }),
                            },
                            ..Default::default()
                        }],
                    }),
                }],
                ..Default::default()
            },
        }
    }

    fn make_class(name: &str, default: bool) -> IngressClass {
        let mut class = IngressClass {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        if default {
            class
                .metadata
                .annotations
                .insert(DEFAULT_INGRESS_CLASS_ANNOTATION.to_string(), "true".to_string());
        }
        class
    }

    #[test]
    fn class_resolution() {
        let mut index = IngressIndex::new("fleetgate");
        let unclassed = make_ingress("a", 0, None, "/");
        assert!(index.is_accepted(&unclassed));
        assert!(index.is_accepted(&make_ingress("b", 0, Some("fleetgate"), "/")));
        assert!(!index.is_accepted(&make_ingress("c", 0, Some("nginx"), "/")));

        index.set_class("nginx", Some(&make_class("nginx", true)));
        assert!(!index.is_accepted(&unclassed));

        index.set_class("fleetgate", Some(&make_class("fleetgate", true)));
        index.set_class("nginx", Some(&make_class("nginx", false)));
        assert!(index.is_accepted(&unclassed));

        let mut annotated = make_ingress("d", 0, Some("nginx"), "/");
        annotated
            .metadata
            .annotations
            .insert(INGRESS_CLASS_ANNOTATION.to_string(), "fleetgate".to_string());
        assert!(index.is_accepted(&annotated));
    }

    #[test]
    fn foreign_ingress_is_not_material() {
        let mut index = IngressIndex::new("fleetgate");
        let key = NamespacedName::new("default", "x");
        assert!(!index.set_ingress(&key, Some(&make_ingress("x", 0, Some("nginx"), "/"))));
        assert!(index.set_ingress(&key, Some(&make_ingress("x", 0, Some("fleetgate"), "/"))));
        assert!(!index.set_ingress(&key, Some(&make_ingress("x", 0, Some("fleetgate"), "/"))));
    }

    #[test]
    fn oldest_rule_wins_per_backend() {
        let services = ServiceIndex::default();
        let mut index = IngressIndex::new("fleetgate");
        let newer = make_ingress("newer", 10, None, "/new");
        let older = make_ingress("older", 0, None, "/old");
        index.set_ingress(&newer.metadata.key(), Some(&newer));
        index.set_ingress(&older.metadata.key(), Some(&older));

        index.rebuild(&services);
        let snapshot = index.snapshot(&services);
        assert_eq!(snapshot.routes.len(), 1);
        let route = snapshot.routes.values().next().unwrap();
        assert_eq!(route.path, "/old/*");
        assert!(index.references_service(&NamespacedName::new("default", "bookstore")));
        assert!(!index.references_service(&NamespacedName::new("other", "bookstore")));
    }
}
