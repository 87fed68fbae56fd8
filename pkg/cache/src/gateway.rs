use std::collections::{BTreeMap, BTreeSet};

use pkg_constants::gateway::GATEWAY_API_GROUP;
use pkg_route::gateway::{
    GatewayRoute, GatewaySnapshot, RouteKind, ServiceEndpoints, is_ref_to_gateway,
};
use pkg_route::status::{
    ActiveGateway, ParentContext, gateway_accepted_condition, gateway_class_conditions,
    is_effective_class, route_parent_statuses, select_active,
};
use pkg_types::gateway::{Gateway, GatewayClass};
use pkg_types::route::{GRPCRoute, HTTPRoute, RouteBackends, RouteStatus, TCPRoute, TLSRoute};
use pkg_types::secret::Secret;
use pkg_types::{Kind, NamespacedName, Object};
use tracing::debug;

use crate::services::ServiceIndex;
use crate::status::{StatusPatch, StatusUpdate, conditions_current, parents_current};
use crate::store;

/// Objects whose status is written back by this controller. Status-only
/// updates do not count as changes.
trait Spec {
    fn same_spec(&self, other: &Self) -> bool;
}

macro_rules! impl_spec {
    ($($ty:ty),*) => {
        $(impl Spec for $ty {
            fn same_spec(&self, other: &Self) -> bool {
                self.spec == other.spec
                    && self.metadata.labels == other.metadata.labels
                    && self.metadata.annotations == other.metadata.annotations
                    && self.metadata.generation == other.metadata.generation
            }
        })*
    };
}

impl_spec!(Gateway, HTTPRoute, GRPCRoute, TLSRoute, TCPRoute);

fn spec_changed<T: Spec>(previous: Option<&T>, current: Option<&T>) -> bool {
    match (previous, current) {
        (Some(a), Some(b)) => !a.same_spec(b),
        (None, None) => false,
        _ => true,
    }
}

fn references_gateway<T: GatewayRoute>(route: &T, gateway: &NamespacedName) -> bool {
    let ns = &route.meta().namespace;
    route.parent_refs().iter().any(|p| {
        p.group
            .as_deref()
            .is_none_or(|g| g == GATEWAY_API_GROUP)
            && p.kind.as_deref().is_none_or(|k| k == "Gateway")
            && p.namespace.as_deref().unwrap_or(ns) == gateway.namespace
            && p.name == gateway.name
    })
}

fn backend_services<T: GatewayRoute + RouteBackends>(route: &T) -> Vec<NamespacedName> {
    let ns = &route.meta().namespace;
    route
        .backend_objects()
        .into_iter()
        .filter(|b| b.is_service())
        .map(|b| NamespacedName::new(b.namespace_or(ns), b.name.clone()))
        .collect()
}

fn attached<T: GatewayRoute + Clone>(
    routes: &BTreeMap<NamespacedName, T>,
    gateway: &Gateway,
) -> Vec<T> {
    routes
        .values()
        .filter(|r| {
            let ns = &r.meta().namespace;
            r.parent_refs()
                .iter()
                .any(|p| is_ref_to_gateway(p, ns, gateway))
        })
        .cloned()
        .collect()
}

/// Gateway API objects and the acceptance state derived from them.
#[derive(Debug)]
pub struct GatewayIndex {
    controller_name: String,
    classes: BTreeMap<String, GatewayClass>,
    gateways: BTreeMap<NamespacedName, Gateway>,
    http_routes: BTreeMap<NamespacedName, HTTPRoute>,
    grpc_routes: BTreeMap<NamespacedName, GRPCRoute>,
    tls_routes: BTreeMap<NamespacedName, TLSRoute>,
    tcp_routes: BTreeMap<NamespacedName, TCPRoute>,
    /// Set by any change since the last build.
    changed: bool,
}

impl GatewayIndex {
    pub fn new(controller_name: impl Into<String>) -> Self {
        Self {
            controller_name: controller_name.into(),
            classes: BTreeMap::new(),
            gateways: BTreeMap::new(),
            http_routes: BTreeMap::new(),
            grpc_routes: BTreeMap::new(),
            tls_routes: BTreeMap::new(),
            tcp_routes: BTreeMap::new(),
            changed: false,
        }
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    /// The class gateways are served for: owned by this controller and
    /// marked accepted and active.
    pub fn effective_class(&self) -> Option<&GatewayClass> {
        self.classes
            .values()
            .filter(|c| is_effective_class(c, &self.controller_name))
            .min_by(|a, b| {
                (a.metadata.creation_timestamp, &a.metadata.name)
                    .cmp(&(b.metadata.creation_timestamp, &b.metadata.name))
            })
    }

    fn is_managed(&self, gateway: &Gateway) -> bool {
        self.effective_class()
            .is_some_and(|c| c.metadata.name == gateway.spec.gateway_class_name)
    }

    pub fn managed_keys(&self) -> BTreeSet<NamespacedName> {
        self.gateways
            .values()
            .filter(|g| self.is_managed(g))
            .map(|g| g.metadata.key())
            .collect()
    }

    /// Class status decides which class is effective, so status changes
    /// of our own classes count.
    pub fn set_class(&mut self, name: &str, class: Option<&GatewayClass>) -> bool {
        let previous = match class {
            Some(c) => self.classes.insert(name.to_string(), c.clone()),
            None => self.classes.remove(name),
        };
        if previous.as_ref() == class {
            return false;
        }
        let ours = previous
            .iter()
            .chain(class)
            .any(|c| c.spec.controller_name == self.controller_name);
        self.changed = true;
        ours
    }

    pub fn set_gateway(&mut self, key: &NamespacedName, gateway: Option<&Gateway>) -> bool {
        let previous = store(&mut self.gateways, key, gateway);
        if !spec_changed(previous.as_ref(), gateway) {
            return false;
        }
        let managed = previous.iter().chain(gateway).any(|g| self.is_managed(g));
        self.changed = true;
        managed
    }

    pub fn set_route(&mut self, kind: Kind, key: &NamespacedName, route: Option<&Object>) -> bool {
        let managed = self.managed_keys();
        let change = match kind {
            Kind::HTTPRoute => route_change(
                &mut self.http_routes,
                key,
                route.and_then(|o| match o {
                    Object::HTTPRoute(r) => Some(r),
                    _ => None,
                }),
                &managed,
            ),
            Kind::GRPCRoute => route_change(
                &mut self.grpc_routes,
                key,
                route.and_then(|o| match o {
                    Object::GRPCRoute(r) => Some(r),
                    _ => None,
                }),
                &managed,
            ),
            Kind::TLSRoute => route_change(
                &mut self.tls_routes,
                key,
                route.and_then(|o| match o {
                    Object::TLSRoute(r) => Some(r),
                    _ => None,
                }),
                &managed,
            ),
            Kind::TCPRoute => route_change(
                &mut self.tcp_routes,
                key,
                route.and_then(|o| match o {
                    Object::TCPRoute(r) => Some(r),
                    _ => None,
                }),
                &managed,
            ),
            _ => None,
        };
        let Some(relevant) = change else {
            return false;
        };
        self.changed = true;
        relevant
    }

    pub fn has_routes(&self) -> bool {
        !(self.http_routes.is_empty()
            && self.grpc_routes.is_empty()
            && self.tls_routes.is_empty()
            && self.tcp_routes.is_empty())
    }

    /// Whether any route names `service` as a backend.
    pub fn references_service(&self, service: &NamespacedName) -> bool {
        self.http_routes.values().any(|r| backend_services(r).contains(service))
            || self.grpc_routes.values().any(|r| backend_services(r).contains(service))
            || self.tls_routes.values().any(|r| backend_services(r).contains(service))
            || self.tcp_routes.values().any(|r| backend_services(r).contains(service))
    }

    /// Whether a managed gateway presents `secret` on a listener.
    pub fn references_secret(&self, secret: &NamespacedName) -> bool {
        self.gateways
            .values()
            .filter(|g| self.is_managed(g))
            .any(|g| {
                g.spec
                    .listeners
                    .iter()
                    .filter_map(|l| l.tls.as_ref())
                    .flat_map(|tls| &tls.certificate_refs)
                    .any(|r| &r.key(&g.metadata.namespace) == secret)
            })
    }

    /// Whether anything changed since the last call.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// The active gateway of every namespace.
    pub fn active(
        &self,
        secrets: &BTreeMap<NamespacedName, Secret>,
    ) -> BTreeMap<String, ActiveGateway> {
        let mut by_ns: BTreeMap<&str, Vec<&Gateway>> = BTreeMap::new();
        for gateway in self.gateways.values().filter(|g| self.is_managed(g)) {
            by_ns
                .entry(gateway.metadata.namespace.as_str())
                .or_default()
                .push(gateway);
        }
        by_ns
            .into_iter()
            .filter_map(|(ns, gateways)| {
                select_active(gateways)
                    .map(|g| (ns.to_string(), ActiveGateway::new(g.clone(), secrets)))
            })
            .collect()
    }

    /// One snapshot per active gateway, keyed by namespace.
    pub fn snapshots(
        &self,
        active: &BTreeMap<String, ActiveGateway>,
        services: &ServiceIndex,
        global_certificate: Option<&Secret>,
    ) -> BTreeMap<String, GatewaySnapshot> {
        active
            .iter()
            .map(|(ns, active)| {
                let gateway = &active.gateway;
                let http_routes = attached(&self.http_routes, gateway);
                let grpc_routes = attached(&self.grpc_routes, gateway);
                let tls_routes = attached(&self.tls_routes, gateway);
                let tcp_routes = attached(&self.tcp_routes, gateway);

                let mut backends = BTreeSet::new();
                backends.extend(http_routes.iter().flat_map(backend_services));
                backends.extend(grpc_routes.iter().flat_map(backend_services));
                backends.extend(tls_routes.iter().flat_map(backend_services));
                backends.extend(tcp_routes.iter().flat_map(backend_services));
                let service_endpoints = backends
                    .into_iter()
                    .filter_map(|key| {
                        let service = services.service(&key)?.clone();
                        let slices = services.slices_of(&key);
                        Some((key, ServiceEndpoints { service, slices }))
                    })
                    .collect();

                let snapshot = GatewaySnapshot {
                    gateway: gateway.clone(),
                    http_routes,
                    grpc_routes,
                    tls_routes,
                    tcp_routes,
                    services: service_endpoints,
                    secrets: services.secrets().clone(),
                    namespace_labels: services.namespace_labels().clone(),
                    global_certificate: global_certificate.cloned(),
                };
                (ns.clone(), snapshot)
            })
            .collect()
    }

    /// Status every class, managed gateway and route should carry, minus
    /// what they already carry.
    pub fn statuses(
        &self,
        active: &BTreeMap<String, ActiveGateway>,
        services: &ServiceIndex,
    ) -> Vec<StatusUpdate> {
        let mut updates = Vec::new();

        let classes: Vec<GatewayClass> = self.classes.values().cloned().collect();
        for (name, conditions) in gateway_class_conditions(&classes, &self.controller_name) {
            let Some(class) = self.classes.get(&name) else {
                continue;
            };
            if !conditions_current(&class.status.conditions, &conditions) {
                updates.push(StatusUpdate {
                    kind: Kind::GatewayClass,
                    key: NamespacedName::new("", name),
                    patch: StatusPatch::Conditions(conditions),
                });
            }
        }

        for gateway in self.gateways.values().filter(|g| self.is_managed(g)) {
            let is_active = active
                .get(&gateway.metadata.namespace)
                .is_some_and(|a| a.gateway.metadata.name == gateway.metadata.name);
            let condition = gateway_accepted_condition(is_active, gateway.metadata.generation);
            if !conditions_current(&gateway.status.conditions, std::slice::from_ref(&condition)) {
                updates.push(StatusUpdate {
                    kind: Kind::Gateway,
                    key: gateway.metadata.key(),
                    patch: StatusPatch::Conditions(vec![condition]),
                });
            }
        }

        let managed = self.managed_keys();
        let service_keys = services.service_keys();
        let ctx = ParentContext {
            controller_name: &self.controller_name,
            active,
            managed: &managed,
            namespace_labels: services.namespace_labels(),
            services: &service_keys,
        };
        route_statuses(&ctx, &self.http_routes, |r| &r.status, &mut updates);
        route_statuses(&ctx, &self.grpc_routes, |r| &r.status, &mut updates);
        route_statuses(&ctx, &self.tls_routes, |r| &r.status, &mut updates);
        route_statuses(&ctx, &self.tcp_routes, |r| &r.status, &mut updates);

        if !updates.is_empty() {
            debug!("{} status update(s) computed", updates.len());
        }
        updates
    }
}

/// Store a route. When its spec changed, returns the previous version and
/// whether either version attaches to a managed gateway.
fn route_change<T: GatewayRoute + Spec + Clone>(
    routes: &mut BTreeMap<NamespacedName, T>,
    key: &NamespacedName,
    route: Option<&T>,
    managed: &BTreeSet<NamespacedName>,
) -> Option<bool> {
    let previous = store(routes, key, route);
    if !spec_changed(previous.as_ref(), route) {
        return None;
    }
    let relevant = previous
        .iter()
        .chain(route)
        .any(|r| managed.iter().any(|g| references_gateway(r, g)));
    Some(relevant)
}

fn kind_of(kind: RouteKind) -> Kind {
    match kind {
        RouteKind::HTTPRoute => Kind::HTTPRoute,
        RouteKind::GRPCRoute => Kind::GRPCRoute,
        RouteKind::TLSRoute => Kind::TLSRoute,
        RouteKind::TCPRoute => Kind::TCPRoute,
    }
}

fn route_statuses<T: GatewayRoute + RouteBackends>(
    ctx: &ParentContext<'_>,
    routes: &BTreeMap<NamespacedName, T>,
    status_of: impl Fn(&T) -> &RouteStatus,
    updates: &mut Vec<StatusUpdate>,
) {
    for (key, route) in routes {
        let parents = route_parent_statuses(ctx, route);
        let status = status_of(route);
        if parents_current(status, ctx.controller_name, &parents) {
            continue;
        }
        updates.push(StatusUpdate {
            kind: kind_of(T::KIND),
            key: key.clone(),
            patch: StatusPatch::Parents {
                controller_name: ctx.controller_name.to_string(),
                parents,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::gateway::DEFAULT_CONTROLLER_NAME;
    use pkg_types::ConditionStatus;

    const CLASS: &str = r#"
kind: GatewayClass
metadata:
  name: fleetgate
  creationTimestamp: 2024-01-01T00:00:00Z
spec:
  controllerName: fleetgate.io/gateway-controller
status:
  conditions:
    - type: Accepted
      status: "True"
    - type: Active
      status: "True"
"#;

    fn make_class() -> GatewayClass {
        serde_yaml::from_str(CLASS).unwrap()
    }

    fn make_gateway(name: &str, created: &str) -> Gateway {
        let yaml = format!(
            r#"
kind: Gateway
metadata:
  name: {name}
  namespace: ns1
  creationTimestamp: {created}
spec:
  gatewayClassName: fleetgate
  listeners:
    - name: http
      port: 80
      protocol: HTTP
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn make_route(gateway: &str) -> Object {
        let yaml = format!(
            r#"
kind: HTTPRoute
metadata:
  name: web
  namespace: ns1
spec:
  parentRefs:
    - name: {gateway}
  rules:
    - backendRefs:
        - name: api
          port: 8080
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn make_index() -> GatewayIndex {
        let mut index = GatewayIndex::new(DEFAULT_CONTROLLER_NAME);
        assert!(index.set_class("fleetgate", Some(&make_class())));
        index
    }

    #[test]
    fn oldest_gateway_in_namespace_is_active() {
        let mut index = make_index();
        let newer = make_gateway("a", "2024-02-01T00:00:00Z");
        let older = make_gateway("b", "2024-01-15T00:00:00Z");
        assert!(index.set_gateway(&newer.metadata.key(), Some(&newer)));
        assert!(index.set_gateway(&older.metadata.key(), Some(&older)));

        let active = index.active(&BTreeMap::new());
        assert_eq!(active.len(), 1);
        assert_eq!(active["ns1"].gateway.metadata.name, "b");

        let services = ServiceIndex::default();
        let accepted: BTreeMap<String, ConditionStatus> = index
            .statuses(&active, &services)
            .into_iter()
            .filter(|u| u.kind == Kind::Gateway)
            .filter_map(|u| match u.patch {
                StatusPatch::Conditions(c) => Some((u.key.name, c[0].status)),
                _ => None,
            })
            .collect();
        assert_eq!(accepted["a"], ConditionStatus::False);
        assert_eq!(accepted["b"], ConditionStatus::True);
    }

    #[test]
    fn status_only_update_is_not_material() {
        let mut index = make_index();
        let gateway = make_gateway("gw", "2024-01-15T00:00:00Z");
        let key = gateway.metadata.key();
        assert!(index.set_gateway(&key, Some(&gateway)));

        let mut updated = gateway.clone();
        updated
            .status
            .conditions
            .push(gateway_accepted_condition(true, 0));
        assert!(!index.set_gateway(&key, Some(&updated)));

        updated.spec.listeners[0].port = 8080;
        assert!(index.set_gateway(&key, Some(&updated)));
    }

    #[test]
    fn changed_flag_is_cleared_on_take() {
        let mut index = make_index();
        assert!(index.take_changed());
        assert!(!index.take_changed());

        let gateway = make_gateway("gw", "2024-01-15T00:00:00Z");
        index.set_gateway(&gateway.metadata.key(), Some(&gateway));
        assert!(index.take_changed());
        index.set_gateway(&gateway.metadata.key(), Some(&gateway));
        assert!(!index.take_changed());
    }

    #[test]
    fn routes_matter_only_for_managed_gateways() {
        let mut index = make_index();
        let gateway = make_gateway("gw", "2024-01-15T00:00:00Z");
        index.set_gateway(&gateway.metadata.key(), Some(&gateway));

        let key = NamespacedName::new("ns1", "web");
        assert!(!index.set_route(Kind::HTTPRoute, &key, Some(&make_route("other"))));
        assert!(index.set_route(Kind::HTTPRoute, &key, Some(&make_route("gw"))));
        assert!(index.references_service(&NamespacedName::new("ns1", "api")));
        assert!(index.set_route(Kind::HTTPRoute, &key, None));
        assert!(!index.has_routes());
    }

    #[test]
    fn gateways_of_foreign_classes_are_ignored() {
        let mut index = GatewayIndex::new("example.com/other");
        assert!(!index.set_class("fleetgate", Some(&make_class())));
        let gateway = make_gateway("gw", "2024-01-15T00:00:00Z");
        assert!(!index.set_gateway(&gateway.metadata.key(), Some(&gateway)));
        assert!(index.active(&BTreeMap::new()).is_empty());
    }
}
