//! Gateway API objects → `ConfigSpec`.
//!
//! One active Gateway per namespace yields one document. Listeners are
//! validated first; routes then attach in age order (HTTP, GRPC, TLS, TCP)
//! and the services they reference are resolved last, so every serviceKey
//! in a rule has a `services` entry.

use anyhow::{Context, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::debug;

use pkg_constants::annotations::{
    CIRCUIT_BREAKER, RETRY_BACKOFF_BASE_MS, RETRY_MAX, RETRY_ON, RETRY_PER_TRY_TIMEOUT_MS,
    TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, UPSTREAM_SSL_SECRET,
};
use pkg_constants::gateway::{
    DEFAULT_PASSTHROUGH_PORT, GATEWAY_API_GROUP, REASON_NO_MATCHING_PARENT,
    REASON_NOT_ALLOWED_BY_LISTENERS,
};
use pkg_pki::CertificateInfo;
use pkg_types::endpoint::{AddressType, EndpointSlice};
use pkg_types::gateway::{FromNamespaces, Gateway, ProtocolType, TLSModeType};
use pkg_types::route::{
    BackendRef, GRPCRoute, GRPCRouteRule, HTTPBackendRef, HTTPPathMatch, HTTPRoute,
    HTTPRouteFilter, HTTPRouteFilterType, HTTPRouteRule, L4RouteRule, MatchType, ParentReference,
    PathMatchType, TCPRoute, TLSRoute, ValueMatch, filters_by_type,
};
use pkg_types::secret::Secret;
use pkg_types::service::{Service, ServicePort, ServiceType};
use pkg_types::{NamespacedName, ObjectMeta};

use crate::hostname::valid_hostnames;
use crate::model::{
    Certificate, CircuitBreaker, ConfigSpec, Endpoint, GrpcMethod, L7RouteSpec, Listener,
    PathMatch, PathMatchKind, Protocol, RetryPolicy, RouteRule, ServiceConfig, ServicePortName,
    TlsConfig, TlsMode, TrafficMatch, UpstreamCert, ValueMatchKind, ValueMatchSet,
};
use crate::rejection::{Rejection, reason};

/// Route kinds that attach to Gateway listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    HTTPRoute,
    GRPCRoute,
    TLSRoute,
    TCPRoute,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::HTTPRoute => "HTTPRoute",
            RouteKind::GRPCRoute => "GRPCRoute",
            RouteKind::TLSRoute => "TLSRoute",
            RouteKind::TCPRoute => "TCPRoute",
        }
    }

    /// Whether the kind carries hostnames that must intersect a listener.
    pub fn has_hostnames(&self) -> bool {
        !matches!(self, RouteKind::TCPRoute)
    }
}

/// Common view over the four route kinds.
pub trait GatewayRoute {
    const KIND: RouteKind;

    fn meta(&self) -> &ObjectMeta;
    fn parent_refs(&self) -> &[ParentReference];
    fn hostnames(&self) -> &[String];

    fn object(&self) -> String {
        format!("{}/{}", Self::KIND.as_str(), self.meta().key())
    }
}

impl GatewayRoute for HTTPRoute {
    const KIND: RouteKind = RouteKind::HTTPRoute;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn parent_refs(&self) -> &[ParentReference] {
        &self.spec.parent_refs
    }

    fn hostnames(&self) -> &[String] {
        &self.spec.hostnames
    }
}

impl GatewayRoute for GRPCRoute {
    const KIND: RouteKind = RouteKind::GRPCRoute;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn parent_refs(&self) -> &[ParentReference] {
        &self.spec.parent_refs
    }

    fn hostnames(&self) -> &[String] {
        &self.spec.hostnames
    }
}

impl GatewayRoute for TLSRoute {
    const KIND: RouteKind = RouteKind::TLSRoute;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn parent_refs(&self) -> &[ParentReference] {
        &self.spec.parent_refs
    }

    fn hostnames(&self) -> &[String] {
        &self.spec.hostnames
    }
}

impl GatewayRoute for TCPRoute {
    const KIND: RouteKind = RouteKind::TCPRoute;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn parent_refs(&self) -> &[ParentReference] {
        &self.spec.parent_refs
    }

    fn hostnames(&self) -> &[String] {
        &[]
    }
}

/// A Service and the EndpointSlices that belong to it.
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoints {
    pub service: Service,
    pub slices: Vec<EndpointSlice>,
}

/// Everything the config of one active Gateway depends on.
#[derive(Debug, Clone, Default)]
pub struct GatewaySnapshot {
    pub gateway: Gateway,
    pub http_routes: Vec<HTTPRoute>,
    pub grpc_routes: Vec<GRPCRoute>,
    pub tls_routes: Vec<TLSRoute>,
    pub tcp_routes: Vec<TCPRoute>,
    pub services: BTreeMap<NamespacedName, ServiceEndpoints>,
    pub secrets: BTreeMap<NamespacedName, Secret>,
    /// Labels of watched namespaces, for `allowedRoutes` selectors.
    pub namespace_labels: BTreeMap<String, BTreeMap<String, String>>,
    pub global_certificate: Option<Secret>,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub spec: ConfigSpec,
    pub rejections: Vec<Rejection>,
}

/// A listener that passed validation, with its parsed certificates.
#[derive(Debug, Clone)]
pub struct ValidListener {
    pub listener: pkg_types::gateway::Listener,
    pub protocol: Protocol,
    pub port: u16,
    pub mtls: bool,
    pub certificates: Vec<Certificate>,
    pub certificate_infos: Vec<CertificateInfo>,
}

impl ValidListener {
    pub fn hostname(&self) -> Option<&str> {
        self.listener.hostname.as_deref().filter(|h| !h.is_empty())
    }

    pub fn to_model(&self) -> Listener {
        let tls = match self.protocol {
            Protocol::HTTPS | Protocol::TlsTerminate => Some(TlsConfig {
                mode: TlsMode::Terminate,
                mtls: self.mtls,
                certificates: self.certificates.clone(),
            }),
            Protocol::TlsPassthrough => Some(TlsConfig {
                mode: TlsMode::Passthrough,
                mtls: false,
                certificates: Vec::new(),
            }),
            _ => None,
        };
        Listener {
            protocol: self.protocol,
            port: self.port,
            tls,
        }
    }

    fn default_kinds(&self) -> &'static [RouteKind] {
        match self.protocol {
            Protocol::HTTP | Protocol::HTTPS => &[RouteKind::HTTPRoute, RouteKind::GRPCRoute],
            Protocol::TlsPassthrough => &[RouteKind::TLSRoute],
            Protocol::TlsTerminate | Protocol::TCP => &[RouteKind::TCPRoute],
            Protocol::UDP => &[],
        }
    }

    pub fn allows_kind(&self, kind: RouteKind) -> bool {
        let kinds = self
            .listener
            .allowed_routes
            .as_ref()
            .map(|a| a.kinds.as_slice())
            .unwrap_or_default();
        if kinds.is_empty() {
            return self.default_kinds().contains(&kind);
        }
        kinds.iter().any(|k| {
            k.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == GATEWAY_API_GROUP
                && k.kind == kind.as_str()
        })
    }

    pub fn allows_namespace(
        &self,
        gateway_ns: &str,
        route_ns: &str,
        namespace_labels: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> bool {
        let namespaces = self
            .listener
            .allowed_routes
            .as_ref()
            .and_then(|a| a.namespaces.as_ref());
        match namespaces.and_then(|n| n.from).unwrap_or_default() {
            FromNamespaces::Same => route_ns == gateway_ns,
            FromNamespaces::All => true,
            FromNamespaces::Selector => match namespaces.and_then(|n| n.selector.as_ref()) {
                Some(selector) => namespace_labels
                    .get(route_ns)
                    .is_some_and(|labels| selector.matches(labels)),
                None => false,
            },
        }
    }

    /// Whether a terminating listener holds a certificate for `host`.
    /// The catch-all host is served by the first certificate.
    pub fn covers(&self, host: &str) -> bool {
        if host == "*" {
            return !self.certificate_infos.is_empty();
        }
        self.certificate_infos.iter().any(|info| info.covers(host))
    }
}

/// Certificate model and parsed facts of a TLS secret.
pub fn certificate_from_secret(secret: &Secret) -> anyhow::Result<(Certificate, CertificateInfo)> {
    let key = secret.metadata.key();
    let Some(chain) = secret.tls_cert() else {
        bail!("secret {} has no {}", key, TLS_CERT_KEY);
    };
    let Some(private_key) = secret.tls_key() else {
        bail!("secret {} has no {}", key, TLS_PRIVATE_KEY_KEY);
    };
    let info = CertificateInfo::from_pem(chain).with_context(|| format!("secret {}", key))?;
    let cert = Certificate {
        common_name: info.common_name.clone(),
        serial_number: info.serial_number.clone(),
        not_after: info.not_after,
        cert_chain: chain.to_string(),
        private_key: private_key.to_string(),
        issuing_ca: secret.ca_cert().unwrap_or_default().to_string(),
    };
    Ok((cert, info))
}

/// Validate the listeners of a Gateway. Invalid ones are rejected; on a
/// duplicate port the first listener keeps it.
pub fn validate_listeners(
    gateway: &Gateway,
    secrets: &BTreeMap<NamespacedName, Secret>,
) -> (Vec<ValidListener>, Vec<Rejection>) {
    let object = format!("Gateway/{}", gateway.metadata.key());
    let mut valid = Vec::new();
    let mut rejections = Vec::new();
    let mut ports = BTreeSet::new();

    for listener in &gateway.spec.listeners {
        let reject = |reason: &'static str, message: String| {
            Rejection::new(
                object.clone(),
                reason,
                format!("listener {}: {}", listener.name, message),
            )
        };

        let Ok(port) = u16::try_from(listener.port) else {
            rejections.push(reject(reason::INVALID_LISTENER, format!("invalid port {}", listener.port)));
            continue;
        };
        if port == 0 {
            rejections.push(reject(reason::INVALID_LISTENER, "invalid port 0".to_string()));
            continue;
        }
        if let Some(host) = listener.hostname.as_deref().filter(|h| !h.is_empty())
            && !crate::hostname::is_valid(host)
        {
            rejections.push(reject(reason::INVALID_HOSTNAME, format!("invalid hostname '{}'", host)));
            continue;
        }
        if !ports.insert(port) {
            rejections.push(reject(reason::DUPLICATE_PORT, format!("port {} is already in use", port)));
            continue;
        }

        let mode = listener.tls.as_ref().map(|t| t.mode());
        let protocol = match (listener.protocol, mode) {
            (ProtocolType::HTTP, _) => Protocol::HTTP,
            (ProtocolType::HTTPS, Some(TLSModeType::Terminate)) => Protocol::HTTPS,
            (ProtocolType::HTTPS, _) => {
                rejections.push(reject(
                    reason::INVALID_LISTENER,
                    "HTTPS requires TLS mode Terminate".to_string(),
                ));
                ports.remove(&port);
                continue;
            }
            (ProtocolType::TLS, Some(TLSModeType::Terminate)) => Protocol::TlsTerminate,
            (ProtocolType::TLS, _) => Protocol::TlsPassthrough,
            (ProtocolType::TCP, _) => Protocol::TCP,
            (ProtocolType::UDP, _) => Protocol::UDP,
        };

        let mut certificates = Vec::new();
        let mut certificate_infos = Vec::new();
        let mut mtls = false;
        if matches!(protocol, Protocol::HTTPS | Protocol::TlsTerminate) {
            let refs = listener
                .tls
                .as_ref()
                .map(|t| t.certificate_refs.as_slice())
                .unwrap_or_default();
            for cert_ref in refs {
                if !cert_ref.is_secret() {
                    rejections.push(reject(
                        reason::INVALID_CERTIFICATE,
                        format!("certificate ref {} is not a Secret", cert_ref.name),
                    ));
                    continue;
                }
                let key = cert_ref.key(&gateway.metadata.namespace);
                let Some(secret) = secrets.get(&key) else {
                    rejections.push(reject(
                        reason::CERTIFICATE_MISSING,
                        format!("secret {} not found", key),
                    ));
                    continue;
                };
                match certificate_from_secret(secret) {
                    Ok((cert, info)) => {
                        mtls |= !cert.issuing_ca.is_empty();
                        certificates.push(cert);
                        certificate_infos.push(info);
                    }
                    Err(e) => rejections.push(reject(reason::INVALID_CERTIFICATE, format!("{:#}", e))),
                }
            }
            if certificates.is_empty() {
                rejections.push(reject(
                    reason::INVALID_LISTENER,
                    "no usable certificate for TLS termination".to_string(),
                ));
                ports.remove(&port);
                continue;
            }
        }

        valid.push(ValidListener {
            listener: listener.clone(),
            protocol,
            port,
            mtls,
            certificates,
            certificate_infos,
        });
    }
    (valid, rejections)
}

/// Whether `parent` names `gateway`. Group, kind and namespace default to
/// the Gateway API group, `Gateway` and the route's namespace.
pub fn is_ref_to_gateway(parent: &ParentReference, route_ns: &str, gateway: &Gateway) -> bool {
    parent.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == GATEWAY_API_GROUP
        && parent.kind.as_deref().unwrap_or("Gateway") == "Gateway"
        && parent.namespace.as_deref().unwrap_or(route_ns) == gateway.metadata.namespace
        && parent.name == gateway.metadata.name
}

/// Indices of the listeners a parentRef attaches to, or the reason it
/// attaches to none.
pub fn allowed_listeners(
    parent: &ParentReference,
    kind: RouteKind,
    route_ns: &str,
    gateway_ns: &str,
    listeners: &[ValidListener],
    namespace_labels: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Vec<usize>, &'static str> {
    let selected: Vec<usize> = listeners
        .iter()
        .enumerate()
        .filter(|(_, l)| {
            parent
                .section_name
                .as_deref()
                .is_none_or(|section| section == l.listener.name)
                && parent.port.is_none_or(|port| port == l.listener.port)
        })
        .map(|(i, _)| i)
        .collect();
    if selected.is_empty() {
        return Err(REASON_NO_MATCHING_PARENT);
    }
    let allowed: Vec<usize> = selected
        .into_iter()
        .filter(|&i| {
            let l = &listeners[i];
            l.allows_kind(kind) && l.allows_namespace(gateway_ns, route_ns, namespace_labels)
        })
        .collect();
    if allowed.is_empty() {
        return Err(REASON_NOT_ALLOWED_BY_LISTENERS);
    }
    Ok(allowed)
}

/// Routes ordered oldest first, ties broken by namespace then name.
pub fn by_age<T: GatewayRoute>(routes: &[T]) -> Vec<&T> {
    let mut sorted: Vec<&T> = routes.iter().collect();
    sorted.sort_by(|a, b| {
        let (a, b) = (a.meta(), b.meta());
        (a.creation_timestamp, &a.namespace, &a.name).cmp(&(
            b.creation_timestamp,
            &b.namespace,
            &b.name,
        ))
    });
    sorted
}

/// Backend weight: unset means 1, negatives clamp to 0.
fn backend_weight(weight: Option<i32>) -> i32 {
    weight.unwrap_or(1).max(0)
}

fn value_kind(match_type: MatchType) -> ValueMatchKind {
    match match_type {
        MatchType::Exact => ValueMatchKind::Exact,
        MatchType::RegularExpression => ValueMatchKind::Regex,
    }
}

fn value_match_sets(values: &[ValueMatch]) -> Vec<ValueMatchSet> {
    let mut exact = BTreeMap::new();
    let mut regex = BTreeMap::new();
    for value in values {
        let set = match value_kind(value.type_) {
            ValueMatchKind::Exact => &mut exact,
            ValueMatchKind::Regex => &mut regex,
        };
        set.insert(value.name.clone(), value.value.clone());
    }
    [(ValueMatchKind::Exact, exact), (ValueMatchKind::Regex, regex)]
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(match_type, values)| ValueMatchSet { match_type, values })
        .collect()
}

fn path_match(path: Option<&HTTPPathMatch>) -> PathMatch {
    match path {
        Some(p) => PathMatch {
            match_type: match p.type_ {
                PathMatchType::Exact => PathMatchKind::Exact,
                PathMatchType::PathPrefix => PathMatchKind::Prefix,
                PathMatchType::RegularExpression => PathMatchKind::Regex,
            },
            path: p.value.clone(),
        },
        None => PathMatch {
            match_type: PathMatchKind::Prefix,
            path: "/".to_string(),
        },
    }
}

fn http_matches(rule: &HTTPRouteRule, backends: BTreeMap<String, i32>) -> Vec<TrafficMatch> {
    if rule.matches.is_empty() {
        return vec![TrafficMatch {
            path: Some(path_match(None)),
            backend_service: backends,
            ..Default::default()
        }];
    }
    rule.matches
        .iter()
        .map(|m| TrafficMatch {
            path: Some(path_match(m.path.as_ref())),
            methods: m.method.iter().cloned().collect(),
            headers: value_match_sets(&m.headers),
            query_params: value_match_sets(&m.query_params),
            grpc_method: None,
            backend_service: backends.clone(),
        })
        .collect()
}

fn grpc_matches(rule: &GRPCRouteRule, backends: BTreeMap<String, i32>) -> Vec<TrafficMatch> {
    if rule.matches.is_empty() {
        return vec![TrafficMatch {
            backend_service: backends,
            ..Default::default()
        }];
    }
    rule.matches
        .iter()
        .map(|m| TrafficMatch {
            headers: value_match_sets(&m.headers),
            grpc_method: m.method.as_ref().map(|method| GrpcMethod {
                match_type: value_kind(method.type_),
                service: method.service.clone(),
                method: method.method.clone(),
            }),
            backend_service: backends.clone(),
            ..Default::default()
        })
        .collect()
}

/// A Service port referenced by an attached route.
struct ServiceRef {
    service: NamespacedName,
    port: Option<i32>,
    filters: BTreeMap<HTTPRouteFilterType, HTTPRouteFilter>,
    object: String,
}

struct Builder<'a> {
    snapshot: &'a GatewaySnapshot,
    listeners: Vec<ValidListener>,
    spec: ConfigSpec,
    refs: BTreeMap<String, ServiceRef>,
    tcp_owners: BTreeMap<u16, String>,
    rejections: Vec<Rejection>,
}

impl<'a> Builder<'a> {
    fn new(snapshot: &'a GatewaySnapshot) -> Self {
        let (listeners, rejections) = validate_listeners(&snapshot.gateway, &snapshot.secrets);
        Self {
            snapshot,
            spec: ConfigSpec {
                listeners: listeners.iter().map(ValidListener::to_model).collect(),
                ..Default::default()
            },
            listeners,
            refs: BTreeMap::new(),
            tcp_owners: BTreeMap::new(),
            rejections,
        }
    }

    /// Listeners `route` attaches to through any of its parentRefs.
    fn attached<T: GatewayRoute>(&self, route: &T) -> Vec<ValidListener> {
        let gateway = &self.snapshot.gateway;
        let route_ns = &route.meta().namespace;
        let mut indices = BTreeSet::new();
        for parent in route.parent_refs() {
            if !is_ref_to_gateway(parent, route_ns, gateway) {
                continue;
            }
            if let Ok(found) = allowed_listeners(
                parent,
                T::KIND,
                route_ns,
                &gateway.metadata.namespace,
                &self.listeners,
                &self.snapshot.namespace_labels,
            ) {
                indices.extend(found);
            }
        }
        indices.into_iter().map(|i| self.listeners[i].clone()).collect()
    }

    fn add_backend(
        &mut self,
        object: &str,
        route_ns: &str,
        backend: &BackendRef,
        rule_filters: &[HTTPRouteFilter],
        backend_filters: &[HTTPRouteFilter],
    ) -> Option<String> {
        let target = &backend.object;
        if !target.is_service() {
            debug!("{}: backend {} is not a Service, skipping", object, target.name);
            return None;
        }
        let service = NamespacedName::new(target.namespace_or(route_ns), target.name.clone());
        let key = ServicePortName::with_number(service.clone(), target.port).to_string();
        self.refs.entry(key.clone()).or_insert_with(|| {
            let mut filters = filters_by_type(rule_filters);
            filters.extend(filters_by_type(backend_filters));
            ServiceRef {
                service,
                port: target.port,
                filters,
                object: object.to_string(),
            }
        });
        Some(key)
    }

    fn http_backends(
        &mut self,
        object: &str,
        route_ns: &str,
        rule_filters: &[HTTPRouteFilter],
        refs: &[HTTPBackendRef],
    ) -> BTreeMap<String, i32> {
        let mut backends = BTreeMap::new();
        for r in refs {
            if let Some(key) = self.add_backend(object, route_ns, &r.backend, rule_filters, &r.filters) {
                *backends.entry(key).or_insert(0) += backend_weight(r.backend.weight);
            }
        }
        if backends.values().sum::<i32>() <= 0 {
            backends.clear();
        }
        backends
    }

    fn l4_backends(&mut self, object: &str, route_ns: &str, rules: &[L4RouteRule]) -> BTreeMap<String, i32> {
        let mut backends = BTreeMap::new();
        for r in rules.iter().flat_map(|rule| &rule.backend_refs) {
            if let Some(key) = self.add_backend(object, route_ns, r, &[], &[]) {
                *backends.entry(key).or_insert(0) += backend_weight(r.weight);
            }
        }
        if backends.values().sum::<i32>() <= 0 {
            backends.clear();
        }
        backends
    }

    /// Hostnames of `route` on an L7 listener, dropping those a
    /// terminating listener holds no certificate for.
    fn l7_hostnames<T: GatewayRoute>(&mut self, route: &T, listener: &ValidListener) -> Vec<String> {
        let mut hosts = valid_hostnames(listener.hostname(), route.hostnames());
        if listener.protocol == Protocol::HTTPS {
            hosts.retain(|host| {
                let covered = listener.covers(host);
                if !covered {
                    self.rejections.push(Rejection::new(
                        route.object(),
                        reason::CERTIFICATE_MISSING,
                        format!(
                            "no certificate on listener {} covers {}",
                            listener.listener.name, host
                        ),
                    ));
                }
                covered
            });
        }
        hosts
    }

    fn insert_l7(&mut self, object: &str, port: u16, host: String, spec: L7RouteSpec) {
        let rule = self
            .spec
            .route_rules
            .entry(port)
            .or_insert_with(|| RouteRule::L7(BTreeMap::new()));
        let RouteRule::L7(hosts) = rule else {
            return;
        };
        match hosts.get_mut(&host) {
            Some(existing) => {
                let existing_type = existing.route_type();
                let incoming_type = spec.route_type();
                if !existing.merge(spec) {
                    self.rejections.push(Rejection::new(
                        object,
                        reason::HOSTNAME_CONFLICT,
                        format!(
                            "{} on port {} is already routed as {}, not {}",
                            host, port, existing_type, incoming_type
                        ),
                    ));
                }
            }
            None => {
                hosts.insert(host, spec);
            }
        }
    }

    fn add_http_route(&mut self, route: &HTTPRoute) {
        let listeners = self.attached(route);
        if listeners.is_empty() {
            return;
        }
        let object = route.object();
        let ns = route.metadata.namespace.clone();
        let mut matches = Vec::new();
        for rule in &route.spec.rules {
            let backends = self.http_backends(&object, &ns, &rule.filters, &rule.backend_refs);
            matches.extend(http_matches(rule, backends));
        }
        for listener in listeners.iter().filter(|l| l.protocol.is_l7()) {
            for host in self.l7_hostnames(route, listener) {
                let spec = L7RouteSpec::Http {
                    matches: matches.clone(),
                };
                self.insert_l7(&object, listener.port, host, spec);
            }
        }
    }

    fn add_grpc_route(&mut self, route: &GRPCRoute) {
        let listeners = self.attached(route);
        if listeners.is_empty() {
            return;
        }
        let object = route.object();
        let ns = route.metadata.namespace.clone();
        let mut matches = Vec::new();
        for rule in &route.spec.rules {
            let backends = self.http_backends(&object, &ns, &rule.filters, &rule.backend_refs);
            matches.extend(grpc_matches(rule, backends));
        }
        for listener in listeners.iter().filter(|l| l.protocol.is_l7()) {
            for host in self.l7_hostnames(route, listener) {
                let spec = L7RouteSpec::Grpc {
                    matches: matches.clone(),
                };
                self.insert_l7(&object, listener.port, host, spec);
            }
        }
    }

    fn insert_tls_terminate(
        &mut self,
        object: &str,
        port: u16,
        hosts: Vec<String>,
        backends: &BTreeMap<String, i32>,
    ) {
        let rule = self
            .spec
            .route_rules
            .entry(port)
            .or_insert_with(|| RouteRule::TlsTerminate(BTreeMap::new()));
        let RouteRule::TlsTerminate(routes) = rule else {
            return;
        };
        for host in hosts {
            if routes.contains_key(&host) {
                self.rejections.push(Rejection::new(
                    object,
                    reason::HOSTNAME_CONFLICT,
                    format!("{} on port {} is already bound", host, port),
                ));
                continue;
            }
            routes.insert(host, backends.clone());
        }
    }

    fn add_tls_route(&mut self, route: &TLSRoute) {
        let listeners = self.attached(route);
        if listeners.is_empty() {
            return;
        }
        let object = route.object();
        let ns = route.metadata.namespace.clone();
        for listener in &listeners {
            let hosts = valid_hostnames(listener.hostname(), &route.spec.hostnames);
            match listener.protocol {
                Protocol::TlsPassthrough => {
                    let Some(target) = passthrough_target(route) else {
                        self.rejections.push(Rejection::new(
                            object.clone(),
                            reason::BACKEND_NOT_FOUND,
                            "no Service backend for TLS passthrough",
                        ));
                        continue;
                    };
                    let rule = self
                        .spec
                        .route_rules
                        .entry(listener.port)
                        .or_insert_with(|| RouteRule::TlsPassthrough(BTreeMap::new()));
                    let RouteRule::TlsPassthrough(routes) = rule else {
                        continue;
                    };
                    for host in hosts {
                        match routes.get(&host) {
                            Some(existing) if *existing != target => {
                                self.rejections.push(Rejection::new(
                                    object.clone(),
                                    reason::HOSTNAME_CONFLICT,
                                    format!(
                                        "{} on port {} already passes through to {}",
                                        host, listener.port, existing
                                    ),
                                ));
                            }
                            Some(_) => {}
                            None => {
                                routes.insert(host, target.clone());
                            }
                        }
                    }
                }
                Protocol::TlsTerminate => {
                    let backends = self.l4_backends(&object, &ns, &route.spec.rules);
                    self.insert_tls_terminate(&object, listener.port, hosts, &backends);
                }
                _ => {}
            }
        }
    }

    fn add_tcp_route(&mut self, route: &TCPRoute) {
        let listeners = self.attached(route);
        if listeners.is_empty() {
            return;
        }
        let object = route.object();
        let ns = route.metadata.namespace.clone();
        for listener in &listeners {
            match listener.protocol {
                Protocol::TCP => {
                    if let Some(owner) = self.tcp_owners.get(&listener.port)
                        && *owner != object
                    {
                        self.rejections.push(Rejection::new(
                            object.clone(),
                            reason::ROUTE_CONFLICT,
                            format!("port {} is already bound by {}", listener.port, owner),
                        ));
                        continue;
                    }
                    self.tcp_owners.insert(listener.port, object.clone());
                    let backends = self.l4_backends(&object, &ns, &route.spec.rules);
                    let rule = self
                        .spec
                        .route_rules
                        .entry(listener.port)
                        .or_insert_with(|| RouteRule::Tcp(BTreeMap::new()));
                    if let RouteRule::Tcp(existing) = rule {
                        for (key, weight) in backends {
                            existing.entry(key).or_insert(weight);
                        }
                    }
                }
                Protocol::TlsTerminate => {
                    let host = listener.hostname().unwrap_or("*").to_string();
                    let backends = self.l4_backends(&object, &ns, &route.spec.rules);
                    self.insert_tls_terminate(&object, listener.port, vec![host], &backends);
                }
                _ => {}
            }
        }
    }

    fn add_services(&mut self) {
        let refs = std::mem::take(&mut self.refs);
        for (key, service_ref) in refs {
            let config = service_config(self.snapshot, &service_ref, &mut self.rejections);
            self.spec.services.insert(key, config);
        }
    }

    fn add_global_certificate(&mut self) {
        let Some(secret) = &self.snapshot.global_certificate else {
            return;
        };
        match certificate_from_secret(secret) {
            Ok((cert, _)) => self.spec.global_certificate = Some(cert),
            Err(e) => self.rejections.push(Rejection::new(
                format!("Secret/{}", secret.metadata.key()),
                reason::INVALID_CERTIFICATE,
                format!("{:#}", e),
            )),
        }
    }

    fn finish(mut self) -> GatewayConfig {
        for key in self.spec.dangling_service_keys() {
            self.spec.services.insert(key, ServiceConfig::default());
        }
        GatewayConfig {
            spec: self.spec,
            rejections: self.rejections,
        }
    }
}

/// `name:port` of the first Service backend. An explicit port wins; the
/// default applies only when the backend names none.
fn passthrough_target(route: &TLSRoute) -> Option<String> {
    route
        .spec
        .rules
        .iter()
        .flat_map(|rule| &rule.backend_refs)
        .map(|r| &r.object)
        .find(|r| r.is_service())
        .map(|r| format!("{}:{}", r.name, r.port.unwrap_or(DEFAULT_PASSTHROUGH_PORT)))
}

/// Port of a slice matching `port` by name. Unnumbered slice ports use
/// `targetPort`, else `port`.
fn slice_port(slice: &EndpointSlice, port: &ServicePort) -> Option<i32> {
    let default_port = port.target_port_number();
    if slice.ports.is_empty() {
        return Some(default_port);
    }
    slice
        .ports
        .iter()
        .find(|p| p.name.as_deref().unwrap_or("") == port.name)
        .map(|p| p.port.unwrap_or(default_port))
}

fn service_endpoints(entry: &ServiceEndpoints, port: &ServicePort) -> BTreeMap<String, Endpoint> {
    let mut endpoints = BTreeMap::new();
    let svc = &entry.service;
    if svc.spec.type_ == ServiceType::ExternalName {
        if let Some(name) = svc.spec.external_name.as_deref().filter(|n| !n.is_empty()) {
            endpoints.insert(
                format!("{}:{}", name, port.target_port_number()),
                Endpoint {
                    weight: 1,
                    tags: BTreeMap::new(),
                    upstream_cert: None,
                },
            );
        }
        return endpoints;
    }
    for slice in entry
        .slices
        .iter()
        .filter(|s| s.address_type == AddressType::IPv4)
    {
        let Some(number) = slice_port(slice, port) else {
            continue;
        };
        for ep in slice.endpoints.iter().filter(|ep| ep.is_ready()) {
            let mut tags = BTreeMap::new();
            if let Some(node) = ep.node_name.as_deref().filter(|n| !n.is_empty()) {
                tags.insert("Node".to_string(), node.to_string());
            }
            for address in &ep.addresses {
                endpoints.insert(
                    format!("{}:{}", address, number),
                    Endpoint {
                        weight: 1,
                        tags: tags.clone(),
                        upstream_cert: None,
                    },
                );
            }
        }
    }
    endpoints
}

fn annotation_number<T: FromStr + Default>(meta: &ObjectMeta, key: &str) -> Result<T, String> {
    match meta.annotation(key).map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|_| format!("{}: '{}' is not a valid number", key, value)),
        None => Ok(T::default()),
    }
}

fn retry_policy(meta: &ObjectMeta) -> Result<Option<RetryPolicy>, String> {
    let Some(retry_on) = meta.annotation(RETRY_ON).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    Ok(Some(RetryPolicy {
        retry_on: retry_on.trim().to_string(),
        per_try_timeout_ms: annotation_number(meta, RETRY_PER_TRY_TIMEOUT_MS)?,
        num_retries: annotation_number(meta, RETRY_MAX)?,
        backoff_base_ms: annotation_number(meta, RETRY_BACKOFF_BASE_MS)?,
    }))
}

fn service_config(
    snapshot: &GatewaySnapshot,
    service_ref: &ServiceRef,
    rejections: &mut Vec<Rejection>,
) -> ServiceConfig {
    let mut config = ServiceConfig {
        filters: service_ref.filters.values().cloned().collect(),
        ..Default::default()
    };
    let Some(entry) = snapshot.services.get(&service_ref.service) else {
        rejections.push(Rejection::new(
            service_ref.object.clone(),
            reason::BACKEND_NOT_FOUND,
            format!("service {} not found", service_ref.service),
        ));
        return config;
    };
    let Some(port) = entry.service.port_by_number(service_ref.port) else {
        rejections.push(Rejection::new(
            service_ref.object.clone(),
            reason::BACKEND_NOT_FOUND,
            format!(
                "service {} has no port {}",
                service_ref.service,
                service_ref.port.map(|p| p.to_string()).unwrap_or_default()
            ),
        ));
        return config;
    };
    config.endpoints = service_endpoints(entry, port);

    let meta = &entry.service.metadata;
    let object = format!("Service/{}", meta.key());
    match retry_policy(meta) {
        Ok(policy) => config.retry_policy = policy,
        Err(message) => rejections.push(Rejection::new(object.clone(), reason::INVALID_ANNOTATION, message)),
    }
    if let Some(raw) = meta.annotation(CIRCUIT_BREAKER) {
        match serde_json::from_str::<CircuitBreaker>(raw) {
            Ok(cb) => config.circuit_breaker = Some(cb),
            Err(e) => rejections.push(Rejection::new(
                object.clone(),
                reason::INVALID_ANNOTATION,
                format!("{}: {}", CIRCUIT_BREAKER, e),
            )),
        }
    }
    if let Some(value) = meta.annotation(UPSTREAM_SSL_SECRET) {
        let secret = NamespacedName::parse(value, &meta.namespace).and_then(|k| snapshot.secrets.get(&k));
        match secret.and_then(|s| Some((s.tls_cert()?, s.tls_key()?, s.ca_cert()))) {
            Some((cert_chain, private_key, ca)) => {
                config.upstream_cert = Some(UpstreamCert {
                    cert_chain: cert_chain.to_string(),
                    private_key: private_key.to_string(),
                    issuing_ca: ca.unwrap_or_default().to_string(),
                });
            }
            None => rejections.push(Rejection::new(
                object,
                reason::CERTIFICATE_MISSING,
                format!("upstream secret '{}' not found or incomplete", value),
            )),
        }
    }
    config
}

/// Build the config of the snapshot's Gateway. Rejected rules are dropped
/// and reported; the rest is always returned.
pub fn gateway_to_config(snapshot: &GatewaySnapshot) -> GatewayConfig {
    let mut builder = Builder::new(snapshot);
    for route in by_age(&snapshot.http_routes) {
        builder.add_http_route(route);
    }
    for route in by_age(&snapshot.grpc_routes) {
        builder.add_grpc_route(route);
    }
    for route in by_age(&snapshot.tls_routes) {
        builder.add_tls_route(route);
    }
    for route in by_age(&snapshot.tcp_routes) {
        builder.add_tcp_route(route);
    }
    builder.add_services();
    builder.add_global_certificate();
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use chrono::{TimeZone, Utc};
    use pkg_types::endpoint::{EndpointConditions, SliceEndpoint, SlicePort};
    use pkg_types::gateway::{
        AllowedRoutes, GatewaySpec, GatewayTLSConfig, LabelSelector, RouteNamespaces,
        SecretObjectReference,
    };
    use pkg_types::route::{
        BackendObjectReference, HTTPHeaderFilter, HTTPHeader, HTTPRouteMatch, HTTPRouteSpec,
        L4RouteRule, TCPRouteSpec, TLSRouteSpec,
    };
    use pkg_types::service::{IntOrString, ServiceSpec};

    fn make_meta(ns: &str, name: &str, age_secs: i64) -> ObjectMeta {
        ObjectMeta {
            name: name.to_string(),
            namespace: ns.to_string(),
            generation: 1,
            creation_timestamp: Utc.timestamp_opt(1_700_000_000 + age_secs, 0).single(),
            ..Default::default()
        }
    }

    fn make_listener(name: &str, port: i32, protocol: ProtocolType) -> pkg_types::gateway::Listener {
        pkg_types::gateway::Listener {
            name: name.to_string(),
            port,
            protocol,
            ..Default::default()
        }
    }

    fn make_gateway(listeners: Vec<pkg_types::gateway::Listener>) -> Gateway {
        Gateway {
            metadata: make_meta("ns1", "gw", 0),
            spec: GatewaySpec {
                gateway_class_name: "classA".to_string(),
                listeners,
            },
            ..Default::default()
        }
    }

    fn make_backend(name: &str, port: i32, weight: Option<i32>) -> BackendRef {
        BackendRef {
            object: BackendObjectReference {
                name: name.to_string(),
                port: Some(port),
                ..Default::default()
            },
            weight,
        }
    }

    fn make_parent(name: &str) -> ParentReference {
        ParentReference {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn make_http_route(name: &str, age: i64, hostnames: &[&str], path: &str, backend: &str) -> HTTPRoute {
        HTTPRoute {
            metadata: make_meta("ns1", name, age),
            spec: HTTPRouteSpec {
                parent_refs: vec![make_parent("gw")],
                hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
                rules: vec![HTTPRouteRule {
                    matches: vec![HTTPRouteMatch {
                        path: Some(HTTPPathMatch {
                            type_: PathMatchType::PathPrefix,
                            value: path.to_string(),
                        }),
                        ..Default::default()
                    }],
                    backend_refs: vec![HTTPBackendRef {
                        backend: make_backend(backend, 8080, None),
                        filters: vec![],
                    }],
                    ..Default::default()
                }],
            },
            ..Default::default()
        }
    }

    fn make_service_endpoints(name: &str, ips: &[&str]) -> ServiceEndpoints {
        let mut labels = BTreeMap::new();
        labels.insert("kubernetes.io/service-name".to_string(), name.to_string());
        ServiceEndpoints {
            service: Service {
                metadata: make_meta("ns1", name, 0),
                spec: ServiceSpec {
                    cluster_ip: Some("10.96.0.20".to_string()),
                    ports: vec![ServicePort {
                        name: "http".to_string(),
                        protocol: "TCP".to_string(),
                        port: 8080,
                        target_port: Some(IntOrString::Int(9090)),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            },
            slices: vec![EndpointSlice {
                metadata: ObjectMeta {
                    labels,
                    ..make_meta("ns1", &format!("{}-abc", name), 0)
                },
                address_type: AddressType::IPv4,
                endpoints: ips
                    .iter()
                    .map(|ip| SliceEndpoint {
                        addresses: vec![ip.to_string()],
                        conditions: EndpointConditions { ready: Some(true) },
                        node_name: Some("node-1".to_string()),
                        ..Default::default()
                    })
                    .chain(std::iter::once(SliceEndpoint {
                        addresses: vec!["10.1.0.99".to_string()],
                        conditions: EndpointConditions { ready: Some(false) },
                        ..Default::default()
                    }))
                    .collect(),
                ports: vec![SlicePort {
                    name: Some("http".to_string()),
                    port: None,
                    protocol: None,
                }],
            }],
        }
    }

    fn make_tls_secret(name: &str, sans: &[&str]) -> Secret {
        let names = sans.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(names).unwrap();
        Secret {
            metadata: make_meta("ns1", name, 0),
            type_: "kubernetes.io/tls".to_string(),
            data: BTreeMap::from([
                (TLS_CERT_KEY.to_string(), cert.pem()),
                (TLS_PRIVATE_KEY_KEY.to_string(), key_pair.serialize_pem()),
            ]),
        }
    }

    fn make_https_snapshot() -> GatewaySnapshot {
        let secret = make_tls_secret("example-tls", &["a.example", "*.example"]);
        let mut listener = make_listener("https", 443, ProtocolType::HTTPS);
        listener.tls = Some(GatewayTLSConfig {
            mode: Some(TLSModeType::Terminate),
            certificate_refs: vec![SecretObjectReference {
                name: "example-tls".to_string(),
                ..Default::default()
            }],
        });
        let mut snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![listener]),
            http_routes: vec![make_http_route("web", 1, &["x.example", "other.test"], "/", "api")],
            ..Default::default()
        };
        snapshot.secrets.insert(secret.metadata.key(), secret);
        snapshot.services.insert(
            NamespacedName::new("ns1", "api"),
            make_service_endpoints("api", &["10.1.0.5", "10.1.0.6"]),
        );
        snapshot
    }

    #[test]
    fn https_wildcard_certificate_covers_route_host() {
        let snapshot = make_https_snapshot();
        let config = gateway_to_config(&snapshot);

        assert_eq!(config.spec.listeners.len(), 1);
        let tls = config.spec.listeners[0].tls.as_ref().unwrap();
        assert_eq!(tls.mode, TlsMode::Terminate);
        assert_eq!(tls.certificates.len(), 1);

        let RouteRule::L7(hosts) = &config.spec.route_rules[&443] else {
            panic!("expected an L7 rule on 443");
        };
        assert_eq!(hosts.keys().collect::<Vec<_>>(), vec!["x.example"]);
        let matches = hosts["x.example"].matches();
        assert_eq!(matches[0].backend_service["ns1/api:8080"], 1);

        // other.test is not covered by the listener certificate.
        assert!(
            config
                .rejections
                .iter()
                .any(|r| r.reason == reason::CERTIFICATE_MISSING && r.message.contains("other.test"))
        );

        let service = &config.spec.services["ns1/api:8080"];
        assert_eq!(
            service.endpoints.keys().collect::<Vec<_>>(),
            vec!["10.1.0.5:9090", "10.1.0.6:9090"]
        );
        assert_eq!(service.endpoints["10.1.0.5:9090"].tags["Node"], "node-1");
        assert!(config.spec.dangling_service_keys().is_empty());

        let again = gateway_to_config(&snapshot);
        assert_eq!(
            fingerprint(&config.spec).unwrap(),
            fingerprint(&again.spec).unwrap()
        );
    }

    #[test]
    fn duplicate_ports_keep_the_first_listener() {
        let snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![
                make_listener("a", 80, ProtocolType::HTTP),
                make_listener("b", 80, ProtocolType::TCP),
                make_listener("c", 70000, ProtocolType::HTTP),
            ]),
            ..Default::default()
        };
        let config = gateway_to_config(&snapshot);
        assert_eq!(config.spec.listeners.len(), 1);
        assert_eq!(config.spec.listeners[0].protocol, Protocol::HTTP);
        let reasons: Vec<_> = config.rejections.iter().map(|r| r.reason).collect();
        assert_eq!(reasons, vec![reason::DUPLICATE_PORT, reason::INVALID_LISTENER]);
    }

    #[test]
    fn missing_backend_still_gets_service_entry() {
        let snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![make_listener("http", 80, ProtocolType::HTTP)]),
            http_routes: vec![make_http_route("web", 1, &[], "/", "ghost")],
            ..Default::default()
        };
        let config = gateway_to_config(&snapshot);
        assert!(config.spec.services["ns1/ghost:8080"].endpoints.is_empty());
        assert!(config.spec.dangling_service_keys().is_empty());
        assert_eq!(config.rejections[0].reason, reason::BACKEND_NOT_FOUND);

        let RouteRule::L7(hosts) = &config.spec.route_rules[&80] else {
            panic!("expected an L7 rule on 80");
        };
        assert!(hosts.contains_key("*"));
    }

    #[test]
    fn older_routes_match_first() {
        let mut snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![make_listener("http", 80, ProtocolType::HTTP)]),
            http_routes: vec![
                make_http_route("newer", 5, &["a.example"], "/new", "api"),
                make_http_route("older", 1, &["a.example"], "/old", "api"),
            ],
            ..Default::default()
        };
        snapshot.services.insert(
            NamespacedName::new("ns1", "api"),
            make_service_endpoints("api", &["10.1.0.5"]),
        );
        let config = gateway_to_config(&snapshot);
        let RouteRule::L7(hosts) = &config.spec.route_rules[&80] else {
            panic!("expected an L7 rule on 80");
        };
        let paths: Vec<_> = hosts["a.example"]
            .matches()
            .iter()
            .map(|m| m.path.as_ref().unwrap().path.as_str())
            .collect();
        assert_eq!(paths, vec!["/old", "/new"]);
    }

    #[test]
    fn grpc_on_http_hostname_conflicts() {
        let mut snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![make_listener("http", 80, ProtocolType::HTTP)]),
            http_routes: vec![make_http_route("web", 1, &["a.example"], "/", "api")],
            ..Default::default()
        };
        snapshot.grpc_routes.push(GRPCRoute {
            metadata: make_meta("ns1", "rpc", 0),
            spec: pkg_types::route::GRPCRouteSpec {
                parent_refs: vec![make_parent("gw")],
                hostnames: vec!["a.example".to_string()],
                rules: vec![GRPCRouteRule {
                    backend_refs: vec![HTTPBackendRef {
                        backend: make_backend("api", 8080, None),
                        filters: vec![],
                    }],
                    ..Default::default()
                }],
            },
            ..Default::default()
        });
        let config = gateway_to_config(&snapshot);
        assert!(
            config
                .rejections
                .iter()
                .any(|r| r.reason == reason::HOSTNAME_CONFLICT && r.object == "GRPCRoute/ns1/rpc")
        );
        let RouteRule::L7(hosts) = &config.spec.route_rules[&80] else {
            panic!("expected an L7 rule on 80");
        };
        assert_eq!(hosts["a.example"].route_type(), "HTTP");
    }

    #[test]
    fn backend_filters_override_rule_filters() {
        let header = |value: &str| HTTPRouteFilter {
            type_: HTTPRouteFilterType::RequestHeaderModifier,
            request_header_modifier: Some(HTTPHeaderFilter {
                set: vec![HTTPHeader {
                    name: "x-from".to_string(),
                    value: value.to_string(),
                }],
                ..Default::default()
            }),
            response_header_modifier: None,
            request_mirror: None,
            request_redirect: None,
            url_rewrite: None,
        };
        let mut route = make_http_route("web", 1, &[], "/", "api");
        route.spec.rules[0].filters = vec![header("rule")];
        route.spec.rules[0].backend_refs[0].filters = vec![header("backend")];
        let snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![make_listener("http", 80, ProtocolType::HTTP)]),
            http_routes: vec![route],
            ..Default::default()
        };
        let config = gateway_to_config(&snapshot);
        let filters = &config.spec.services["ns1/api:8080"].filters;
        assert_eq!(filters.len(), 1);
        assert_eq!(
            filters[0].request_header_modifier.as_ref().unwrap().set[0].value,
            "backend"
        );
    }

    #[test]
    fn tls_passthrough_explicit_port_wins() {
        let mut listener = make_listener("tls", 8443, ProtocolType::TLS);
        listener.tls = Some(GatewayTLSConfig {
            mode: Some(TLSModeType::Passthrough),
            certificate_refs: vec![],
        });
        let make_tls_route = |name: &str, host: &str, port: Option<i32>| TLSRoute {
            metadata: make_meta("ns1", name, 1),
            spec: TLSRouteSpec {
                parent_refs: vec![make_parent("gw")],
                hostnames: vec![host.to_string()],
                rules: vec![L4RouteRule {
                    backend_refs: vec![BackendRef {
                        object: BackendObjectReference {
                            name: "upstream.example".to_string(),
                            port,
                            ..Default::default()
                        },
                        weight: None,
                    }],
                }],
            },
            ..Default::default()
        };
        let snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![listener]),
            tls_routes: vec![
                make_tls_route("explicit", "a.example", Some(9443)),
                make_tls_route("default", "b.example", None),
            ],
            ..Default::default()
        };
        let config = gateway_to_config(&snapshot);
        let RouteRule::TlsPassthrough(hosts) = &config.spec.route_rules[&8443] else {
            panic!("expected a passthrough rule");
        };
        assert_eq!(hosts["a.example"], "upstream.example:9443");
        assert_eq!(hosts["b.example"], "upstream.example:443");
        assert!(config.spec.services.is_empty());
    }

    #[test]
    fn tcp_port_is_owned_by_oldest_route() {
        let make_tcp_route = |name: &str, age: i64, backend: &str, weight: i32| TCPRoute {
            metadata: make_meta("ns1", name, age),
            spec: TCPRouteSpec {
                parent_refs: vec![make_parent("gw")],
                rules: vec![L4RouteRule {
                    backend_refs: vec![make_backend(backend, 5432, Some(weight))],
                }],
            },
            ..Default::default()
        };
        let snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![make_listener("db", 5432, ProtocolType::TCP)]),
            tcp_routes: vec![
                make_tcp_route("second", 2, "replica", 1),
                make_tcp_route("first", 1, "primary", -3),
            ],
            ..Default::default()
        };
        let config = gateway_to_config(&snapshot);
        let RouteRule::Tcp(backends) = &config.spec.route_rules[&5432] else {
            panic!("expected a TCP rule");
        };
        // Negative weight clamps to 0, leaving no usable backend.
        assert!(backends.is_empty());
        assert!(
            config
                .rejections
                .iter()
                .any(|r| r.reason == reason::ROUTE_CONFLICT && r.object == "TCPRoute/ns1/second")
        );
    }

    #[test]
    fn allowed_routes_namespace_selector() {
        let mut listener = make_listener("http", 80, ProtocolType::HTTP);
        listener.allowed_routes = Some(AllowedRoutes {
            namespaces: Some(RouteNamespaces {
                from: Some(FromNamespaces::Selector),
                selector: Some(LabelSelector {
                    match_labels: BTreeMap::from([("team".to_string(), "web".to_string())]),
                }),
            }),
            kinds: vec![],
        });
        let gateway = make_gateway(vec![listener]);
        let (listeners, rejections) = validate_listeners(&gateway, &BTreeMap::new());
        assert!(rejections.is_empty());

        let mut labels = BTreeMap::new();
        labels.insert(
            "team-ns".to_string(),
            BTreeMap::from([("team".to_string(), "web".to_string())]),
        );
        let parent = ParentReference {
            namespace: Some("ns1".to_string()),
            ..make_parent("gw")
        };
        assert_eq!(
            allowed_listeners(&parent, RouteKind::HTTPRoute, "team-ns", "ns1", &listeners, &labels),
            Ok(vec![0])
        );
        assert_eq!(
            allowed_listeners(&parent, RouteKind::HTTPRoute, "other", "ns1", &listeners, &labels),
            Err(REASON_NOT_ALLOWED_BY_LISTENERS)
        );
        assert_eq!(
            allowed_listeners(&parent, RouteKind::TCPRoute, "team-ns", "ns1", &listeners, &labels),
            Err(REASON_NOT_ALLOWED_BY_LISTENERS)
        );
        let wrong_section = ParentReference {
            section_name: Some("nope".to_string()),
            ..parent
        };
        assert_eq!(
            allowed_listeners(&wrong_section, RouteKind::HTTPRoute, "team-ns", "ns1", &listeners, &labels),
            Err(REASON_NO_MATCHING_PARENT)
        );
    }

    #[test]
    fn service_annotations_become_policies() {
        let mut snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![make_listener("http", 80, ProtocolType::HTTP)]),
            http_routes: vec![make_http_route("web", 1, &[], "/", "api")],
            ..Default::default()
        };
        let mut entry = make_service_endpoints("api", &["10.1.0.5"]);
        let annotations = &mut entry.service.metadata.annotations;
        annotations.insert(RETRY_ON.to_string(), "5xx".to_string());
        annotations.insert(RETRY_MAX.to_string(), "3".to_string());
        annotations.insert(
            CIRCUIT_BREAKER.to_string(),
            r#"{"minRequestAmount": 10, "degradedStatusCode": 503}"#.to_string(),
        );
        snapshot.services.insert(NamespacedName::new("ns1", "api"), entry);

        let config = gateway_to_config(&snapshot);
        let service = &config.spec.services["ns1/api:8080"];
        let retry = service.retry_policy.as_ref().unwrap();
        assert_eq!(retry.retry_on, "5xx");
        assert_eq!(retry.num_retries, 3);
        assert_eq!(retry.per_try_timeout_ms, 0);
        let cb = service.circuit_breaker.as_ref().unwrap();
        assert_eq!(cb.min_request_amount, 10);
        assert_eq!(cb.degraded_status_code, 503);
        assert!(config.rejections.is_empty());
    }

    #[test]
    fn invalid_retry_annotation_is_rejected() {
        let mut snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![make_listener("http", 80, ProtocolType::HTTP)]),
            http_routes: vec![make_http_route("web", 1, &[], "/", "api")],
            ..Default::default()
        };
        let mut entry = make_service_endpoints("api", &["10.1.0.5"]);
        entry
            .service
            .metadata
            .annotations
            .insert(RETRY_ON.to_string(), "5xx".to_string());
        entry
            .service
            .metadata
            .annotations
            .insert(RETRY_MAX.to_string(), "lots".to_string());
        snapshot.services.insert(NamespacedName::new("ns1", "api"), entry);

        let config = gateway_to_config(&snapshot);
        assert!(config.spec.services["ns1/api:8080"].retry_policy.is_none());
        assert_eq!(config.rejections[0].reason, reason::INVALID_ANNOTATION);
        assert_eq!(config.rejections[0].object, "Service/ns1/api");
    }

    #[test]
    fn global_certificate_is_published() {
        let snapshot = GatewaySnapshot {
            gateway: make_gateway(vec![]),
            global_certificate: Some(make_tls_secret("global", &["*.fleet.example"])),
            ..Default::default()
        };
        let config = gateway_to_config(&snapshot);
        let cert = config.spec.global_certificate.unwrap();
        assert!(!cert.serial_number.is_empty());
        assert!(!format!("{:?}", cert).contains("PRIVATE KEY"));
    }
}
