//! Ingress → `router.json` / `balancer.json` / `certificates.json`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use pkg_constants::annotations::{
    LOAD_BALANCER, REWRITE_TARGET_FROM, REWRITE_TARGET_TO, SESSION_STICKY, UPSTREAM_SSL_NAME,
    UPSTREAM_SSL_SECRET, UPSTREAM_SSL_VERIFY,
};
use pkg_types::NamespacedName;
use pkg_types::ingress::{Ingress, PathType};
use pkg_types::secret::Secret;

use crate::document::IngressRouteEntry;
use crate::hostname;
use crate::model::ServicePortName;
use crate::rejection::{Rejection, reason};
use crate::service::EndpointInfo;

/// Load-balancing algorithm tokens understood by the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AlgoBalancer {
    #[default]
    RoundRobinLoadBalancer,
    LeastWorkLoadBalancer,
    HashingLoadBalancer,
}

impl AlgoBalancer {
    /// Parse a token, falling back to round robin on anything unknown.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "RoundRobinLoadBalancer" => AlgoBalancer::RoundRobinLoadBalancer,
            "LeastWorkLoadBalancer" => AlgoBalancer::LeastWorkLoadBalancer,
            "HashingLoadBalancer" => AlgoBalancer::HashingLoadBalancer,
            other => {
                warn!(
                    "Unknown balancer '{}', falling back to RoundRobinLoadBalancer",
                    other
                );
                AlgoBalancer::RoundRobinLoadBalancer
            }
        }
    }
}

impl<'de> Deserialize<'de> for AlgoBalancer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Ok(AlgoBalancer::parse(&token))
    }
}

impl fmt::Display for AlgoBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlgoBalancer::RoundRobinLoadBalancer => "RoundRobinLoadBalancer",
            AlgoBalancer::LeastWorkLoadBalancer => "LeastWorkLoadBalancer",
            AlgoBalancer::HashingLoadBalancer => "HashingLoadBalancer",
        };
        f.write_str(s)
    }
}

/// PEM material taken from a TLS secret.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateSpec {
    pub cert: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

impl CertificateSpec {
    /// `None` unless the secret carries both a certificate and a key.
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        Some(Self {
            cert: secret.tls_cert()?.to_string(),
            key: secret.tls_key()?.to_string(),
            ca: secret.ca_cert().map(str::to_string),
        })
    }
}

impl fmt::Debug for CertificateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateSpec")
            .field("key", &"<redacted>")
            .field("has_ca", &self.ca.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert: Option<CertificateSpec>,
    #[serde(default)]
    pub ssl_verify: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterEntry {
    pub service: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewrite: Vec<String>,
    #[serde(rename = "isTLS", default)]
    pub is_tls: bool,
}

/// `router.json`: `{routes: {"<host><path>": RouterEntry}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub routes: BTreeMap<String, RouterEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalancerEntry {
    pub sticky: bool,
    pub balancer: AlgoBalancer,
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamSpec>,
}

/// `balancer.json`: `{services: {"<serviceKey>": BalancerEntry}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balancer {
    pub services: BTreeMap<String, BalancerEntry>,
}

/// `certificates.json`, keyed by host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Certificates {
    pub certificates: BTreeMap<String, CertificateSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngressConfig {
    pub router: Router,
    pub balancer: Balancer,
    pub certificates: Certificates,
}

impl IngressConfig {
    /// Add one route. The first route claiming a router key keeps it;
    /// balancer targets for the same service accumulate.
    pub fn insert_entry(&mut self, entry: &IngressRouteEntry) {
        let key = entry.router_key();
        if let Some(existing) = self.router.routes.get(&key) {
            if existing.service != entry.service_name {
                debug!(
                    "Router key {} already routes to {}, ignoring {}",
                    key, existing.service, entry.service_name
                );
            }
        } else {
            self.router.routes.insert(
                key,
                RouterEntry {
                    service: entry.service_name.clone(),
                    rewrite: entry.rewrite.clone(),
                    is_tls: entry.is_tls,
                },
            );
        }

        let balancer = self
            .balancer
            .services
            .entry(entry.service_name.clone())
            .or_insert_with(|| BalancerEntry {
                sticky: entry.sticky,
                balancer: entry.balancer,
                targets: Vec::new(),
                upstream: None,
            });
        balancer.targets.extend(entry.upstreams.iter().cloned());
        balancer.targets.sort();
        balancer.targets.dedup();
    }

    pub fn has_certificates(&self) -> bool {
        !self.certificates.certificates.is_empty()
    }
}

/// One Ingress path, resolved against the service and secret indices.
#[derive(Debug, Clone, PartialEq)]
pub struct IngressRouteInfo {
    pub ingress: NamespacedName,
    /// Backend as written on the Ingress, port by name or number.
    pub backend: ServicePortName,
    /// Backend with the port resolved to its name, as endpoints are keyed.
    pub endpoints_key: ServicePortName,
    pub host: String,
    pub path: String,
    pub rewrite: Vec<String>,
    pub sticky: bool,
    pub balancer: AlgoBalancer,
    pub upstream: Option<UpstreamSpec>,
    pub is_tls: bool,
    pub certificate: Option<CertificateSpec>,
}

/// Lookups an Ingress needs from the rest of the cache.
pub trait IngressLookup {
    /// Name of the numbered port of a service. `Some("")` for an unnamed
    /// port, `None` when the service or port is unknown.
    fn port_name(&self, service: &NamespacedName, number: i32) -> Option<String>;

    fn secret(&self, key: &NamespacedName) -> Option<&Secret>;
}

/// Router path for an Ingress path and its match type.
pub fn normalize_path(path: &str, path_type: PathType) -> String {
    let path = if path.is_empty() { "/" } else { path };
    match path_type {
        PathType::Prefix => {
            if path.ends_with("/*") {
                path.to_string()
            } else if path.ends_with('/') {
                format!("{}*", path)
            } else {
                format!("{}/*", path)
            }
        }
        PathType::Exact | PathType::ImplementationSpecific => path.to_string(),
    }
}

fn parse_flag(ingress: &Ingress, key: &str) -> bool {
    let Some(value) = ingress.metadata.annotation(key) else {
        return false;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => true,
        "no" | "false" | "0" | "off" | "" => false,
        other => {
            warn!(
                "Ingress {}: invalid value '{}' for {}, treating as false",
                ingress.metadata.key(),
                other,
                key
            );
            false
        }
    }
}

fn upstream_spec<L: IngressLookup>(
    ingress: &Ingress,
    lookup: &L,
    rejections: &mut Vec<Rejection>,
) -> Option<UpstreamSpec> {
    let meta = &ingress.metadata;
    let ssl_name = meta.annotation(UPSTREAM_SSL_NAME).map(str::to_string);
    let ssl_verify = parse_flag(ingress, UPSTREAM_SSL_VERIFY);
    let ssl_cert = match meta.annotation(UPSTREAM_SSL_SECRET) {
        Some(value) => match NamespacedName::parse(value, &meta.namespace) {
            Some(key) => {
                let cert = lookup.secret(&key).and_then(CertificateSpec::from_secret);
                if cert.is_none() {
                    rejections.push(Rejection::new(
                        format!("Ingress/{}", meta.key()),
                        reason::CERTIFICATE_MISSING,
                        format!("upstream secret {} not found or incomplete", key),
                    ));
                }
                cert
            }
            None => {
                rejections.push(Rejection::new(
                    format!("Ingress/{}", meta.key()),
                    reason::INVALID_ANNOTATION,
                    format!("{}: '{}' is not a secret reference", UPSTREAM_SSL_SECRET, value),
                ));
                None
            }
        },
        None => None,
    };
    if ssl_name.is_none() && ssl_cert.is_none() && !ssl_verify {
        return None;
    }
    Some(UpstreamSpec {
        ssl_name,
        ssl_cert,
        ssl_verify,
    })
}

/// Every routable path of an accepted Ingress.
pub fn ingress_routes<L: IngressLookup>(
    ingress: &Ingress,
    lookup: &L,
    rejections: &mut Vec<Rejection>,
) -> Vec<IngressRouteInfo> {
    let meta = &ingress.metadata;
    let object = format!("Ingress/{}", meta.key());

    let rewrite = match (
        meta.annotation(REWRITE_TARGET_FROM),
        meta.annotation(REWRITE_TARGET_TO),
    ) {
        (Some(from), Some(to)) if !from.is_empty() => vec![from.to_string(), to.to_string()],
        _ => Vec::new(),
    };
    let sticky = parse_flag(ingress, SESSION_STICKY);
    let balancer = meta
        .annotation(LOAD_BALANCER)
        .map(AlgoBalancer::parse)
        .unwrap_or_default();
    let upstream = upstream_spec(ingress, lookup, rejections);

    let mut routes = Vec::new();
    for rule in &ingress.spec.rules {
        let host = if rule.host.is_empty() {
            "*".to_string()
        } else {
            hostname::normalize(&rule.host)
        };
        if host != "*" && !hostname::is_valid(&host) {
            rejections.push(Rejection::new(
                object.clone(),
                reason::INVALID_HOSTNAME,
                format!("invalid host '{}'", rule.host),
            ));
            continue;
        }

        let tls = ingress
            .spec
            .tls
            .iter()
            .find(|tls| tls.hosts.iter().any(|h| hostname::normalize(h) == host));
        let certificate = tls.and_then(|tls| {
            let secret_name = tls.secret_name.as_deref().filter(|s| !s.is_empty())?;
            let key = NamespacedName::new(&meta.namespace, secret_name);
            let cert = lookup.secret(&key).and_then(CertificateSpec::from_secret);
            if cert.is_none() {
                rejections.push(Rejection::new(
                    object.clone(),
                    reason::CERTIFICATE_MISSING,
                    format!("TLS secret {} for host {} not found or incomplete", key, host),
                ));
            }
            cert
        });

        let Some(http) = &rule.http else { continue };
        for path in &http.paths {
            let Some(backend) = &path.backend.service else {
                debug!("{}: path {} has no service backend, skipping", object, path.path);
                continue;
            };
            let service = NamespacedName::new(&meta.namespace, &backend.name);
            let (written, resolved) = match (&backend.port.name, backend.port.number) {
                (Some(name), _) if !name.is_empty() => (name.clone(), name.clone()),
                (_, Some(number)) => match lookup.port_name(&service, number) {
                    Some(name) => (number.to_string(), name),
                    None => {
                        debug!(
                            "{}: port {} of service {} is not known yet",
                            object, number, service
                        );
                        continue;
                    }
                },
                _ => {
                    rejections.push(Rejection::new(
                        object.clone(),
                        reason::BACKEND_NOT_FOUND,
                        format!("backend {} has no port", service),
                    ));
                    continue;
                }
            };

            routes.push(IngressRouteInfo {
                ingress: meta.key(),
                backend: ServicePortName::new(service.clone(), Some(written)),
                endpoints_key: ServicePortName::new(service, Some(resolved)),
                host: host.clone(),
                path: normalize_path(&path.path, path.path_type),
                rewrite: rewrite.clone(),
                sticky,
                balancer,
                upstream: upstream.clone(),
                is_tls: tls.is_some(),
                certificate: certificate.clone(),
            });
        }
    }
    routes
}

/// Ingress routes and the endpoints they target, read under the cache lock.
#[derive(Debug, Clone, Default)]
pub struct IngressSnapshot {
    pub routes: BTreeMap<ServicePortName, IngressRouteInfo>,
    pub endpoints: BTreeMap<ServicePortName, Vec<EndpointInfo>>,
}

/// Entries of the cluster's `IngressRoute` document. Routes whose backend
/// has no ready endpoint are left out.
pub fn ingress_entries(snapshot: &IngressSnapshot) -> Vec<IngressRouteEntry> {
    snapshot
        .routes
        .values()
        .filter_map(|route| {
            let endpoints = snapshot.endpoints.get(&route.endpoints_key)?;
            if endpoints.is_empty() {
                return None;
            }
            let mut upstreams: Vec<String> = endpoints.iter().map(EndpointInfo::address).collect();
            upstreams.sort();
            upstreams.dedup();
            Some(IngressRouteEntry {
                host: route.host.clone(),
                path: route.path.clone(),
                service_name: route.backend.to_string(),
                rewrite: route.rewrite.clone(),
                sticky: route.sticky,
                balancer: route.balancer,
                is_tls: route.is_tls,
                upstreams,
            })
        })
        .collect()
}

pub fn ingress_to_config(snapshot: &IngressSnapshot) -> IngressConfig {
    let mut config = IngressConfig::default();
    for entry in ingress_entries(snapshot) {
        config.insert_entry(&entry);
    }
    for route in snapshot.routes.values() {
        let service = route.backend.to_string();
        if let Some(balancer) = config.balancer.services.get_mut(&service) {
            if balancer.upstream.is_none() {
                balancer.upstream = route.upstream.clone();
            }
        } else {
            continue;
        }
        if let Some(cert) = &route.certificate {
            config
                .certificates
                .certificates
                .entry(route.host.clone())
                .or_insert_with(|| cert.clone());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::ObjectMeta;
    use pkg_types::ingress::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
        IngressSpec, IngressTLS, ServiceBackendPort,
    };

    #[derive(Default)]
    struct MapLookup {
        ports: BTreeMap<(NamespacedName, i32), String>,
        secrets: BTreeMap<NamespacedName, Secret>,
    }

    impl IngressLookup for MapLookup {
        fn port_name(&self, service: &NamespacedName, number: i32) -> Option<String> {
            self.ports.get(&(service.clone(), number)).cloned()
        }

        fn secret(&self, key: &NamespacedName) -> Option<&Secret> {
            self.secrets.get(key)
        }
    }

    fn make_lookup() -> MapLookup {
        let mut lookup = MapLookup::default();
        lookup
            .ports
            .insert((NamespacedName::new("default", "bookstore"), 80), "http".to_string());
        lookup
    }

    fn make_ingress(annotations: &[(&str, &str)]) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: "bookstore".to_string(),
                namespace: "default".to_string(),
                annotations: annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            },
            spec: IngressSpec {
                rules: vec![IngressRule {
                    host: "abc.com".to_string(),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: "/v1".to_string(),
                            path_type: PathType::Prefix,
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: "bookstore".to_string(),
                                    port: ServiceBackendPort {
                                        name: None,
                                        number: Some(80),
                                    },
                                }),
                            },
                        }],
                    }),
                }],
                ..Default::default()
            },
        }
    }

    fn make_snapshot(ingress: &Ingress, lookup: &MapLookup) -> IngressSnapshot {
        let mut rejections = Vec::new();
        let mut snapshot = IngressSnapshot::default();
        for route in ingress_routes(ingress, lookup, &mut rejections) {
            snapshot.routes.entry(route.backend.clone()).or_insert(route);
        }
        assert!(rejections.is_empty(), "{:?}", rejections);
        let key = ServicePortName::new(NamespacedName::new("default", "bookstore"), Some("http".into()));
        snapshot.endpoints.insert(
            key,
            ["10.0.0.6", "10.0.0.5"]
                .iter()
                .map(|ip| EndpointInfo {
                    ip: ip.to_string(),
                    port: 8080,
                    ..Default::default()
                })
                .collect(),
        );
        snapshot
    }

    #[test]
    fn single_prefix_rule() {
        let lookup = make_lookup();
        let config = ingress_to_config(&make_snapshot(&make_ingress(&[]), &lookup));

        let route = &config.router.routes["abc.com/v1/*"];
        assert_eq!(route.service, "default/bookstore:80");
        assert!(!route.is_tls);

        let balancer = &config.balancer.services["default/bookstore:80"];
        assert_eq!(balancer.balancer, AlgoBalancer::RoundRobinLoadBalancer);
        assert!(!balancer.sticky);
        assert_eq!(balancer.targets, vec!["10.0.0.5:8080", "10.0.0.6:8080"]);

        let json = serde_json::to_value(&config.balancer).unwrap();
        assert_eq!(
            json["services"]["default/bookstore:80"]["balancer"],
            "RoundRobinLoadBalancer"
        );
    }

    #[test]
    fn sticky_hashing_annotations() {
        let lookup = make_lookup();
        let ingress = make_ingress(&[
            (SESSION_STICKY, "true"),
            (LOAD_BALANCER, "HashingLoadBalancer"),
            (REWRITE_TARGET_FROM, "^/v1"),
            (REWRITE_TARGET_TO, "/"),
        ]);
        let config = ingress_to_config(&make_snapshot(&ingress, &lookup));
        let balancer = &config.balancer.services["default/bookstore:80"];
        assert!(balancer.sticky);
        assert_eq!(balancer.balancer, AlgoBalancer::HashingLoadBalancer);
        assert_eq!(config.router.routes["abc.com/v1/*"].rewrite, vec!["^/v1", "/"]);
    }

    #[test]
    fn unknown_balancer_falls_back() {
        assert_eq!(AlgoBalancer::parse("Fastest"), AlgoBalancer::RoundRobinLoadBalancer);
        let parsed: AlgoBalancer = serde_json::from_str("\"LeastWorkLoadBalancer\"").unwrap();
        assert_eq!(parsed, AlgoBalancer::LeastWorkLoadBalancer);
        let parsed: AlgoBalancer = serde_json::from_str("\"nope\"").unwrap();
        assert_eq!(parsed, AlgoBalancer::RoundRobinLoadBalancer);
    }

    #[test]
    fn path_normalisation() {
        assert_eq!(normalize_path("/v1", PathType::Prefix), "/v1/*");
        assert_eq!(normalize_path("/v1/", PathType::Prefix), "/v1/*");
        assert_eq!(normalize_path("/v1/*", PathType::Prefix), "/v1/*");
        assert_eq!(normalize_path("", PathType::Prefix), "/*");
        assert_eq!(normalize_path("/exact", PathType::Exact), "/exact");
        assert_eq!(normalize_path("", PathType::Exact), "/");
        assert_eq!(normalize_path("/x", PathType::ImplementationSpecific), "/x");
    }

    #[test]
    fn routes_without_endpoints_are_dropped() {
        let lookup = make_lookup();
        let mut snapshot = make_snapshot(&make_ingress(&[]), &lookup);
        snapshot.endpoints.clear();
        let config = ingress_to_config(&snapshot);
        assert!(config.router.routes.is_empty());
        assert!(config.balancer.services.is_empty());
    }

    #[test]
    fn unknown_port_number_is_skipped() {
        let lookup = MapLookup::default();
        let mut rejections = Vec::new();
        assert!(ingress_routes(&make_ingress(&[]), &lookup, &mut rejections).is_empty());
    }

    #[test]
    fn tls_hosts_publish_certificates() {
        let mut lookup = make_lookup();
        let secret = Secret {
            metadata: ObjectMeta {
                name: "abc-tls".to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            data: BTreeMap::from([
                ("tls.crt".to_string(), "CERT".to_string()),
                ("tls.key".to_string(), "KEY".to_string()),
            ]),
            ..Default::default()
        };
        lookup.secrets.insert(secret.metadata.key(), secret);

        let mut ingress = make_ingress(&[]);
        ingress.spec.tls = vec![IngressTLS {
            hosts: vec!["ABC.com".to_string()],
            secret_name: Some("abc-tls".to_string()),
        }];
        let config = ingress_to_config(&make_snapshot(&ingress, &lookup));
        assert!(config.router.routes["abc.com/v1/*"].is_tls);
        let cert = &config.certificates.certificates["abc.com"];
        assert_eq!(cert.cert, "CERT");
        assert!(!format!("{:?}", cert).contains("KEY"));
    }

    #[test]
    fn missing_upstream_secret_is_rejected() {
        let lookup = make_lookup();
        let ingress = make_ingress(&[
            (UPSTREAM_SSL_NAME, "bookstore.internal"),
            (UPSTREAM_SSL_SECRET, "other/missing"),
        ]);
        let mut rejections = Vec::new();
        let routes = ingress_routes(&ingress, &lookup, &mut rejections);
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].reason, reason::CERTIFICATE_MISSING);
        let upstream = routes[0].upstream.as_ref().unwrap();
        assert_eq!(upstream.ssl_name.as_deref(), Some("bookstore.internal"));
        assert!(upstream.ssl_cert.is_none());
    }
}
