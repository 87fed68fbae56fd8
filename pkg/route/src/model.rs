use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use pkg_constants::gateway::{
    INBOUND_HTTP_CHAIN, INBOUND_TCP_CHAIN, OUTBOUND_HTTP_CHAIN, OUTBOUND_TCP_CHAIN,
};
use pkg_types::NamespacedName;
use pkg_types::route::HTTPRouteFilter;

/// Canonical name of a routable backend: a service port, optionally
/// qualified by port name or number. Renders as `ns/name[:port]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePortName {
    pub service: NamespacedName,
    pub port: Option<String>,
    pub protocol: String,
}

impl ServicePortName {
    pub fn new(service: NamespacedName, port: Option<String>) -> Self {
        Self {
            service,
            port: port.filter(|p| !p.is_empty()),
            protocol: "TCP".to_string(),
        }
    }

    pub fn with_number(service: NamespacedName, port: Option<i32>) -> Self {
        Self::new(service, port.map(|p| p.to_string()))
    }
}

impl fmt::Display for ServicePortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => write!(f, "{}:{}", self.service, port),
            None => write!(f, "{}", self.service),
        }
    }
}

// ─── Listeners & certificates ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    HTTP,
    HTTPS,
    TCP,
    UDP,
    #[serde(rename = "TLS-Passthrough")]
    TlsPassthrough,
    #[serde(rename = "TLS-Terminate")]
    TlsTerminate,
}

impl Protocol {
    pub fn is_l7(&self) -> bool {
        matches!(self, Protocol::HTTP | Protocol::HTTPS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    Terminate,
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub mode: TlsMode,
    #[serde(rename = "mTLS")]
    pub mtls: bool,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub protocol: Protocol,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// Serving certificate. Immutable once observed; a rotation yields a new
/// serial number.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub common_name: String,
    pub serial_number: String,
    pub not_after: DateTime<Utc>,
    pub cert_chain: String,
    pub private_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuing_ca: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name)
            .field("serial_number", &self.serial_number)
            .field("not_after", &self.not_after)
            .field("private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

// ─── Route rules ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMatchKind {
    Exact,
    Prefix,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMatch {
    pub match_type: PathMatchKind,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueMatchKind {
    Exact,
    Regex,
}

/// A set of header or query-param matchers sharing one match kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMatchSet {
    pub match_type: ValueMatchKind,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcMethod {
    pub match_type: ValueMatchKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// One ordered match within a hostname; the first matching entry wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<ValueMatchSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<ValueMatchSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_method: Option<GrpcMethod>,
    /// `serviceKey → weight`. Empty means the match answers 503.
    #[serde(default)]
    pub backend_service: BTreeMap<String, i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "routeType")]
pub enum L7RouteSpec {
    #[serde(rename = "HTTP")]
    Http { matches: Vec<TrafficMatch> },
    #[serde(rename = "GRPC")]
    Grpc { matches: Vec<TrafficMatch> },
}

impl L7RouteSpec {
    pub fn matches(&self) -> &[TrafficMatch] {
        match self {
            L7RouteSpec::Http { matches } | L7RouteSpec::Grpc { matches } => matches,
        }
    }

    pub fn route_type(&self) -> &'static str {
        match self {
            L7RouteSpec::Http { .. } => "HTTP",
            L7RouteSpec::Grpc { .. } => "GRPC",
        }
    }

    /// Append `other`'s matches when both specs have the same route type.
    /// Returns false (and leaves `self` untouched) on a type mismatch.
    pub fn merge(&mut self, other: L7RouteSpec) -> bool {
        match (self, other) {
            (L7RouteSpec::Http { matches }, L7RouteSpec::Http { matches: more })
            | (L7RouteSpec::Grpc { matches }, L7RouteSpec::Grpc { matches: more }) => {
                matches.extend(more);
                true
            }
            _ => false,
        }
    }
}

/// Rule set of one listener port, shaped by the listener's protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteRule {
    /// `hostname → route spec`
    L7(BTreeMap<String, L7RouteSpec>),
    /// `serviceKey → weight`
    Tcp(BTreeMap<String, i32>),
    /// `hostname → (serviceKey → weight)`
    TlsTerminate(BTreeMap<String, BTreeMap<String, i32>>),
    /// `hostname → "host:port"`
    TlsPassthrough(BTreeMap<String, String>),
}

impl RouteRule {
    /// Every serviceKey the rule routes to.
    pub fn service_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        match self {
            RouteRule::L7(hosts) => {
                for spec in hosts.values() {
                    for m in spec.matches() {
                        keys.extend(m.backend_service.keys().map(String::as_str));
                    }
                }
            }
            RouteRule::Tcp(backends) => keys.extend(backends.keys().map(String::as_str)),
            RouteRule::TlsTerminate(hosts) => {
                for backends in hosts.values() {
                    keys.extend(backends.keys().map(String::as_str));
                }
            }
            RouteRule::TlsPassthrough(_) => {}
        }
        keys
    }

    pub fn hostnames(&self) -> Vec<&str> {
        match self {
            RouteRule::L7(hosts) => hosts.keys().map(String::as_str).collect(),
            RouteRule::TlsTerminate(hosts) => hosts.keys().map(String::as_str).collect(),
            RouteRule::TlsPassthrough(hosts) => hosts.keys().map(String::as_str).collect(),
            RouteRule::Tcp(_) => Vec::new(),
        }
    }
}

// ─── Services ─────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamCert {
    pub cert_chain: String,
    pub private_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuing_ca: String,
}

impl fmt::Debug for UpstreamCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamCert")
            .field("private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub weight: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_cert: Option<UpstreamCert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub retry_on: String,
    pub per_try_timeout_ms: u64,
    pub num_retries: u32,
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreaker {
    pub min_request_amount: u32,
    pub stat_time_window: u32,
    pub slow_time_threshold: f64,
    pub slow_amount_threshold: u32,
    pub slow_ratio_threshold: f64,
    pub error_amount_threshold: u32,
    pub error_ratio_threshold: f64,
    pub degraded_time_window: u32,
    pub degraded_status_code: u16,
    pub degraded_response_content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// `address:port → endpoint`
    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,
    /// Ordered by filter type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<HTTPRouteFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_cert: Option<UpstreamCert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterChains {
    #[serde(rename = "inbound-http")]
    pub inbound_http: Vec<String>,
    #[serde(rename = "inbound-tcp")]
    pub inbound_tcp: Vec<String>,
    #[serde(rename = "outbound-http")]
    pub outbound_http: Vec<String>,
    #[serde(rename = "outbound-tcp")]
    pub outbound_tcp: Vec<String>,
}

impl Default for FilterChains {
    fn default() -> Self {
        let owned = |chain: &[&str]| chain.iter().map(|m| m.to_string()).collect();
        Self {
            inbound_http: owned(INBOUND_HTTP_CHAIN),
            inbound_tcp: owned(INBOUND_TCP_CHAIN),
            outbound_http: owned(OUTBOUND_HTTP_CHAIN),
            outbound_tcp: owned(OUTBOUND_TCP_CHAIN),
        }
    }
}

/// The gateway document published as `config.json` for one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    pub listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_certificate: Option<Certificate>,
    /// Keyed by listener port.
    #[serde(default)]
    pub route_rules: BTreeMap<u16, RouteRule>,
    /// Keyed by serviceKey.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default)]
    pub filter_chains: FilterChains,
}

impl ConfigSpec {
    /// serviceKeys referenced by a rule but missing from `services`.
    pub fn dangling_service_keys(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .route_rules
            .values()
            .flat_map(|rule| rule.service_keys())
            .filter(|key| !self.services.contains_key(*key))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spec() -> ConfigSpec {
        let mut backends = BTreeMap::new();
        backends.insert("ns1/api:8080".to_string(), 1);
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "x.example".to_string(),
            L7RouteSpec::Http {
                matches: vec![TrafficMatch {
                    path: Some(PathMatch {
                        match_type: PathMatchKind::Prefix,
                        path: "/api".to_string(),
                    }),
                    backend_service: backends,
                    ..Default::default()
                }],
            },
        );
        let mut spec = ConfigSpec {
            listeners: vec![Listener {
                protocol: Protocol::HTTP,
                port: 80,
                tls: None,
            }],
            ..Default::default()
        };
        spec.route_rules.insert(80, RouteRule::L7(hosts));
        spec
    }

    #[test]
    fn service_port_name_display() {
        let svc = NamespacedName::new("default", "bookstore");
        assert_eq!(
            ServicePortName::with_number(svc.clone(), Some(80)).to_string(),
            "default/bookstore:80"
        );
        assert_eq!(ServicePortName::new(svc.clone(), None).to_string(), "default/bookstore");
        assert_eq!(
            ServicePortName::new(svc, Some(String::new())).to_string(),
            "default/bookstore"
        );
    }

    #[test]
    fn config_spec_survives_json() {
        let mut spec = make_spec();
        spec.services
            .insert("ns1/api:8080".to_string(), ServiceConfig::default());
        let json = serde_json::to_string(&spec).unwrap();
        let back: ConfigSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert!(json.contains("\"routeType\":\"HTTP\""));
        assert!(json.contains("\"inbound-http\""));
    }

    #[test]
    fn dangling_keys_are_reported() {
        let spec = make_spec();
        assert_eq!(spec.dangling_service_keys(), vec!["ns1/api:8080"]);
    }

    #[test]
    fn l7_merge_requires_same_type() {
        let mut http = L7RouteSpec::Http {
            matches: vec![TrafficMatch::default()],
        };
        assert!(http.merge(L7RouteSpec::Http {
            matches: vec![TrafficMatch::default()]
        }));
        assert_eq!(http.matches().len(), 2);
        assert!(!http.merge(L7RouteSpec::Grpc { matches: vec![] }));
        assert_eq!(http.route_type(), "HTTP");
    }

    #[test]
    fn certificate_debug_redacts_key() {
        let cert = Certificate {
            common_name: "a.example".to_string(),
            serial_number: "01".to_string(),
            not_after: Utc::now(),
            cert_chain: "CHAIN".to_string(),
            private_key: "SECRET-KEY".to_string(),
            issuing_ca: String::new(),
        };
        let out = format!("{:?}", cert);
        assert!(!out.contains("SECRET-KEY"));
        assert!(!out.contains("CHAIN"));
    }
}
