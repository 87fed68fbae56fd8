//! Gateway API identifiers, condition types and reason codes.

/// `controllerName` a GatewayClass must carry to be served by this controller.
pub const DEFAULT_CONTROLLER_NAME: &str = "fleetgate.io/gateway-controller";

/// API group of Gateway API objects.
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// API group of the multi-cluster ServiceImport resource.
pub const MULTICLUSTER_GROUP: &str = "fleetgate.io";

/// Upstream port used by a TLS passthrough target when the backend names none.
pub const DEFAULT_PASSTHROUGH_PORT: i32 = 443;

// ─── Condition types ──────────────────────────────────────────────────────

pub const CONDITION_ACCEPTED: &str = "Accepted";

pub const CONDITION_ACTIVE: &str = "Active";

pub const CONDITION_RESOLVED_REFS: &str = "ResolvedRefs";

// ─── Reasons ──────────────────────────────────────────────────────────────

pub const REASON_ACCEPTED: &str = "Accepted";

pub const REASON_UNACCEPTED: &str = "Unaccepted";

pub const REASON_ACTIVE: &str = "Active";

pub const REASON_INACTIVE: &str = "Inactive";

pub const REASON_RESOLVED_REFS: &str = "ResolvedRefs";

pub const REASON_BACKEND_NOT_FOUND: &str = "BackendNotFound";

pub const REASON_NO_MATCHING_PARENT: &str = "NoMatchingParent";

pub const REASON_NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";

pub const REASON_NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";

// ─── Filter chains ────────────────────────────────────────────────────────

pub const INBOUND_HTTP_CHAIN: &[&str] = &[
    "modules/inbound-tls-termination.js",
    "modules/inbound-http-routing.js",
    "modules/inbound-metrics-http.js",
    "modules/inbound-tracing-http.js",
    "modules/inbound-logging-http.js",
    "modules/inbound-throttle-service.js",
    "modules/inbound-throttle-route.js",
    "modules/inbound-http-load-balancing.js",
    "modules/inbound-http-default.js",
];

pub const INBOUND_TCP_CHAIN: &[&str] = &[
    "modules/inbound-tls-termination.js",
    "modules/inbound-tcp-routing.js",
    "modules/inbound-tcp-load-balancing.js",
    "modules/inbound-tcp-default.js",
];

pub const OUTBOUND_HTTP_CHAIN: &[&str] = &[
    "modules/outbound-http-routing.js",
    "modules/outbound-metrics-http.js",
    "modules/outbound-tracing-http.js",
    "modules/outbound-logging-http.js",
    "modules/outbound-circuit-breaker.js",
    "modules/outbound-http-load-balancing.js",
    "modules/outbound-http-default.js",
];

pub const OUTBOUND_TCP_CHAIN: &[&str] = &[
    "modules/outbound-tcp-routing.js",
    "modules/outbound-tcp-load-balancing.js",
    "modules/outbound-tcp-default.js",
];
