//! Annotation and label keys read from watched objects.

// ─── Ingress ──────────────────────────────────────────────────────────────

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

pub const DEFAULT_INGRESS_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";

/// Ingress class served by this controller unless configured otherwise.
pub const DEFAULT_INGRESS_CLASS: &str = "fleetgate";

pub const REWRITE_TARGET_FROM: &str = "fleetgate.io/rewrite-target-from";

pub const REWRITE_TARGET_TO: &str = "fleetgate.io/rewrite-target-to";

pub const SESSION_STICKY: &str = "fleetgate.io/session-sticky";

pub const LOAD_BALANCER: &str = "fleetgate.io/load-balancer";

pub const UPSTREAM_SSL_NAME: &str = "fleetgate.io/upstream-ssl-name";

/// `namespace/name` of a TLS secret presented to the upstream.
pub const UPSTREAM_SSL_SECRET: &str = "fleetgate.io/upstream-ssl-secret";

pub const UPSTREAM_SSL_VERIFY: &str = "fleetgate.io/upstream-ssl-verify";

// ─── Service policy ───────────────────────────────────────────────────────

pub const RETRY_ON: &str = "fleetgate.io/retry-on";

pub const RETRY_PER_TRY_TIMEOUT_MS: &str = "fleetgate.io/retry-per-try-timeout-ms";

pub const RETRY_MAX: &str = "fleetgate.io/retry-max";

pub const RETRY_BACKOFF_BASE_MS: &str = "fleetgate.io/retry-backoff-base-ms";

/// JSON-encoded circuit breaker settings.
pub const CIRCUIT_BREAKER: &str = "fleetgate.io/circuit-breaker";

// ─── Multi-cluster ────────────────────────────────────────────────────────

pub const CLUSTER_EXPORT: &str = "cluster.fleetgate.io/export";

pub const CLUSTER_EXPORT_NAME: &str = "cluster.fleetgate.io/export-name";

// ─── Labels ───────────────────────────────────────────────────────────────

/// Label tying an EndpointSlice to its owning Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

// ─── Secrets ──────────────────────────────────────────────────────────────

pub const TLS_CERT_KEY: &str = "tls.crt";

pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

pub const CA_CERT_KEY: &str = "ca.crt";
