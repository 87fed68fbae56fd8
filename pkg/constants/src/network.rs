//! Network-related constants.

/// Default port for the aggregator HTTP server.
pub const DEFAULT_AGGREGATOR_PORT: u16 = 6767;

/// Default address of the proxy's content repository.
pub const DEFAULT_REPO_ADDR: &str = "http://127.0.0.1:6060";

/// Aggregator endpoint receiving per-cluster service documents.
pub const AGGREGATOR_SERVICE_PATH: &str = "/api/v1/service";

/// Aggregator endpoint receiving per-cluster ingress documents.
pub const AGGREGATOR_INGRESS_PATH: &str = "/api/v1/ingress";

/// Liveness probe path.
pub const HEALTH_PATH: &str = "/healthz";

/// Readiness probe path.
pub const READY_PATH: &str = "/readyz";

/// Per-request timeout for controller → aggregator pushes, in seconds.
pub const AGGREGATOR_CLIENT_TIMEOUT_SECS: u64 = 5;

/// Aggregator publication ticker interval, in seconds.
pub const DEFAULT_AGGREGATOR_INTERVAL_SECS: u64 = 5;

/// Controllers re-post unchanged documents to the aggregator this often, in
/// seconds, so the aggregator can tell a quiet cluster from a gone one.
pub const AGGREGATOR_REFRESH_SECS: u64 = 60;

/// The aggregator drops the documents of a cluster that has not reported
/// for this long, in seconds. Zero keeps them forever.
pub const DEFAULT_DOCUMENT_TTL_SECS: u64 = 300;
