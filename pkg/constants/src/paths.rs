//! Repository path templates, artifact names and config file locations.

// ─── Config files ─────────────────────────────────────────────────────────

/// Default config file path for the controller.
pub const DEFAULT_CONTROLLER_CONFIG: &str = "/etc/fleetgate/controller.yaml";

/// Default config file path for the aggregator.
pub const DEFAULT_AGGREGATOR_CONFIG: &str = "/etc/fleetgate/aggregator.yaml";

/// Default directory of YAML manifests seeding the in-memory watch source.
pub const DEFAULT_MANIFEST_DIR: &str = "/etc/fleetgate/manifests";

// ─── Base path templates ──────────────────────────────────────────────────
//
// Placeholders: `{region}`, `{zone}`, `{group}`, `{cluster}` and, for
// gateways only, `{namespace}`.

pub const DEFAULT_INGRESS_PATH_TEMPLATE: &str = "/{region}/{zone}/{group}/{cluster}/ingress/";

pub const DEFAULT_SERVICE_PATH_TEMPLATE: &str = "/{region}/{zone}/{group}/{cluster}/services/";

pub const DEFAULT_GATEWAY_PATH_TEMPLATE: &str =
    "/{region}/{zone}/{group}/{cluster}/gateways/{namespace}/";

/// Parent codebase every per-namespace gateway codebase derives from.
pub const DEFAULT_GATEWAYS_PARENT_PATH: &str = "/base/gateways/";

/// Parent codebase of per-cluster ingress codebases.
pub const DEFAULT_INGRESS_PARENT_PATH: &str = "/base/ingress/";

/// Parent codebase of per-cluster service codebases.
pub const DEFAULT_SERVICES_PARENT_PATH: &str = "/base/services/";

/// Placeholder names accepted in path templates.
pub const TEMPLATE_PLACEHOLDERS: &[&str] = &["region", "zone", "group", "cluster", "namespace"];

// ─── Artifacts ────────────────────────────────────────────────────────────

/// Directory inside a codebase holding the generated JSON artifacts.
pub const CONFIG_DIR: &str = "/config";

pub const ROUTER_FILE: &str = "router.json";

pub const BALANCER_FILE: &str = "balancer.json";

pub const REGISTRY_FILE: &str = "registry.json";

pub const CERTIFICATES_FILE: &str = "certificates.json";

/// Gateway codebases carry a single document at their root.
pub const GATEWAY_CONFIG_DIR: &str = "/";

pub const GATEWAY_CONFIG_FILE: &str = "config.json";
