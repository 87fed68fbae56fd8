use serde::{Deserialize, Serialize};

/// Controller configuration file (YAML).
///
/// Example `controller.yaml`:
/// ```yaml
/// repo: http://127.0.0.1:6060
/// region: eu
/// zone: west-1
/// group: default
/// cluster: c1
/// gateway-address: 10.0.0.1:80
/// min-sync-period-secs: 3
/// burst-syncs: 2
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default, alias = "repo-api-path")]
    pub repo_api_path: Option<String>,
    #[serde(default)]
    pub aggregator: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default, alias = "gateway-address")]
    pub gateway_address: Option<String>,
    #[serde(default, alias = "ingress-class")]
    pub ingress_class: Option<String>,
    #[serde(default, alias = "gateway-controller-name")]
    pub gateway_controller_name: Option<String>,
    #[serde(default, alias = "min-sync-period-secs")]
    pub min_sync_period_secs: Option<u64>,
    #[serde(default, alias = "sync-period-secs")]
    pub sync_period_secs: Option<u64>,
    #[serde(default, alias = "burst-syncs")]
    pub burst_syncs: Option<u32>,
    #[serde(default, alias = "ingress-path-template")]
    pub ingress_path_template: Option<String>,
    #[serde(default, alias = "service-path-template")]
    pub service_path_template: Option<String>,
    #[serde(default, alias = "gateway-path-template")]
    pub gateway_path_template: Option<String>,
    #[serde(default, alias = "gateways-parent-path")]
    pub gateways_parent_path: Option<String>,
    #[serde(default)]
    pub manifests: Option<String>,
    #[serde(default, alias = "global-certificate-secret")]
    pub global_certificate_secret: Option<String>,
}

/// Aggregator configuration file (YAML).
///
/// Example `aggregator.yaml`:
/// ```yaml
/// port: 6767
/// repo: http://127.0.0.1:6060
/// interval-secs: 5
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default, alias = "repo-api-path")]
    pub repo_api_path: Option<String>,
    #[serde(default, alias = "ingress-path-template")]
    pub ingress_path_template: Option<String>,
    #[serde(default, alias = "service-path-template")]
    pub service_path_template: Option<String>,
    #[serde(default, alias = "interval-secs")]
    pub interval_secs: Option<u64>,
    #[serde(default, alias = "document-ttl-secs")]
    pub document_ttl_secs: Option<u64>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
