use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;
use crate::service::default_protocol;

/// Where an imported endpoint lives in its source cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportTarget {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ip: String,
    pub port: i32,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedEndpoint {
    /// `region/zone/group/cluster` of the exporting cluster.
    pub cluster_key: String,
    pub target: ImportTarget,
}

impl ImportedEndpoint {
    /// `ip:port`, falling back to the host when no IP is known.
    pub fn address(&self) -> String {
        let host = if self.target.ip.is_empty() {
            &self.target.host
        } else {
            &self.target.ip
        };
        format!("{}:{}", host, self.target.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportedServicePort {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub port: i32,
    #[serde(default)]
    pub endpoints: Vec<ImportedEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceImportSpec {
    #[serde(default)]
    pub ports: Vec<ImportedServicePort>,
}

/// A Service exported by other clusters of the fleet and imported here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceImport {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceImportSpec,
}
