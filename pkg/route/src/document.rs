//! Per-cluster documents exchanged with the aggregator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fingerprint::{Fingerprint, fingerprint};
use crate::ingress::AlgoBalancer;
use crate::template::RouteBase;

/// Identity of the sending cluster, shared by both document kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub uid: String,
    #[serde(flatten)]
    pub base: RouteBase,
    /// Externally reachable `host:port` of the cluster's gateway.
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteEntry {
    pub host: String,
    pub path: String,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewrite: Vec<String>,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub balancer: AlgoBalancer,
    #[serde(rename = "isTLS", default)]
    pub is_tls: bool,
    /// `ip:port` targets, sorted.
    #[serde(default)]
    pub upstreams: Vec<String>,
}

impl IngressRouteEntry {
    pub fn router_key(&self) -> String {
        format!("{}{}", self.host, self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressRoute {
    #[serde(flatten)]
    pub header: DocumentHeader,
    #[serde(default)]
    pub hash: Fingerprint,
    #[serde(default)]
    pub routes: Vec<IngressRouteEntry>,
}

impl IngressRoute {
    /// Build a document and stamp it with the fingerprint of its content.
    pub fn new(header: DocumentHeader, routes: Vec<IngressRouteEntry>) -> anyhow::Result<Self> {
        let mut doc = Self {
            header,
            hash: Fingerprint::default(),
            routes,
        };
        doc.hash = fingerprint(&doc)?;
        Ok(doc)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRouteEntry {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port_name: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub export: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub export_name: String,
}

impl ServiceRouteEntry {
    fn port_suffix(&self) -> String {
        if self.port_name.is_empty() {
            String::new()
        } else {
            format!(":{}", self.port_name)
        }
    }

    /// Registry key inside the owning cluster.
    pub fn key(&self) -> String {
        format!("{}/{}{}", self.namespace, self.name, self.port_suffix())
    }

    /// Registry key seen by other clusters of the fleet.
    pub fn export_key(&self) -> String {
        let name = if self.export && !self.export_name.is_empty() {
            &self.export_name
        } else {
            &self.name
        };
        format!("{}/{}{}", self.namespace, name, self.port_suffix())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRoute {
    #[serde(flatten)]
    pub header: DocumentHeader,
    #[serde(default)]
    pub hash: Fingerprint,
    #[serde(default)]
    pub routes: Vec<ServiceRouteEntry>,
}

impl ServiceRoute {
    pub fn new(header: DocumentHeader, routes: Vec<ServiceRouteEntry>) -> anyhow::Result<Self> {
        let mut doc = Self {
            header,
            hash: Fingerprint::default(),
            routes,
        };
        doc.hash = fingerprint(&doc)?;
        Ok(doc)
    }
}

/// Body of every aggregator response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            result: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Some(message.into()),
        }
    }
}
