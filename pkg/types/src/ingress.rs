use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;
use pkg_constants::annotations::{DEFAULT_INGRESS_CLASS_ANNOTATION, INGRESS_CLASS_ANNOTATION};

/// Path matching type for Ingress rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathType {
    #[default]
    Prefix,
    Exact,
    ImplementationSpecific,
}

/// Port of the backend Service, by name or by number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceBackendPort {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub number: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressServiceBackend {
    pub name: String,
    #[serde(default)]
    pub port: ServiceBackendPort,
}

/// Backend service target for an Ingress path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressBackend {
    #[serde(default)]
    pub service: Option<IngressServiceBackend>,
}

/// A single path rule within an Ingress HTTP rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HTTPIngressPath {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_type: PathType,
    pub backend: IngressBackend,
}

/// HTTP rules for a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HTTPIngressRuleValue {
    #[serde(default)]
    pub paths: Vec<HTTPIngressPath>,
}

/// A single host-based Ingress rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub http: Option<HTTPIngressRuleValue>,
}

/// TLS configuration for an Ingress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressTLS {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub secret_name: Option<String>,
}

/// Ingress specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default)]
    pub ingress_class_name: Option<String>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
    #[serde(default)]
    pub tls: Vec<IngressTLS>,
}

/// Ingress resource for external traffic routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingress {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IngressSpec,
}

impl Ingress {
    /// Declared class: the legacy annotation wins over `spec.ingressClassName`.
    pub fn class(&self) -> Option<&str> {
        self.metadata
            .annotation(INGRESS_CLASS_ANNOTATION)
            .or(self.spec.ingress_class_name.as_deref())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressClassSpec {
    #[serde(default)]
    pub controller: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressClass {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IngressClassSpec,
}

impl IngressClass {
    pub fn is_default(&self) -> bool {
        self.metadata.annotation(DEFAULT_INGRESS_CLASS_ANNOTATION) == Some("true")
    }
}
