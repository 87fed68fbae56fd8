use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::endpoint::{EndpointSlice, Endpoints};
use crate::gateway::{Gateway, GatewayClass};
use crate::ingress::{Ingress, IngressClass};
use crate::meta::{NamespacedName, ObjectMeta};
use crate::multicluster::ServiceImport;
use crate::namespace::Namespace;
use crate::route::{GRPCRoute, HTTPRoute, TCPRoute, TLSRoute};
use crate::secret::Secret;
use crate::service::Service;

/// Kind of a watched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Namespace,
    Secret,
    Service,
    Endpoints,
    EndpointSlice,
    ServiceImport,
    IngressClass,
    Ingress,
    GatewayClass,
    Gateway,
    HTTPRoute,
    GRPCRoute,
    TCPRoute,
    TLSRoute,
}

impl Kind {
    pub const ALL: [Kind; 14] = [
        Kind::Namespace,
        Kind::Secret,
        Kind::Service,
        Kind::Endpoints,
        Kind::EndpointSlice,
        Kind::ServiceImport,
        Kind::IngressClass,
        Kind::Ingress,
        Kind::GatewayClass,
        Kind::Gateway,
        Kind::HTTPRoute,
        Kind::GRPCRoute,
        Kind::TCPRoute,
        Kind::TLSRoute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Namespace => "Namespace",
            Kind::Secret => "Secret",
            Kind::Service => "Service",
            Kind::Endpoints => "Endpoints",
            Kind::EndpointSlice => "EndpointSlice",
            Kind::ServiceImport => "ServiceImport",
            Kind::IngressClass => "IngressClass",
            Kind::Ingress => "Ingress",
            Kind::GatewayClass => "GatewayClass",
            Kind::Gateway => "Gateway",
            Kind::HTTPRoute => "HTTPRoute",
            Kind::GRPCRoute => "GRPCRoute",
            Kind::TCPRoute => "TCPRoute",
            Kind::TLSRoute => "TLSRoute",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown kind '{}'", s))
    }
}

/// Any watched object, tagged by `kind` as in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Object {
    Namespace(Namespace),
    Secret(Secret),
    Service(Service),
    Endpoints(Endpoints),
    EndpointSlice(EndpointSlice),
    ServiceImport(ServiceImport),
    IngressClass(IngressClass),
    Ingress(Ingress),
    GatewayClass(GatewayClass),
    Gateway(Gateway),
    HTTPRoute(HTTPRoute),
    GRPCRoute(GRPCRoute),
    TCPRoute(TCPRoute),
    TLSRoute(TLSRoute),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Namespace(_) => Kind::Namespace,
            Object::Secret(_) => Kind::Secret,
            Object::Service(_) => Kind::Service,
            Object::Endpoints(_) => Kind::Endpoints,
            Object::EndpointSlice(_) => Kind::EndpointSlice,
            Object::ServiceImport(_) => Kind::ServiceImport,
            Object::IngressClass(_) => Kind::IngressClass,
            Object::Ingress(_) => Kind::Ingress,
            Object::GatewayClass(_) => Kind::GatewayClass,
            Object::Gateway(_) => Kind::Gateway,
            Object::HTTPRoute(_) => Kind::HTTPRoute,
            Object::GRPCRoute(_) => Kind::GRPCRoute,
            Object::TCPRoute(_) => Kind::TCPRoute,
            Object::TLSRoute(_) => Kind::TLSRoute,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Object::Namespace(o) => &o.metadata,
            Object::Secret(o) => &o.metadata,
            Object::Service(o) => &o.metadata,
            Object::Endpoints(o) => &o.metadata,
            Object::EndpointSlice(o) => &o.metadata,
            Object::ServiceImport(o) => &o.metadata,
            Object::IngressClass(o) => &o.metadata,
            Object::Ingress(o) => &o.metadata,
            Object::GatewayClass(o) => &o.metadata,
            Object::Gateway(o) => &o.metadata,
            Object::HTTPRoute(o) => &o.metadata,
            Object::GRPCRoute(o) => &o.metadata,
            Object::TCPRoute(o) => &o.metadata,
            Object::TLSRoute(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Object::Namespace(o) => &mut o.metadata,
            Object::Secret(o) => &mut o.metadata,
            Object::Service(o) => &mut o.metadata,
            Object::Endpoints(o) => &mut o.metadata,
            Object::EndpointSlice(o) => &mut o.metadata,
            Object::ServiceImport(o) => &mut o.metadata,
            Object::IngressClass(o) => &mut o.metadata,
            Object::Ingress(o) => &mut o.metadata,
            Object::GatewayClass(o) => &mut o.metadata,
            Object::Gateway(o) => &mut o.metadata,
            Object::HTTPRoute(o) => &mut o.metadata,
            Object::GRPCRoute(o) => &mut o.metadata,
            Object::TCPRoute(o) => &mut o.metadata,
            Object::TLSRoute(o) => &mut o.metadata,
        }
    }

    pub fn key(&self) -> NamespacedName {
        self.meta().key()
    }

    /// `Kind/namespace/name`, used in logs and events.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind(), self.key())
    }
}
