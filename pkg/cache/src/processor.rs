//! One processor per watched kind.
//!
//! A processor stores the object in the index that owns its kind and says
//! whether the change can alter a published document. Processors take one
//! index lock at a time, always in the order services, ingress, gateways.

use std::collections::BTreeMap;
use std::sync::Arc;

use pkg_types::{Kind, NamespacedName, Object};

use crate::cache::ResourceCache;

pub trait Processor: Send + Sync {
    /// Store `current` (None on delete) under `key`. Returns true when the
    /// change is material.
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>)
    -> bool;
}

/// A service matters when something routes to it or it is exported.
fn is_routable(cache: &ResourceCache, service: &NamespacedName) -> bool {
    cache.services.read().is_exported(service)
        || cache.ingress.read().references_service(service)
        || cache.gateways.read().references_service(service)
}

struct ServicesProcessor;

impl Processor for ServicesProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let service = match current {
            Some(Object::Service(s)) => Some(s),
            _ => None,
        };
        let exported_before = cache.services.read().is_exported(key);
        if !cache.services.write().set_service(key, service) {
            return false;
        }
        // Ingress backends may refer to ports by number.
        cache.ingress.write().mark_stale();
        exported_before || is_routable(cache, key)
    }
}

struct EndpointsProcessor;

impl Processor for EndpointsProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let endpoints = match current {
            Some(Object::Endpoints(e)) => Some(e),
            _ => None,
        };
        cache.services.write().set_endpoints(key, endpoints) && is_routable(cache, key)
    }
}

struct EndpointSlicesProcessor;

impl Processor for EndpointSlicesProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let slice = match current {
            Some(Object::EndpointSlice(s)) => Some(s),
            _ => None,
        };
        let owner = cache.services.write().set_slice(key, slice);
        owner.is_some_and(|service| cache.gateways.read().references_service(&service))
    }
}

struct ServiceImportsProcessor;

impl Processor for ServiceImportsProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let import = match current {
            Some(Object::ServiceImport(i)) => Some(i),
            _ => None,
        };
        cache.services.write().set_import(key, import) && is_routable(cache, key)
    }
}

struct SecretsProcessor;

impl Processor for SecretsProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let secret = match current {
            Some(Object::Secret(s)) => Some(s),
            _ => None,
        };
        if !cache.services.write().set_secret(key, secret) {
            return false;
        }
        cache.ingress.write().mark_stale();
        cache.config.global_certificate.as_ref() == Some(key)
            || cache.services.read().references_secret(key)
            || cache.ingress.read().references_secret(key)
            || cache.gateways.read().references_secret(key)
    }
}

struct NamespacesProcessor;

impl Processor for NamespacesProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let labels = current.map(|o| &o.meta().labels);
        cache.services.write().set_namespace(&key.name, labels) && cache.gateways.read().has_routes()
    }
}

struct IngressesProcessor;

impl Processor for IngressesProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let ingress = match current {
            Some(Object::Ingress(i)) => Some(i),
            _ => None,
        };
        cache.ingress.write().set_ingress(key, ingress)
    }
}

struct IngressClassesProcessor;

impl Processor for IngressClassesProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let class = match current {
            Some(Object::IngressClass(c)) => Some(c),
            _ => None,
        };
        cache.ingress.write().set_class(&key.name, class)
    }
}

struct GatewayClassesProcessor;

impl Processor for GatewayClassesProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let class = match current {
            Some(Object::GatewayClass(c)) => Some(c),
            _ => None,
        };
        cache.gateways.write().set_class(&key.name, class)
    }
}

struct GatewaysProcessor;

impl Processor for GatewaysProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        let gateway = match current {
            Some(Object::Gateway(g)) => Some(g),
            _ => None,
        };
        cache.gateways.write().set_gateway(key, gateway)
    }
}

struct RoutesProcessor {
    kind: Kind,
}

impl Processor for RoutesProcessor {
    fn process(&self, cache: &ResourceCache, key: &NamespacedName, current: Option<&Object>) -> bool {
        cache.gateways.write().set_route(self.kind, key, current)
    }
}

/// The processor table, keyed by kind.
pub fn processors() -> BTreeMap<Kind, Arc<dyn Processor>> {
    let mut table: BTreeMap<Kind, Arc<dyn Processor>> = BTreeMap::new();
    table.insert(Kind::Service, Arc::new(ServicesProcessor));
    table.insert(Kind::Endpoints, Arc::new(EndpointsProcessor));
    table.insert(Kind::EndpointSlice, Arc::new(EndpointSlicesProcessor));
    table.insert(Kind::ServiceImport, Arc::new(ServiceImportsProcessor));
    table.insert(Kind::Secret, Arc::new(SecretsProcessor));
    table.insert(Kind::Namespace, Arc::new(NamespacesProcessor));
    table.insert(Kind::Ingress, Arc::new(IngressesProcessor));
    table.insert(Kind::IngressClass, Arc::new(IngressClassesProcessor));
    table.insert(Kind::GatewayClass, Arc::new(GatewayClassesProcessor));
    table.insert(Kind::Gateway, Arc::new(GatewaysProcessor));
    for kind in [Kind::HTTPRoute, Kind::GRPCRoute, Kind::TLSRoute, Kind::TCPRoute] {
        table.insert(kind, Arc::new(RoutesProcessor { kind }));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_processor() {
        let table = processors();
        for kind in Kind::ALL {
            assert!(table.contains_key(&kind), "no processor for {}", kind);
        }
    }
}
