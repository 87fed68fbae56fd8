use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pkg_constants::annotations::DEFAULT_INGRESS_CLASS;
use pkg_constants::gateway::DEFAULT_CONTROLLER_NAME;
use pkg_route::Rejection;
use pkg_route::gateway::GatewaySnapshot;
use pkg_route::ingress::IngressSnapshot;
use pkg_route::service::ServiceSnapshot;
use pkg_types::{Kind, NamespacedName, Object};
use tracing::{debug, warn};

use crate::gateway::GatewayIndex;
use crate::ingress::IngressIndex;
use crate::processor::{Processor, processors};
use crate::services::ServiceIndex;
use crate::status::StatusWriter;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Ingress class served by this controller.
    pub ingress_class: String,
    /// `controllerName` of the GatewayClasses served by this controller.
    pub controller_name: String,
    /// Certificate presented by gateway listeners that have none.
    pub global_certificate: Option<NamespacedName>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ingress_class: DEFAULT_INGRESS_CLASS.to_string(),
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            global_certificate: None,
        }
    }
}

/// Everything a sync publishes, read under the index locks.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub services: ServiceSnapshot,
    pub ingress: IngressSnapshot,
    /// Active gateways, keyed by namespace.
    pub gateways: BTreeMap<String, GatewaySnapshot>,
    pub rejections: Vec<Rejection>,
}

/// The watched objects of one cluster.
///
/// Three index families, each behind its own lock. Locks are always taken
/// in the order services, ingress, gateways.
pub struct ResourceCache {
    pub(crate) config: CacheConfig,
    pub(crate) services: RwLock<ServiceIndex>,
    pub(crate) ingress: RwLock<IngressIndex>,
    pub(crate) gateways: RwLock<GatewayIndex>,
    processors: BTreeMap<Kind, Arc<dyn Processor>>,
    status: StatusWriter,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            services: RwLock::new(ServiceIndex::default()),
            ingress: RwLock::new(IngressIndex::new(config.ingress_class.clone())),
            gateways: RwLock::new(GatewayIndex::new(config.controller_name.clone())),
            processors: processors(),
            status: StatusWriter::new(),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `current` (None on delete) and report whether the change is
    /// material.
    pub fn apply(&self, kind: Kind, key: &NamespacedName, current: Option<&Object>) -> bool {
        let Some(processor) = self.processors.get(&kind) else {
            warn!("No processor for kind {}", kind);
            return false;
        };
        if current.is_none() {
            self.status.forget(kind, key);
        }
        let material = processor.process(self, key, current);
        if material {
            debug!("Material change to {}/{}", kind, key);
        }
        material
    }

    pub fn insert(&self, object: &Object) -> bool {
        self.apply(object.kind(), &object.key(), Some(object))
    }

    pub fn delete(&self, object: &Object) -> bool {
        self.apply(object.kind(), &object.key(), None)
    }

    pub fn status_writer(&self) -> &StatusWriter {
        &self.status
    }

    /// Fold pending changes into the derived maps and read everything a
    /// sync needs. Status computed along the way is queued on the writer.
    pub fn build(&self) -> CacheSnapshot {
        let mut services = self.services.write();
        let mut ingress = self.ingress.write();
        let mut gateways = self.gateways.write();

        let mut rejections = services.apply_pending();
        rejections.extend(ingress.rebuild(&services));
        if gateways.take_changed() {
            debug!("Gateway objects changed since last sync");
        }

        let global_certificate = self
            .config
            .global_certificate
            .as_ref()
            .and_then(|key| services.secrets().get(key));
        let active = gateways.active(services.secrets());
        let gateway_snapshots = gateways.snapshots(&active, &services, global_certificate);
        for update in gateways.statuses(&active, &services) {
            self.status.enqueue(update);
        }

        let snapshot = CacheSnapshot {
            services: services.snapshot(),
            ingress: ingress.snapshot(&services),
            gateways: gateway_snapshots,
            rejections,
        };

        drop(gateways);
        drop(ingress);
        drop(services);
        snapshot
    }
}
