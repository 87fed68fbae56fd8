//! Fleet aggregator: collects the documents every cluster pushes and
//! publishes merged router, balancer and registry files per cluster.

pub mod handlers;
pub mod merge;
pub mod publisher;
pub mod request_id;
pub mod server;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pkg_route::document::{IngressRoute, ServiceRoute};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Latest document of every cluster, keyed by uid.
///
/// Locks are taken in the order `last_seen`, `ingress`, `services`.
#[derive(Default)]
pub struct DocumentStore {
    pub ingress: RwLock<BTreeMap<String, IngressRoute>>,
    pub services: RwLock<BTreeMap<String, ServiceRoute>>,
    /// When each cluster last posted anything.
    pub last_seen: RwLock<BTreeMap<String, Instant>>,
}

impl DocumentStore {
    pub async fn touch(&self, uid: &str) {
        self.last_seen
            .write()
            .await
            .insert(uid.to_string(), Instant::now());
    }

    /// Drop every document of clusters silent for longer than `ttl`.
    /// Returns their uids.
    pub async fn evict_stale(&self, ttl: Duration) -> Vec<String> {
        let mut last_seen = self.last_seen.write().await;
        let stale: Vec<String> = last_seen
            .iter()
            .filter(|(_, seen)| seen.elapsed() > ttl)
            .map(|(uid, _)| uid.clone())
            .collect();
        if stale.is_empty() {
            return stale;
        }
        let mut ingress = self.ingress.write().await;
        let mut services = self.services.write().await;
        for uid in &stale {
            last_seen.remove(uid);
            ingress.remove(uid);
            services.remove(uid);
        }
        stale
    }
}

/// Shared application state injected into all Axum handlers.
#[derive(Clone, Default)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_route::RouteBase;
    use pkg_route::document::DocumentHeader;

    fn make_service(uid: &str) -> ServiceRoute {
        let header = DocumentHeader {
            uid: uid.to_string(),
            base: RouteBase::new("eu", "west-1", "default", uid),
            gateway: String::new(),
        };
        ServiceRoute::new(header, Vec::new()).unwrap()
    }

    #[tokio::test]
    async fn silent_clusters_are_evicted() {
        let store = DocumentStore::default();
        for uid in ["c1", "c2"] {
            store
                .services
                .write()
                .await
                .insert(uid.to_string(), make_service(uid));
            store.touch(uid).await;
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        store.touch("c2").await;
        let evicted = store.evict_stale(Duration::from_millis(50)).await;
        assert_eq!(evicted, vec!["c1".to_string()]);

        let services = store.services.read().await;
        assert!(!services.contains_key("c1"));
        assert!(services.contains_key("c2"));
        assert!(!store.last_seen.read().await.contains_key("c1"));
    }
}
