use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use pkg_constants::network::{DEFAULT_AGGREGATOR_INTERVAL_SECS, DEFAULT_DOCUMENT_TTL_SECS};
use pkg_constants::paths::{
    DEFAULT_INGRESS_PARENT_PATH, DEFAULT_INGRESS_PATH_TEMPLATE, DEFAULT_SERVICE_PATH_TEMPLATE,
    DEFAULT_SERVICES_PARENT_PATH,
};
use pkg_repo::{Batch, RepoClient};
use pkg_route::{Fingerprint, fingerprint};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DocumentStore;
use crate::merge::{ingress_batches, service_batches};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub ingress_path_template: String,
    pub service_path_template: String,
    pub ingress_parent_path: String,
    pub services_parent_path: String,
    pub interval: Duration,
    /// Clusters silent for longer are dropped from the merge. None keeps
    /// them forever.
    pub document_ttl: Option<Duration>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            ingress_path_template: DEFAULT_INGRESS_PATH_TEMPLATE.to_string(),
            service_path_template: DEFAULT_SERVICE_PATH_TEMPLATE.to_string(),
            ingress_parent_path: DEFAULT_INGRESS_PARENT_PATH.to_string(),
            services_parent_path: DEFAULT_SERVICES_PARENT_PATH.to_string(),
            interval: Duration::from_secs(DEFAULT_AGGREGATOR_INTERVAL_SECS),
            document_ttl: Some(Duration::from_secs(DEFAULT_DOCUMENT_TTL_SECS)),
        }
    }
}

#[derive(Default)]
struct Versions {
    ingress: Option<Fingerprint>,
    services: Option<Fingerprint>,
    derived: BTreeSet<String>,
}

/// Periodically writes the merged documents to the repo.
///
/// A store version is the fingerprint of its uid → document hash map. A
/// version is remembered only once every batch of it has been applied, so a
/// failed publication is retried on the next tick.
pub struct Publisher {
    store: Arc<DocumentStore>,
    repo: RepoClient,
    config: PublisherConfig,
    versions: Mutex<Versions>,
}

fn store_version<T>(
    docs: &BTreeMap<String, T>,
    hash: impl Fn(&T) -> Fingerprint,
) -> anyhow::Result<Fingerprint> {
    let hashes: BTreeMap<&str, Fingerprint> = docs
        .iter()
        .map(|(uid, doc)| (uid.as_str(), hash(doc)))
        .collect();
    fingerprint(&hashes)
}

impl Publisher {
    pub fn new(store: Arc<DocumentStore>, repo: RepoClient, config: PublisherConfig) -> Self {
        Self {
            store,
            repo,
            config,
            versions: Mutex::new(Versions::default()),
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Publisher started (interval={}s)",
                self.config.interval.as_secs()
            );
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Publisher stopped");
                        return;
                    }
                    _ = interval.tick() => {}
                }
                if let Err(e) = self.publish().await {
                    warn!("Publisher error: {:#}", e);
                }
            }
        })
    }

    /// One pass over both document kinds.
    pub async fn publish(&self) -> anyhow::Result<()> {
        let mut versions = self.versions.lock().await;
        if let Some(ttl) = self.config.document_ttl {
            for uid in self.store.evict_stale(ttl).await {
                info!(
                    "Evicted cluster {} (no report for over {}s)",
                    uid,
                    ttl.as_secs()
                );
            }
        }
        let ingress = self.publish_ingress(&mut versions).await;
        let services = self.publish_services(&mut versions).await;
        ingress.and(services)
    }

    async fn publish_ingress(&self, versions: &mut Versions) -> anyhow::Result<()> {
        let docs = self.store.ingress.read().await.clone();
        let version = store_version(&docs, |doc| doc.hash)?;
        if docs.is_empty() || versions.ingress == Some(version) {
            debug!("Ingress documents unchanged ({})", version);
            return Ok(());
        }

        let batches = ingress_batches(&docs, &self.config.ingress_path_template)?;
        self.apply(versions, &batches, &self.config.ingress_parent_path)
            .await?;
        info!(
            "Published ingress config of {} cluster(s) ({})",
            docs.len(),
            version
        );
        versions.ingress = Some(version);
        Ok(())
    }

    async fn publish_services(&self, versions: &mut Versions) -> anyhow::Result<()> {
        let docs = self.store.services.read().await.clone();
        let version = store_version(&docs, |doc| doc.hash)?;
        if docs.is_empty() || versions.services == Some(version) {
            debug!("Service documents unchanged ({})", version);
            return Ok(());
        }

        let batches = service_batches(&docs, &self.config.service_path_template)?;
        self.apply(versions, &batches, &self.config.services_parent_path)
            .await?;
        info!(
            "Published service registry of {} cluster(s) ({})",
            docs.len(),
            version
        );
        versions.services = Some(version);
        Ok(())
    }

    async fn apply(
        &self,
        versions: &mut Versions,
        batches: &[Batch],
        parent: &str,
    ) -> anyhow::Result<()> {
        for batch in batches {
            if !versions.derived.contains(&batch.basepath) {
                self.repo.derive_codebase(&batch.basepath, parent).await?;
                versions.derived.insert(batch.basepath.clone());
            }
        }
        self.repo.batch(batches).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_repo::RetryConfig;
    use pkg_repo::fake::FakeRepo;
    use pkg_route::RouteBase;
    use pkg_route::document::{DocumentHeader, ServiceRoute, ServiceRouteEntry, Target};

    fn make_service(cluster: &str, gateway: &str, name: &str, export: bool) -> ServiceRoute {
        let header = DocumentHeader {
            uid: cluster.to_string(),
            base: RouteBase::new("eu", "west-1", "default", cluster),
            gateway: gateway.to_string(),
        };
        let entry = ServiceRouteEntry {
            name: name.to_string(),
            namespace: "default".to_string(),
            port_name: String::new(),
            targets: vec![Target {
                address: "10.0.0.5:8080".to_string(),
                tags: BTreeMap::new(),
            }],
            export,
            export_name: String::new(),
        };
        ServiceRoute::new(header, vec![entry]).unwrap()
    }

    async fn make_publisher(
        repo: &FakeRepo,
        config: PublisherConfig,
    ) -> (Publisher, Arc<DocumentStore>) {
        let store = Arc::new(DocumentStore::default());
        let client = RepoClient::new(&repo.url(), "/repo", RetryConfig::fast(2)).unwrap();
        let publisher = Publisher::new(store.clone(), client, config);
        (publisher, store)
    }

    #[tokio::test]
    async fn publishes_merged_registries_once_per_version() {
        let repo = FakeRepo::start().await;
        let (publisher, store) = make_publisher(&repo, PublisherConfig::default()).await;
        {
            let mut services = store.services.write().await;
            services.insert("c1".to_string(), make_service("c1", "192.168.1.1:80", "api", true));
            services.insert("c2".to_string(), make_service("c2", "192.168.2.1:80", "web", false));
        }

        publisher.publish().await.unwrap();
        assert_eq!(repo.applied_batches(), 2);
        assert_eq!(
            repo.parent_of("/eu/west-1/default/c2/services").as_deref(),
            Some(DEFAULT_SERVICES_PARENT_PATH)
        );
        let registry = repo
            .file("/eu/west-1/default/c2/services", "/config", "registry.json")
            .unwrap();
        assert_eq!(registry["services"]["default/api"][0], "192.168.1.1:80");
        assert_eq!(registry["services"]["default/web"][0], "10.0.0.5:8080");

        publisher.publish().await.unwrap();
        assert_eq!(repo.applied_batches(), 2);
    }

    #[tokio::test]
    async fn failed_publication_is_retried() {
        let repo = FakeRepo::start().await;
        let (publisher, store) = make_publisher(&repo, PublisherConfig::default()).await;
        store
            .services
            .write()
            .await
            .insert("c1".to_string(), make_service("c1", "", "api", true));

        repo.fail_next_batches(2);
        assert!(publisher.publish().await.is_err());
        assert_eq!(repo.applied_batches(), 0);

        publisher.publish().await.unwrap();
        assert_eq!(repo.applied_batches(), 1);
    }

    #[tokio::test]
    async fn silent_cluster_drops_out_of_the_merge() {
        let repo = FakeRepo::start().await;
        let config = PublisherConfig {
            document_ttl: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (publisher, store) = make_publisher(&repo, config).await;
        {
            let mut services = store.services.write().await;
            services.insert("c1".to_string(), make_service("c1", "192.168.1.1:80", "api", true));
            services.insert("c2".to_string(), make_service("c2", "192.168.2.1:80", "web", false));
        }
        store.touch("c1").await;
        store.touch("c2").await;

        publisher.publish().await.unwrap();
        let registry = repo
            .file("/eu/west-1/default/c2/services", "/config", "registry.json")
            .unwrap();
        assert!(registry["services"]["default/api"].is_array());

        // Only c2 keeps reporting.
        tokio::time::sleep(Duration::from_millis(80)).await;
        store.touch("c2").await;
        publisher.publish().await.unwrap();
        assert!(!store.services.read().await.contains_key("c1"));
        let registry = repo
            .file("/eu/west-1/default/c2/services", "/config", "registry.json")
            .unwrap();
        assert!(registry["services"]["default/api"].is_null());
        assert_eq!(repo.applied_batches(), 3);
    }
}
