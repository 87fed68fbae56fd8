use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pkg_cache::{ResourceCache, StatusSink};
use pkg_constants::network::AGGREGATOR_REFRESH_SECS;
use pkg_constants::paths::{
    BALANCER_FILE, CERTIFICATES_FILE, CONFIG_DIR, DEFAULT_GATEWAY_PATH_TEMPLATE,
    DEFAULT_GATEWAYS_PARENT_PATH, DEFAULT_INGRESS_PARENT_PATH, DEFAULT_INGRESS_PATH_TEMPLATE,
    DEFAULT_SERVICE_PATH_TEMPLATE, DEFAULT_SERVICES_PARENT_PATH, GATEWAY_CONFIG_DIR,
    GATEWAY_CONFIG_FILE, REGISTRY_FILE, ROUTER_FILE,
};
use pkg_repo::{Batch, RepoClient};
use pkg_route::document::{DocumentHeader, IngressRoute, ServiceRoute, ServiceRouteEntry};
use pkg_route::gateway::{GatewayConfig, GatewaySnapshot, gateway_to_config};
use pkg_route::ingress::{IngressConfig, IngressSnapshot, ingress_entries, ingress_to_config};
use pkg_route::service::{ServiceRegistry, ServiceSnapshot, service_routes};
use pkg_route::{ConfigSpec, Fingerprint, Rejection, RouteBase, fingerprint};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregator_client::AggregatorClient;
use crate::runner::Runnable;

/// Where and as whom the syncer publishes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base: RouteBase,
    /// Identity of this cluster towards the aggregator.
    pub uid: String,
    /// Externally reachable `host:port` of the cluster gateway.
    pub gateway_address: String,
    pub ingress_path_template: String,
    pub service_path_template: String,
    pub gateway_path_template: String,
    pub ingress_parent_path: String,
    pub services_parent_path: String,
    pub gateways_parent_path: String,
    /// Unchanged documents are pushed to the aggregator again after this.
    pub push_refresh: Duration,
}

impl SyncConfig {
    pub fn new(base: RouteBase) -> Self {
        Self {
            uid: cluster_uid(&base),
            base,
            gateway_address: String::new(),
            ingress_path_template: DEFAULT_INGRESS_PATH_TEMPLATE.to_string(),
            service_path_template: DEFAULT_SERVICE_PATH_TEMPLATE.to_string(),
            gateway_path_template: DEFAULT_GATEWAY_PATH_TEMPLATE.to_string(),
            ingress_parent_path: DEFAULT_INGRESS_PARENT_PATH.to_string(),
            services_parent_path: DEFAULT_SERVICES_PARENT_PATH.to_string(),
            gateways_parent_path: DEFAULT_GATEWAYS_PARENT_PATH.to_string(),
            push_refresh: Duration::from_secs(AGGREGATOR_REFRESH_SECS),
        }
    }

    fn header(&self) -> DocumentHeader {
        DocumentHeader {
            uid: self.uid.clone(),
            base: self.base.clone(),
            gateway: self.gateway_address.clone(),
        }
    }
}

/// The translations from cache snapshots to published configuration.
#[derive(Clone, Copy)]
pub(crate) struct Builders {
    pub ingress: fn(&IngressSnapshot) -> IngressConfig,
    pub services: fn(&ServiceSnapshot) -> Vec<ServiceRouteEntry>,
    pub gateway: fn(&GatewaySnapshot) -> GatewayConfig,
}

impl Default for Builders {
    fn default() -> Self {
        Self {
            ingress: ingress_to_config,
            services: service_routes,
            gateway: gateway_to_config,
        }
    }
}

/// Everything one run publishes, built from a cache snapshot. A part whose
/// build failed is absent and keeps its last published version.
struct Prepared {
    ingress: Option<(IngressConfig, IngressRoute)>,
    services: Option<(ServiceRegistry, ServiceRoute)>,
    gateways: BTreeMap<String, ConfigSpec>,
    /// Namespaces whose gateway build failed.
    failed_gateways: BTreeSet<String>,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run one build, logging a failure or panic against `object`.
fn guarded<T>(object: &str, build: impl FnOnce() -> anyhow::Result<T>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(build)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("Failed to build config for {}: {:#}", object, e);
            None
        }
        Err(panic) => {
            error!(
                "Building config for {} panicked, leaving it out: {}",
                object,
                panic_message(panic.as_ref())
            );
            None
        }
    }
}

/// Fingerprints of what was last published successfully.
#[derive(Default)]
struct Published {
    ingress: Option<Fingerprint>,
    services: Option<Fingerprint>,
    gateways: BTreeMap<String, Fingerprint>,
    pushed_ingress: Option<Fingerprint>,
    pushed_services: Option<Fingerprint>,
    /// Last time both documents reached the aggregator.
    pushed_at: Option<Instant>,
    derived: BTreeSet<String>,
}

pub struct Syncer {
    cache: Arc<ResourceCache>,
    repo: RepoClient,
    aggregator: Option<AggregatorClient>,
    status_sink: Arc<dyn StatusSink>,
    config: SyncConfig,
    published: Mutex<Published>,
    /// Gateway rejections last logged, per namespace.
    gateway_rejections: parking_lot::Mutex<BTreeMap<String, Vec<Rejection>>>,
    pub(crate) builders: Builders,
}

impl Syncer {
    pub fn new(
        cache: Arc<ResourceCache>,
        repo: RepoClient,
        aggregator: Option<AggregatorClient>,
        status_sink: Arc<dyn StatusSink>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            repo,
            aggregator,
            status_sink,
            config,
            published: Mutex::new(Published::default()),
            gateway_rejections: parking_lot::Mutex::new(BTreeMap::new()),
            builders: Builders::default(),
        }
    }

    fn prepare(&self) -> Prepared {
        let snapshot = self.cache.build();
        for rejection in &snapshot.rejections {
            rejection.log();
        }
        let header = self.config.header();
        let builders = self.builders;

        let ingress = guarded("ingress routes", || {
            let config = (builders.ingress)(&snapshot.ingress);
            let doc = IngressRoute::new(header.clone(), ingress_entries(&snapshot.ingress))?;
            Ok((config, doc))
        });
        let services = guarded("service routes", || {
            let entries = (builders.services)(&snapshot.services);
            let registry = ServiceRegistry::from_entries(&entries);
            let doc = ServiceRoute::new(header.clone(), entries)?;
            Ok((registry, doc))
        });

        let mut gateways = BTreeMap::new();
        let mut failed_gateways = BTreeSet::new();
        let mut rejections = BTreeMap::new();
        for (ns, gateway) in &snapshot.gateways {
            let object = format!("Gateway/{}/{}", ns, gateway.gateway.metadata.name);
            match guarded(&object, || Ok((builders.gateway)(gateway))) {
                Some(config) => {
                    rejections.insert(ns.clone(), config.rejections);
                    gateways.insert(ns.clone(), config.spec);
                }
                None => {
                    failed_gateways.insert(ns.clone());
                }
            }
        }
        self.log_gateway_rejections(rejections, &failed_gateways);

        Prepared {
            ingress,
            services,
            gateways,
            failed_gateways,
        }
    }

    /// Gateway rejections are recomputed every run; log a namespace's
    /// rejections only when they differ from the last ones logged. Returns
    /// the number logged.
    fn log_gateway_rejections(
        &self,
        current: BTreeMap<String, Vec<Rejection>>,
        failed: &BTreeSet<String>,
    ) -> usize {
        let mut logged = self.gateway_rejections.lock();
        let mut count = 0;
        for (ns, rejections) in &current {
            if logged.get(ns) != Some(rejections) {
                for rejection in rejections {
                    rejection.log();
                }
                count += rejections.len();
            }
        }
        logged.retain(|ns, _| failed.contains(ns));
        logged.extend(current);
        count
    }

    async fn ensure_derived(
        &self,
        published: &mut Published,
        path: &str,
        parent: &str,
    ) -> anyhow::Result<()> {
        if published.derived.contains(path) {
            return Ok(());
        }
        self.repo.derive_codebase(path, parent).await?;
        published.derived.insert(path.to_string());
        Ok(())
    }

    async fn publish_ingress(
        &self,
        published: &mut Published,
        config: &IngressConfig,
    ) -> anyhow::Result<()> {
        let fp = fingerprint(&(&config.router, &config.balancer, &config.certificates))?;
        if published.ingress == Some(fp) {
            debug!("Ingress config unchanged ({})", fp);
            return Ok(());
        }
        let path = self.config.base.evaluate(&self.config.ingress_path_template, None)?;
        self.ensure_derived(published, &path, &self.config.ingress_parent_path)
            .await?;

        let mut batch = Batch::new(&path);
        batch.add(CONFIG_DIR, ROUTER_FILE, &config.router)?;
        batch.add(CONFIG_DIR, BALANCER_FILE, &config.balancer)?;
        if config.has_certificates() {
            batch.add(CONFIG_DIR, CERTIFICATES_FILE, &config.certificates)?;
        }
        self.repo.batch(&[batch]).await?;
        info!(
            "Published ingress config to {} ({} route(s), {})",
            path,
            config.router.routes.len(),
            fp
        );
        published.ingress = Some(fp);
        Ok(())
    }

    async fn publish_services(
        &self,
        published: &mut Published,
        registry: &ServiceRegistry,
    ) -> anyhow::Result<()> {
        let fp = fingerprint(registry)?;
        if published.services == Some(fp) {
            debug!("Service registry unchanged ({})", fp);
            return Ok(());
        }
        let path = self.config.base.evaluate(&self.config.service_path_template, None)?;
        self.ensure_derived(published, &path, &self.config.services_parent_path)
            .await?;

        let mut batch = Batch::new(&path);
        batch.add(CONFIG_DIR, REGISTRY_FILE, registry)?;
        self.repo.batch(&[batch]).await?;
        info!(
            "Published service registry to {} ({} service(s), {})",
            path,
            registry.services.len(),
            fp
        );
        published.services = Some(fp);
        Ok(())
    }

    async fn publish_gateway(
        &self,
        published: &mut Published,
        namespace: &str,
        spec: &ConfigSpec,
    ) -> anyhow::Result<()> {
        let fp = fingerprint(spec)?;
        if published.gateways.get(namespace) == Some(&fp) {
            debug!("Gateway config of {} unchanged ({})", namespace, fp);
            return Ok(());
        }
        let path = self
            .config
            .base
            .evaluate(&self.config.gateway_path_template, Some(namespace))?;
        self.ensure_derived(published, &path, &self.config.gateways_parent_path)
            .await?;

        let mut batch = Batch::new(&path);
        batch.add(GATEWAY_CONFIG_DIR, GATEWAY_CONFIG_FILE, spec)?;
        self.repo.batch(&[batch]).await?;
        info!("Published gateway config to {} ({})", path, fp);
        published.gateways.insert(namespace.to_string(), fp);
        Ok(())
    }

    /// Push changed documents, and all of them once `push_refresh` has
    /// passed so the aggregator keeps seeing this cluster.
    async fn push(&self, published: &mut Published, prepared: &Prepared) {
        let Some(aggregator) = &self.aggregator else {
            return;
        };
        let refresh = published
            .pushed_at
            .is_none_or(|at| at.elapsed() >= self.config.push_refresh);
        let mut reached = true;
        if let Some((_, doc)) = &prepared.ingress
            && (refresh || published.pushed_ingress != Some(doc.hash))
        {
            match aggregator.post_ingress(doc).await {
                Ok(()) => published.pushed_ingress = Some(doc.hash),
                Err(e) => {
                    reached = false;
                    warn!("Failed to push ingress routes to aggregator: {:#}", e);
                }
            }
        }
        if let Some((_, doc)) = &prepared.services
            && (refresh || published.pushed_services != Some(doc.hash))
        {
            match aggregator.post_service(doc).await {
                Ok(()) => published.pushed_services = Some(doc.hash),
                Err(e) => {
                    reached = false;
                    warn!("Failed to push service routes to aggregator: {:#}", e);
                }
            }
        }
        if refresh && reached {
            published.pushed_at = Some(Instant::now());
        }
    }

    /// One pass: build, publish what changed, flush status.
    pub async fn sync(&self) {
        let prepared = self.prepare();

        let mut published = self.published.lock().await;
        if let Some((config, _)) = &prepared.ingress
            && let Err(e) = self.publish_ingress(&mut published, config).await
        {
            warn!("Failed to publish ingress config: {:#}", e);
        }
        if let Some((registry, _)) = &prepared.services
            && let Err(e) = self.publish_services(&mut published, registry).await
        {
            warn!("Failed to publish service registry: {:#}", e);
        }
        for (ns, spec) in &prepared.gateways {
            if let Err(e) = self.publish_gateway(&mut published, ns, spec).await {
                warn!("Failed to publish gateway config of {}: {:#}", ns, e);
            }
        }
        published.gateways.retain(|ns, _| {
            prepared.gateways.contains_key(ns) || prepared.failed_gateways.contains(ns)
        });
        self.push(&mut published, &prepared).await;
        drop(published);

        let writes = self
            .cache
            .status_writer()
            .flush(self.status_sink.as_ref())
            .await;
        if writes > 0 {
            debug!("Flushed {} status write(s)", writes);
        }
    }
}

#[async_trait]
impl Runnable for Syncer {
    async fn run(&self) {
        self.sync().await;
    }
}

/// Stable identity of a cluster, derived from its fleet coordinates.
pub fn cluster_uid(base: &RouteBase) -> String {
    pkg_route::fingerprint::fingerprint_bytes(base.to_string().as_bytes()).to_string()
}
