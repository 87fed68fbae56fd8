//! Fleet-wide merge of per-cluster documents.
//!
//! Every cluster gets back its own ingress routes, and a service registry
//! holding its local services plus the exported services of every other
//! cluster, reachable at that cluster's gateway address.

use std::collections::BTreeMap;

use pkg_constants::paths::{BALANCER_FILE, CONFIG_DIR, REGISTRY_FILE, ROUTER_FILE};
use pkg_repo::Batch;
use pkg_route::RouteBase;
use pkg_route::document::{IngressRoute, ServiceRoute};
use pkg_route::ingress::IngressConfig;
use pkg_route::service::ServiceRegistry;

/// Router and balancer of one cluster, rebuilt from its document.
pub fn ingress_config(doc: &IngressRoute) -> IngressConfig {
    let mut config = IngressConfig::default();
    for entry in &doc.routes {
        config.insert_entry(entry);
    }
    config
}

/// Registry of every cluster, keyed by uid.
pub fn merge_registries(docs: &BTreeMap<String, ServiceRoute>) -> BTreeMap<String, ServiceRegistry> {
    let mut registries: BTreeMap<String, ServiceRegistry> = docs
        .keys()
        .map(|uid| (uid.clone(), ServiceRegistry::default()))
        .collect();

    for (source, doc) in docs {
        let gateway = doc.header.gateway.as_str();
        for route in &doc.routes {
            for (uid, registry) in registries.iter_mut() {
                if uid == source {
                    registry.add(route.key(), route.targets.iter().map(|t| t.address.clone()));
                } else if route.export && !gateway.is_empty() {
                    registry.add(route.export_key(), [gateway.to_string()]);
                }
            }
        }
    }
    registries
}

fn base_path(template: &str, base: &RouteBase) -> anyhow::Result<String> {
    base.evaluate(template, None)
}

pub fn ingress_batches(
    docs: &BTreeMap<String, IngressRoute>,
    template: &str,
) -> anyhow::Result<Vec<Batch>> {
    let mut batches = Vec::new();
    for doc in docs.values() {
        let config = ingress_config(doc);
        let mut batch = Batch::new(base_path(template, &doc.header.base)?);
        batch.add(CONFIG_DIR, ROUTER_FILE, &config.router)?;
        batch.add(CONFIG_DIR, BALANCER_FILE, &config.balancer)?;
        batches.push(batch);
    }
    Ok(batches)
}

pub fn service_batches(
    docs: &BTreeMap<String, ServiceRoute>,
    template: &str,
) -> anyhow::Result<Vec<Batch>> {
    let registries = merge_registries(docs);
    let mut batches = Vec::new();
    for (uid, doc) in docs {
        let Some(registry) = registries.get(uid) else {
            continue;
        };
        let mut batch = Batch::new(base_path(template, &doc.header.base)?);
        batch.add(CONFIG_DIR, REGISTRY_FILE, registry)?;
        batches.push(batch);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_route::document::{DocumentHeader, IngressRouteEntry, ServiceRouteEntry, Target};

    fn make_header(cluster: &str, gateway: &str) -> DocumentHeader {
        DocumentHeader {
            uid: cluster.to_string(),
            base: RouteBase::new("eu", "west-1", "default", cluster),
            gateway: gateway.to_string(),
        }
    }

    fn make_service(name: &str, address: &str, export: bool) -> ServiceRouteEntry {
        ServiceRouteEntry {
            name: name.to_string(),
            namespace: "default".to_string(),
            port_name: "http".to_string(),
            targets: vec![Target {
                address: address.to_string(),
                tags: BTreeMap::new(),
            }],
            export,
            export_name: String::new(),
        }
    }

    fn make_docs() -> BTreeMap<String, ServiceRoute> {
        let a = ServiceRoute::new(
            make_header("c1", "192.168.1.1:80"),
            vec![make_service("svc-x", "10.0.0.5:8080", true)],
        )
        .unwrap();
        let b = ServiceRoute::new(
            make_header("c2", "192.168.2.1:80"),
            vec![make_service("svc-y", "10.1.0.7:8080", false)],
        )
        .unwrap();
        BTreeMap::from([("c1".to_string(), a), ("c2".to_string(), b)])
    }

    #[test]
    fn exported_services_reach_other_clusters_at_the_gateway() {
        let registries = merge_registries(&make_docs());

        let c1 = &registries["c1"].services;
        assert_eq!(c1["default/svc-x:http"], vec!["10.0.0.5:8080"]);
        assert!(!c1.contains_key("default/svc-y:http"));

        let c2 = &registries["c2"].services;
        assert_eq!(c2["default/svc-x:http"], vec!["192.168.1.1:80"]);
        assert_eq!(c2["default/svc-y:http"], vec!["10.1.0.7:8080"]);
    }

    #[test]
    fn batches_land_under_each_cluster() {
        let batches = service_batches(
            &make_docs(),
            pkg_constants::paths::DEFAULT_SERVICE_PATH_TEMPLATE,
        )
        .unwrap();
        let paths: Vec<&str> = batches.iter().map(|b| b.basepath.as_str()).collect();
        assert_eq!(
            paths,
            ["/eu/west-1/default/c1/services/", "/eu/west-1/default/c2/services/"]
        );

        let ingress = IngressRoute::new(
            make_header("c1", ""),
            vec![IngressRouteEntry {
                host: "abc.com".to_string(),
                path: "/*".to_string(),
                service_name: "default/web:http".to_string(),
                upstreams: vec!["10.0.0.5:8080".to_string()],
                ..Default::default()
            }],
        )
        .unwrap();
        let docs = BTreeMap::from([("c1".to_string(), ingress)]);
        let batches =
            ingress_batches(&docs, pkg_constants::paths::DEFAULT_INGRESS_PATH_TEMPLATE).unwrap();
        assert_eq!(batches[0].items.len(), 2);
        assert_eq!(
            batches[0].items[0].content["routes"]["abc.com/*"]["service"],
            "default/web:http"
        );
    }
}
