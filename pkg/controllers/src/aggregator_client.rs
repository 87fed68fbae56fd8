use std::time::Duration;

use anyhow::{Context, bail};
use pkg_constants::network::{
    AGGREGATOR_CLIENT_TIMEOUT_SECS, AGGREGATOR_INGRESS_PATH, AGGREGATOR_SERVICE_PATH,
};
use pkg_route::document::{IngressRoute, Response, ServiceRoute};
use serde::Serialize;
use tracing::debug;

/// Pushes this cluster's documents to the fleet aggregator.
#[derive(Clone)]
pub struct AggregatorClient {
    http: reqwest::Client,
    base: String,
}

impl AggregatorClient {
    pub fn new(addr: &str) -> anyhow::Result<Self> {
        let base = if addr.contains("://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(AGGREGATOR_CLIENT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub async fn post_ingress(&self, doc: &IngressRoute) -> anyhow::Result<()> {
        self.post(AGGREGATOR_INGRESS_PATH, doc).await
    }

    pub async fn post_service(&self, doc: &ServiceRoute) -> anyhow::Result<()> {
        self.post(AGGREGATOR_SERVICE_PATH, doc).await
    }

    async fn post<T: Serialize>(&self, path: &str, doc: &T) -> anyhow::Result<()> {
        let url = format!("{}{}", self.base, path);
        let resp = self
            .http
            .post(&url)
            .json(doc)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;
        let status = resp.status();
        let body: Response = resp
            .json()
            .await
            .with_context(|| format!("decoding response of POST {}", url))?;
        if !status.is_success() || !body.success {
            bail!(
                "aggregator rejected POST {} ({}): {}",
                path,
                status,
                body.result.unwrap_or_default()
            );
        }
        debug!("Pushed document to {}", url);
        Ok(())
    }
}
