use std::time::Duration;

use pkg_constants::repo::{POOL_IDLE_TIMEOUT_SECS, POOL_MAX_IDLE_PER_HOST, REQUEST_TIMEOUT_SECS};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RepoError;
use crate::retry::{RetryConfig, retry_with_backoff};

/// One file inside a batch, relative to the batch's codebase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem {
    pub path: String,
    pub filename: String,
    pub content: Value,
}

/// An atomic set of file writes against one codebase.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub basepath: String,
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn new(basepath: impl Into<String>) -> Self {
        Self {
            basepath: basepath.into(),
            items: Vec::new(),
        }
    }

    pub fn add<T: Serialize>(
        &mut self,
        path: &str,
        filename: &str,
        content: &T,
    ) -> Result<(), serde_json::Error> {
        self.items.push(BatchItem {
            path: path.to_string(),
            filename: filename.to_string(),
            content: serde_json::to_value(content)?,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Outcome of a successful derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derived {
    Created,
    Existed,
}

#[derive(Serialize)]
struct DeriveRequest<'a> {
    parent: &'a str,
}

#[derive(Clone)]
pub struct RepoClient {
    http: reqwest::Client,
    base: Url,
    api_path: String,
    retry: RetryConfig,
}

impl RepoClient {
    /// `addr` may omit the scheme, in which case plain http is assumed.
    pub fn new(addr: &str, api_path: &str, retry: RetryConfig) -> Result<Self, RepoError> {
        let addr = addr.trim().trim_end_matches('/');
        if addr.is_empty() {
            return Err(RepoError::InvalidAddress(addr.to_string()));
        }
        let full = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };
        let base = Url::parse(&full).map_err(|_| RepoError::InvalidAddress(addr.to_string()))?;
        if base.host_str().is_none() || !matches!(base.scheme(), "http" | "https") {
            return Err(RepoError::InvalidAddress(addr.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| RepoError::InvalidAddress(format!("{}: {}", addr, e)))?;

        let api_path = format!("/{}", api_path.trim_matches('/'));
        Ok(Self {
            http,
            base,
            api_path,
            retry,
        })
    }

    pub fn base_url(&self) -> String {
        format!(
            "{}{}",
            self.base.as_str().trim_end_matches('/'),
            self.api_path
        )
    }

    fn url_for(&self, basepath: &str, suffix: &str) -> String {
        let trimmed = basepath.trim_matches('/');
        let mut url = self.base_url();
        if !trimmed.is_empty() {
            url.push('/');
            url.push_str(trimmed);
        }
        if !suffix.is_empty() {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    /// Probe the API root. Used to wait for the repo at startup.
    pub async fn is_up(&self) -> bool {
        match self.http.get(self.base_url()).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Repo at {} not reachable: {}", self.base_url(), e);
                false
            }
        }
    }

    /// Current listing/content of a codebase.
    pub async fn get(&self, basepath: &str) -> Result<Value, RepoError> {
        let url = self.url_for(basepath, "");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport(basepath, e))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RepoError::NotFound(basepath.to_string()));
        }
        if !status.is_success() {
            return Err(status_error(basepath, status, resp).await);
        }
        resp.json::<Value>().await.map_err(|e| transport(basepath, e))
    }

    /// Ensure a codebase exists at `path` inheriting from `parent`.
    pub async fn derive_codebase(&self, path: &str, parent: &str) -> Result<Derived, RepoError> {
        let url = self.url_for(path, "derive");
        let name = format!("derive {}", path);
        let derived = retry_with_backoff(&self.retry, &name, RepoError::is_transient, || {
            let url = url.clone();
            async move {
                let resp = self
                    .http
                    .post(&url)
                    .json(&DeriveRequest { parent })
                    .send()
                    .await
                    .map_err(|e| transport(path, e))?;
                match resp.status() {
                    StatusCode::CREATED => Ok(Derived::Created),
                    StatusCode::OK => Ok(Derived::Existed),
                    StatusCode::CONFLICT => {
                        let message = resp.text().await.unwrap_or_default();
                        Err(RepoError::Conflict {
                            path: path.to_string(),
                            message,
                        })
                    }
                    status => Err(status_error(path, status, resp).await),
                }
            }
        })
        .await?;
        if derived == Derived::Created {
            info!("Derived codebase {} from {}", path, parent);
        }
        Ok(derived)
    }

    /// Apply batches in order. Each batch is atomic on the repo side; a
    /// failing batch stops the call and later batches are not sent.
    pub async fn batch(&self, batches: &[Batch]) -> Result<(), RepoError> {
        for batch in batches {
            if batch.is_empty() {
                continue;
            }
            let url = self.url_for(&batch.basepath, "batch");
            let name = format!("batch {}", batch.basepath);
            retry_with_backoff(&self.retry, &name, RepoError::is_transient, || {
                let url = url.clone();
                async move {
                    let resp = self
                        .http
                        .post(&url)
                        .json(&batch.items)
                        .send()
                        .await
                        .map_err(|e| transport(&batch.basepath, e))?;
                    let status = resp.status();
                    if status.is_success() {
                        Ok(())
                    } else {
                        Err(status_error(&batch.basepath, status, resp).await)
                    }
                }
            })
            .await?;
            debug!(
                "Committed {} file(s) to {}",
                batch.items.len(),
                batch.basepath
            );
        }
        Ok(())
    }
}

fn transport(path: &str, e: reqwest::Error) -> RepoError {
    RepoError::Transient {
        path: path.to_string(),
        message: e.to_string(),
    }
}

async fn status_error(path: &str, status: StatusCode, resp: reqwest::Response) -> RepoError {
    let message = resp.text().await.unwrap_or_default();
    if status.is_server_error() {
        RepoError::Transient {
            path: path.to_string(),
            message: format!("{}: {}", status, message),
        }
    } else if status == StatusCode::NOT_FOUND {
        RepoError::NotFound(path.to_string())
    } else {
        RepoError::Rejected {
            path: path.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}
