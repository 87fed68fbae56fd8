//! In-process content repository for tests.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::client::BatchItem;

#[derive(Default)]
struct Codebase {
    parent: String,
    files: BTreeMap<String, Value>,
}

#[derive(Default)]
struct Inner {
    codebases: BTreeMap<String, Codebase>,
    fail_batches: u32,
    batch_calls: u32,
    applied_batches: u32,
}

#[derive(Deserialize)]
struct DeriveBody {
    parent: String,
}

#[derive(Clone)]
pub struct FakeRepo {
    addr: SocketAddr,
    inner: Arc<Mutex<Inner>>,
}

fn codebase_key(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

fn file_key(path: &str, filename: &str) -> String {
    format!("{}/{}", path.trim_end_matches('/'), filename)
}

impl FakeRepo {
    pub async fn start() -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let app = Router::new()
            .route("/repo", get(root))
            .route("/repo/{*path}", get(read).post(write))
            .with_state(inner.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake repo");
        let addr = listener.local_addr().expect("fake repo addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, inner }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The next `n` batch requests answer 503.
    pub fn fail_next_batches(&self, n: u32) {
        self.inner.lock().fail_batches = n;
    }

    /// Batch requests received, including failed ones.
    pub fn batch_calls(&self) -> u32 {
        self.inner.lock().batch_calls
    }

    pub fn applied_batches(&self) -> u32 {
        self.inner.lock().applied_batches
    }

    pub fn parent_of(&self, codebase: &str) -> Option<String> {
        self.inner
            .lock()
            .codebases
            .get(&codebase_key(codebase))
            .map(|c| c.parent.clone())
    }

    pub fn codebases(&self) -> Vec<String> {
        self.inner.lock().codebases.keys().cloned().collect()
    }

    pub fn file(&self, codebase: &str, path: &str, filename: &str) -> Option<Value> {
        self.inner
            .lock()
            .codebases
            .get(&codebase_key(codebase))
            .and_then(|c| c.files.get(&file_key(path, filename)).cloned())
    }
}

async fn root() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn read(State(inner): State<Arc<Mutex<Inner>>>, Path(path): Path<String>) -> Response {
    let inner = inner.lock();
    match inner.codebases.get(&codebase_key(&path)) {
        Some(codebase) => Json(json!({
            "parent": codebase.parent,
            "files": codebase.files.keys().collect::<Vec<_>>(),
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn write(
    State(inner): State<Arc<Mutex<Inner>>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    if let Some(codebase) = path.strip_suffix("/derive") {
        let Ok(req) = serde_json::from_slice::<DeriveBody>(&body) else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        let mut inner = inner.lock();
        let key = codebase_key(codebase);
        return match inner.codebases.get(&key) {
            Some(existing) if existing.parent == req.parent => StatusCode::OK.into_response(),
            Some(existing) => (
                StatusCode::CONFLICT,
                format!("{} already derives from {}", key, existing.parent),
            )
                .into_response(),
            None => {
                inner.codebases.insert(
                    key,
                    Codebase {
                        parent: req.parent,
                        files: BTreeMap::new(),
                    },
                );
                StatusCode::CREATED.into_response()
            }
        };
    }

    if let Some(codebase) = path.strip_suffix("/batch") {
        let mut inner = inner.lock();
        inner.batch_calls += 1;
        if inner.fail_batches > 0 {
            inner.fail_batches -= 1;
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        let Ok(items) = serde_json::from_slice::<Vec<BatchItem>>(&body) else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        let Some(target) = inner.codebases.get_mut(&codebase_key(codebase)) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        for item in items {
            target
                .files
                .insert(file_key(&item.path, &item.filename), item.content);
        }
        inner.applied_batches += 1;
        return StatusCode::OK.into_response();
    }

    StatusCode::NOT_FOUND.into_response()
}
