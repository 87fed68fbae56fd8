use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use pkg_route::document::{IngressRoute, Response, ServiceRoute};
use tracing::{debug, info, warn};

use crate::AppState;

fn bad_request(message: impl Into<String>) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(Response::error(message))).into_response()
}

/// POST /api/v1/ingress: store a cluster's IngressRoute document.
pub async fn post_ingress(
    State(state): State<AppState>,
    payload: Result<Json<IngressRoute>, JsonRejection>,
) -> impl IntoResponse {
    let doc = match payload {
        Ok(Json(doc)) => doc,
        Err(e) => {
            warn!("Invalid IngressRoute document: {}", e);
            return bad_request(e.body_text());
        }
    };
    if doc.header.uid.is_empty() {
        return bad_request("document has no uid");
    }
    let uid = doc.header.uid.clone();

    let mut store = state.store.ingress.write().await;
    if store.get(&uid).is_some_and(|old| old.hash == doc.hash) {
        debug!("IngressRoute of {} unchanged ({})", uid, doc.hash);
    } else {
        info!(
            "IngressRoute of {} ({}) updated: {} route(s), {}",
            uid,
            doc.header.base,
            doc.routes.len(),
            doc.hash
        );
        store.insert(uid.clone(), doc);
    }
    drop(store);
    state.store.touch(&uid).await;
    (StatusCode::OK, Json(Response::ok())).into_response()
}

/// POST /api/v1/service: store a cluster's ServiceRoute document.
pub async fn post_service(
    State(state): State<AppState>,
    payload: Result<Json<ServiceRoute>, JsonRejection>,
) -> impl IntoResponse {
    let doc = match payload {
        Ok(Json(doc)) => doc,
        Err(e) => {
            warn!("Invalid ServiceRoute document: {}", e);
            return bad_request(e.body_text());
        }
    };
    if doc.header.uid.is_empty() {
        return bad_request("document has no uid");
    }
    let uid = doc.header.uid.clone();

    let mut store = state.store.services.write().await;
    if store.get(&uid).is_some_and(|old| old.hash == doc.hash) {
        debug!("ServiceRoute of {} unchanged ({})", uid, doc.hash);
    } else {
        info!(
            "ServiceRoute of {} ({}) updated: {} service(s), {}",
            uid,
            doc.header.base,
            doc.routes.len(),
            doc.hash
        );
        store.insert(uid.clone(), doc);
    }
    drop(store);
    state.store.touch(&uid).await;
    (StatusCode::OK, Json(Response::ok())).into_response()
}

/// GET /healthz and /readyz
pub async fn health() -> &'static str {
    "OK"
}
