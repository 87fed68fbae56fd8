use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use pkg_constants::network::{
    AGGREGATOR_INGRESS_PATH, AGGREGATOR_SERVICE_PATH, HEALTH_PATH, READY_PATH,
};
use pkg_repo::{RepoClient, RetryConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::AppState;
use crate::handlers;
use crate::publisher::{Publisher, PublisherConfig};
use crate::request_id::request_id_middleware;

pub struct AggregatorConfig {
    pub addr: SocketAddr,
    pub repo_addr: String,
    pub repo_api_path: String,
    pub publisher: PublisherConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(AGGREGATOR_INGRESS_PATH, post(handlers::post_ingress))
        .route(AGGREGATOR_SERVICE_PATH, post(handlers::post_service))
        .route(HEALTH_PATH, get(handlers::health))
        .route(READY_PATH, get(handlers::health))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serve the document API and run the publisher until `cancel` fires.
pub async fn start_server(
    config: AggregatorConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let repo = RepoClient::new(
        &config.repo_addr,
        &config.repo_api_path,
        RetryConfig::default(),
    )?;
    let state = AppState::default();

    let publisher = Arc::new(Publisher::new(
        state.store.clone(),
        repo,
        config.publisher,
    ));
    let publisher_task = publisher.start(cancel.clone());

    let app = router(state);

    info!("Starting aggregator on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    cancel.cancel();
    let _ = publisher_task.await;
    info!("Aggregator stopped");
    Ok(())
}
