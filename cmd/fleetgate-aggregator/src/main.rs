use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use pkg_aggregator::publisher::PublisherConfig;
use pkg_aggregator::server::{AggregatorConfig, start_server};
use pkg_constants::network::{
    DEFAULT_AGGREGATOR_INTERVAL_SECS, DEFAULT_AGGREGATOR_PORT, DEFAULT_DOCUMENT_TTL_SECS,
    DEFAULT_REPO_ADDR,
};
use pkg_constants::paths::{
    DEFAULT_AGGREGATOR_CONFIG, DEFAULT_INGRESS_PATH_TEMPLATE, DEFAULT_SERVICE_PATH_TEMPLATE,
};
use pkg_constants::repo::DEFAULT_REPO_API_PATH;
use pkg_types::config::{AggregatorConfigFile, load_config_file};
use pkg_types::validate::validate_template;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug, Default)]
#[command(name = "fleetgate-aggregator", about = "fleetgate multi-cluster route aggregator")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_AGGREGATOR_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Content repository address
    #[arg(long)]
    repo: Option<String>,

    /// Seconds between publications
    #[arg(long)]
    interval: Option<u64>,

    /// Seconds before a silent cluster is dropped (0 keeps it forever)
    #[arg(long)]
    document_ttl: Option<u64>,
}

fn resolve(cli: Cli, file: AggregatorConfigFile) -> anyhow::Result<AggregatorConfig> {
    let port = cli.port.or(file.port).unwrap_or(DEFAULT_AGGREGATOR_PORT);
    let interval = cli
        .interval
        .or(file.interval_secs)
        .unwrap_or(DEFAULT_AGGREGATOR_INTERVAL_SECS);
    if interval == 0 {
        anyhow::bail!("interval must be positive");
    }
    let ttl = cli
        .document_ttl
        .or(file.document_ttl_secs)
        .unwrap_or(DEFAULT_DOCUMENT_TTL_SECS);

    let publisher = PublisherConfig {
        ingress_path_template: file
            .ingress_path_template
            .unwrap_or_else(|| DEFAULT_INGRESS_PATH_TEMPLATE.to_string()),
        service_path_template: file
            .service_path_template
            .unwrap_or_else(|| DEFAULT_SERVICE_PATH_TEMPLATE.to_string()),
        interval: Duration::from_secs(interval),
        document_ttl: (ttl > 0).then(|| Duration::from_secs(ttl)),
        ..Default::default()
    };
    validate_template(&publisher.ingress_path_template)?;
    validate_template(&publisher.service_path_template)?;

    Ok(AggregatorConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        repo_addr: cli
            .repo
            .or(file.repo)
            .unwrap_or_else(|| DEFAULT_REPO_ADDR.to_string()),
        repo_api_path: file
            .repo_api_path
            .unwrap_or_else(|| DEFAULT_REPO_API_PATH.to_string()),
        publisher,
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let file_cfg: AggregatorConfigFile = match load_config_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load {}: {}", cli.config, e);
            std::process::exit(2);
        }
    };
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let config = match resolve(cli, file_cfg) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    info!("Starting fleetgate-aggregator");
    info!("  Addr:      {}", config.addr);
    info!("  Repo:      {}", config.repo_addr);
    info!("  Interval:  {}s", config.publisher.interval.as_secs());
    match config.publisher.document_ttl {
        Some(ttl) => info!("  TTL:       {}s", ttl.as_secs()),
        None => info!("  TTL:       none"),
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down aggregator");
        }
        shutdown.cancel();
    });

    if let Err(e) = start_server(config, cancel).await {
        error!("Aggregator failed: {:#}", e);
        std::process::exit(1);
    }
}
