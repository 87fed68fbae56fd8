use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pkg_cache::{CacheConfig, ResourceCache};
use pkg_constants::annotations::DEFAULT_INGRESS_CLASS;
use pkg_constants::gateway::DEFAULT_CONTROLLER_NAME;
use pkg_constants::network::DEFAULT_REPO_ADDR;
use pkg_constants::paths::{
    DEFAULT_CONTROLLER_CONFIG, DEFAULT_GATEWAY_PATH_TEMPLATE, DEFAULT_GATEWAYS_PARENT_PATH,
    DEFAULT_INGRESS_PATH_TEMPLATE, DEFAULT_MANIFEST_DIR, DEFAULT_SERVICE_PATH_TEMPLATE,
};
use pkg_constants::repo::DEFAULT_REPO_API_PATH;
use pkg_constants::sync::{
    DEFAULT_BURST_SYNCS, DEFAULT_EVENT_LOG_SIZE, DEFAULT_MIN_SYNC_PERIOD_SECS,
    DEFAULT_SYNC_PERIOD_SECS,
};
use pkg_controllers::{
    AggregatorClient, BoundedFrequencyRunner, EventHandler, MemorySource, RunnerConfig,
    SyncConfig, Syncer, run_watchers,
};
use pkg_repo::{RepoClient, RetryConfig};
use pkg_route::RouteBase;
use pkg_types::NamespacedName;
use pkg_types::config::{ControllerConfigFile, load_config_file};
use pkg_types::validate::{validate_name, validate_template};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug, Default)]
#[command(name = "fleetgate-controller", about = "fleetgate per-cluster route controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONTROLLER_CONFIG)]
    config: String,

    /// Content repository address
    #[arg(long)]
    repo: Option<String>,

    /// Fleet aggregator address; documents are not pushed when unset
    #[arg(long)]
    aggregator: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    zone: Option<String>,

    #[arg(long)]
    group: Option<String>,

    #[arg(long)]
    cluster: Option<String>,

    /// Externally reachable host:port of this cluster's gateway
    #[arg(long)]
    gateway_address: Option<String>,

    #[arg(long)]
    ingress_class: Option<String>,

    /// Directory of YAML manifests seeding the watch source
    #[arg(long)]
    manifests: Option<String>,

    /// Minimum seconds between syncs
    #[arg(long)]
    min_sync_period: Option<u64>,

    /// Forced sync interval in seconds
    #[arg(long)]
    sync_period: Option<u64>,

    #[arg(long)]
    burst_syncs: Option<u32>,
}

/// Effective settings after merging CLI args, the config file and defaults.
#[derive(Debug)]
struct Settings {
    repo: String,
    repo_api_path: String,
    aggregator: Option<String>,
    base: RouteBase,
    gateway_address: String,
    ingress_class: String,
    controller_name: String,
    manifests: PathBuf,
    runner: RunnerConfig,
    ingress_path_template: String,
    service_path_template: String,
    gateway_path_template: String,
    gateways_parent_path: String,
    global_certificate: Option<NamespacedName>,
}

fn resolve(cli: Cli, file: ControllerConfigFile) -> anyhow::Result<Settings> {
    let global_certificate = match file.global_certificate_secret {
        Some(value) => match NamespacedName::parse(&value, "default") {
            Some(name) => Some(name),
            None => anyhow::bail!("invalid global-certificate-secret '{}'", value),
        },
        None => None,
    };

    Ok(Settings {
        repo: cli
            .repo
            .or(file.repo)
            .unwrap_or_else(|| DEFAULT_REPO_ADDR.to_string()),
        repo_api_path: file
            .repo_api_path
            .unwrap_or_else(|| DEFAULT_REPO_API_PATH.to_string()),
        aggregator: cli.aggregator.or(file.aggregator).filter(|a| !a.is_empty()),
        base: RouteBase::new(
            cli.region.or(file.region).unwrap_or_default(),
            cli.zone.or(file.zone).unwrap_or_default(),
            cli.group.or(file.group).unwrap_or_else(|| "default".to_string()),
            cli.cluster.or(file.cluster).unwrap_or_default(),
        ),
        gateway_address: cli
            .gateway_address
            .or(file.gateway_address)
            .unwrap_or_default(),
        ingress_class: cli
            .ingress_class
            .or(file.ingress_class)
            .unwrap_or_else(|| DEFAULT_INGRESS_CLASS.to_string()),
        controller_name: file
            .gateway_controller_name
            .unwrap_or_else(|| DEFAULT_CONTROLLER_NAME.to_string()),
        manifests: PathBuf::from(
            cli.manifests
                .or(file.manifests)
                .unwrap_or_else(|| DEFAULT_MANIFEST_DIR.to_string()),
        ),
        runner: RunnerConfig {
            min_interval: Duration::from_secs(
                cli.min_sync_period
                    .or(file.min_sync_period_secs)
                    .unwrap_or(DEFAULT_MIN_SYNC_PERIOD_SECS),
            ),
            max_interval: Duration::from_secs(
                cli.sync_period
                    .or(file.sync_period_secs)
                    .unwrap_or(DEFAULT_SYNC_PERIOD_SECS),
            ),
            burst: cli
                .burst_syncs
                .or(file.burst_syncs)
                .unwrap_or(DEFAULT_BURST_SYNCS),
        },
        ingress_path_template: file
            .ingress_path_template
            .unwrap_or_else(|| DEFAULT_INGRESS_PATH_TEMPLATE.to_string()),
        service_path_template: file
            .service_path_template
            .unwrap_or_else(|| DEFAULT_SERVICE_PATH_TEMPLATE.to_string()),
        gateway_path_template: file
            .gateway_path_template
            .unwrap_or_else(|| DEFAULT_GATEWAY_PATH_TEMPLATE.to_string()),
        gateways_parent_path: file
            .gateways_parent_path
            .unwrap_or_else(|| DEFAULT_GATEWAYS_PARENT_PATH.to_string()),
        global_certificate,
    })
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    let base = &settings.base;
    for (field, value) in [
        ("region", &base.region),
        ("zone", &base.zone),
        ("group", &base.group),
        ("cluster", &base.cluster),
    ] {
        validate_name(value).map_err(|e| anyhow::anyhow!("{}: {}", field, e))?;
    }
    for template in [
        &settings.ingress_path_template,
        &settings.service_path_template,
        &settings.gateway_path_template,
    ] {
        validate_template(template)?;
    }
    if settings.runner.min_interval.is_zero() || settings.runner.max_interval.is_zero() {
        anyhow::bail!("sync periods must be positive");
    }
    if settings.runner.min_interval > settings.runner.max_interval {
        anyhow::bail!("min-sync-period must not exceed sync-period");
    }
    if settings.runner.burst == 0 {
        anyhow::bail!("burst-syncs must be at least 1");
    }
    Ok(())
}

async fn wait_for_repo(repo: &RepoClient, cancel: &CancellationToken) -> bool {
    loop {
        if repo.is_up().await {
            return true;
        }
        warn!("Repo at {} not ready, retrying", repo.base_url());
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down controller");
        }
        shutdown.cancel();
    });

    let source = MemorySource::new(DEFAULT_EVENT_LOG_SIZE);
    if settings.manifests.is_dir() {
        source.load_manifests(&settings.manifests).await?;
    } else {
        warn!(
            "Manifest directory {} not found, starting empty",
            settings.manifests.display()
        );
    }

    let cache = Arc::new(ResourceCache::new(CacheConfig {
        ingress_class: settings.ingress_class,
        controller_name: settings.controller_name,
        global_certificate: settings.global_certificate,
    }));

    let repo = RepoClient::new(&settings.repo, &settings.repo_api_path, RetryConfig::default())?;
    if !wait_for_repo(&repo, &cancel).await {
        return Ok(());
    }
    info!("Repo at {} is up", repo.base_url());

    let aggregator = match &settings.aggregator {
        Some(addr) => {
            let client = AggregatorClient::new(addr)?;
            info!("Pushing documents to aggregator at {}", client.base_url());
            Some(client)
        }
        None => None,
    };

    let mut sync_config = SyncConfig::new(settings.base);
    sync_config.gateway_address = settings.gateway_address;
    sync_config.ingress_path_template = settings.ingress_path_template;
    sync_config.service_path_template = settings.service_path_template;
    sync_config.gateway_path_template = settings.gateway_path_template;
    sync_config.gateways_parent_path = settings.gateways_parent_path;
    info!("Cluster uid: {}", sync_config.uid);

    let syncer = Arc::new(Syncer::new(
        cache.clone(),
        repo,
        aggregator,
        Arc::new(source.clone()),
        sync_config,
    ));
    let runner = BoundedFrequencyRunner::new("SyncRunner", settings.runner);
    let runner_task = runner.clone().start(syncer, cancel.clone());

    let handler = Arc::new(EventHandler::new(cache, runner));
    let watchers = run_watchers(Arc::new(source), handler, cancel.clone());

    info!("Controller is running. Press Ctrl-C to stop.");
    cancel.cancelled().await;
    for task in watchers {
        let _ = task.await;
    }
    let _ = runner_task.await;
    info!("Controller stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let file_cfg: ControllerConfigFile = match load_config_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load {}: {}", cli.config, e);
            std::process::exit(2);
        }
    };
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let settings = match resolve(cli, file_cfg).and_then(|s| validate(&s).map(|_| s)) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    info!("Starting fleetgate-controller");
    info!("  Cluster:    {}", settings.base);
    info!("  Repo:       {}", settings.repo);
    info!("  Class:      {}", settings.ingress_class);
    info!(
        "  Sync:       min={}s max={}s burst={}",
        settings.runner.min_interval.as_secs(),
        settings.runner.max_interval.as_secs(),
        settings.runner.burst
    );

    if let Err(e) = run(settings).await {
        error!("Controller failed: {:#}", e);
        std::process::exit(1);
    }
}
