mod config;
mod executor;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ember_cluster::{
    ClusterConfigService, ClusterConfiguration, ExecutorAppliers,
    InconsistentConfigurationListener, MemberId, ObserverService,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::executor::LoggingExecutor;
use crate::transport::UdpTransport;

#[derive(Parser)]
#[command(name = "ember-server", about = "ember cluster configuration node")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "EMBER_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// directory for the persisted cluster configuration
    #[arg(long, env = "EMBER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// UDP address for gossip
    #[arg(long, env = "EMBER_BIND")]
    bind: Option<String>,

    /// this node's member id
    #[arg(long, env = "EMBER_MEMBER_ID")]
    member_id: Option<String>,

    /// only watch the cluster: no persistence, no changes applied
    #[arg(long, env = "EMBER_OBSERVER")]
    observer: bool,
}

fn apply_args(cfg: &mut ServerConfig, args: &Args) {
    if let Some(ref dir) = args.data_dir {
        cfg.data_dir = dir.display().to_string();
    }
    if let Some(ref bind) = args.bind {
        cfg.bind = bind.clone();
    }
    if let Some(ref id) = args.member_id {
        cfg.cluster.member_id = MemberId::from(id.as_str());
    }
}

fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

/// Logs configurations whose local member state changed behind our back.
struct LogInconsistencies;

impl InconsistentConfigurationListener for LogInconsistencies {
    fn on_inconsistent(&self, old: &ClusterConfiguration, new: &ClusterConfiguration) {
        error!(
            old_version = old.version,
            new_version = new.version,
            "local member state was changed by another member"
        );
    }
}

/// Logs every configuration version until ctrl-c.
async fn watch_until_shutdown(mut configurations: watch::Receiver<ClusterConfiguration>) {
    loop {
        tokio::select! {
            changed = configurations.changed() => {
                if changed.is_err() {
                    warn!("configuration updates stopped");
                    break;
                }
                let configuration = configurations.borrow_and_update().clone();
                info!(
                    version = configuration.version,
                    members = configuration.members.len(),
                    pending_change = configuration.pending_changes.as_ref().map(|p| p.id),
                    "cluster configuration updated"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
}

async fn run_member(cfg: ServerConfig, transport: UdpTransport) {
    let data_dir = cfg.data_dir_path();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        exit_err(format!(
            "failed to create data directory '{}': {e}",
            data_dir.display()
        ));
    }

    let mut service = ClusterConfigService::spawn(cfg.cluster, &data_dir, Arc::new(transport.clone()))
        .unwrap_or_else(|e| exit_err(format!("invalid cluster settings: {e}")));
    transport.spawn_receiver(service.gossip().clone());

    let configuration = service
        .initialize(Arc::new(transport))
        .await
        .unwrap_or_else(|e| exit_err(format!("failed to initialize cluster configuration: {e}")));
    info!(
        member = %service.local_id(),
        version = configuration.version,
        cluster_id = configuration.cluster_id.as_deref().unwrap_or("-"),
        "cluster configuration ready"
    );

    let executor = Arc::new(LoggingExecutor);
    let appliers = ExecutorAppliers::new(executor.clone(), executor);
    if let Err(e) = service.register_appliers(Arc::new(appliers)).await {
        exit_err(format!("failed to register change appliers: {e}"));
    }
    if let Err(e) = service.add_listener(Arc::new(LogInconsistencies)).await {
        exit_err(format!("failed to register listener: {e}"));
    }

    watch_until_shutdown(service.subscribe()).await;
}

async fn run_observer(cfg: ServerConfig, transport: UdpTransport) {
    let observer = ObserverService::spawn(
        cfg.cluster.member_id.clone(),
        cfg.cluster.members.clone(),
        cfg.cluster.gossip_config(),
        Arc::new(transport.clone()),
    );
    transport.spawn_receiver(observer.gossip().clone());
    info!(member = %observer.local_id(), "observing cluster");
    watch_until_shutdown(observer.subscribe()).await;
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember_server=info,ember_cluster=info".into()),
        )
        .init();

    let args = Args::parse();

    // --config-template: dump defaults and exit
    if args.config_template {
        match ServerConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    // defaults, then the config file, then env/CLI
    let mut cfg = match args.config {
        Some(ref path) => ServerConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => ServerConfig::default(),
    };
    apply_args(&mut cfg, &args);

    let bind = cfg.bind_addr().unwrap_or_else(|e| exit_err(e));
    let peers = cfg.peer_addrs().unwrap_or_else(|e| exit_err(e));
    let transport = UdpTransport::bind(cfg.cluster.member_id.clone(), bind, peers)
        .await
        .unwrap_or_else(|e| exit_err(format!("failed to bind {bind}: {e}")));

    if args.observer {
        if cfg.cluster.members.contains(&cfg.cluster.member_id) {
            exit_err("an observer's member id must not be one of the cluster members");
        }
        run_observer(cfg, transport).await;
    } else {
        run_member(cfg, transport).await;
    }
}
