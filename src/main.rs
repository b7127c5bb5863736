//! CacheCast - cluster cache invalidation broadcast
//!
//! Usage:
//!   cachecast [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   -b, --bind <ADDR>       Cluster bind address (default: 0.0.0.0:9911)
//!   -m, --member <ADDR>     Static cluster member (repeatable)
//!   -p, --pod-name <NAME>   Local identity announced to peers
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help
//!
//! Every line read from stdin is broadcast to the cluster as an event;
//! `status` prints the member and message counters.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cachecast::cluster::ClusterBroadcast;
use cachecast::config::{Config, DiscoveryMode};
use cachecast::discovery::{self, MemberDiscovery};
use cachecast::event::RawEventCodec;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// CacheCast - peer-to-peer cache invalidation broadcast
#[derive(Parser, Debug)]
#[command(name = "cachecast")]
#[command(version)]
#[command(about = "Broadcast cache invalidation events between cluster members")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cluster bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Static cluster member address (host or host:port), repeatable
    #[arg(short, long = "member")]
    members: Vec<String>,

    /// Local identity announced to peers
    #[arg(short, long)]
    pod_name: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let loaded = match &args.config {
        Some(config_path) => Config::load(config_path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(bind) = args.bind {
        config.cluster.bind = bind;
    }
    if let Some(pod_name) = args.pod_name {
        config.cluster.pod_name = Some(pod_name);
    }
    if !args.members.is_empty() {
        config.discovery.mode = DiscoveryMode::Static;
        config.discovery.members.extend(args.members);
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let local_address = config.cluster.local_address();
    let discovery: Arc<dyn MemberDiscovery> = Arc::from(discovery::from_config(
        &config.discovery,
        &config.cluster,
        &local_address,
    ));

    info!("Starting CacheCast");
    info!("  Bind address: {}", config.cluster.bind);
    info!("  Local address: {}", local_address);
    info!("  Identity: {}", discovery.local_identity());
    match config.discovery.mode {
        DiscoveryMode::Static => {
            info!("  Discovery: static ({} members)", config.discovery.members.len())
        }
        DiscoveryMode::Dns => info!(
            "  Discovery: dns ({})",
            config.discovery.service.as_deref().unwrap_or_default()
        ),
    }

    let codec = RawEventCodec::new(Arc::new(|event: Bytes| {
        info!("Received event: {}", String::from_utf8_lossy(&event));
    }));
    let cluster = ClusterBroadcast::new(config.cluster.clone(), discovery, codec);

    if let Err(e) = cluster.startup().await {
        eprintln!("Error starting cluster: {}", e);
        std::process::exit(1);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                };

                let line = line.trim();
                match line {
                    "" => {}
                    "status" => {
                        let status = cluster.status();
                        println!(
                            "members={} incoming={} outgoing={} peers={:?}",
                            status.member_count,
                            status.incoming_count,
                            status.outgoing_count,
                            cluster.members()
                        );
                    }
                    event => cluster.broadcast(&Bytes::copy_from_slice(event.as_bytes())).await,
                }
            }
        }
    }

    cluster.shutdown().await;
    Ok(())
}
