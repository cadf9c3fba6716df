//! CloudKeep -- per-user file storage API server.
//!
//! SIGTERM/SIGINT handlers stop accepting connections and give in-flight
//! requests `server.shutdown_timeout` seconds before the process exits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cloudkeep::auth::jwt::JwtVerifier;
use cloudkeep::auth::{Authorizer, TokenVerifier};
use cloudkeep::config::{Config, LoggingConfig, DEFAULT_CONFIG_PATH};
use cloudkeep::metadata::store::MetadataStore;
use cloudkeep::presign::UrlSigner;
use cloudkeep::storage::backend::ObjectStore;

/// Command-line arguments for the CloudKeep server.
#[derive(Parser, Debug)]
#[command(name = "cloudkeep", version, about = "Per-user file storage API server")]
struct Cli {
    /// Path to the YAML configuration file (default: ./cloudkeep.yaml if present).
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = match &cli.config {
        Some(path) => (cloudkeep::config::load_config(path)?, path.as_str()),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => (
            cloudkeep::config::load_config(DEFAULT_CONFIG_PATH)?,
            DEFAULT_CONFIG_PATH,
        ),
        None => (Config::default(), "built-in defaults"),
    };
    config.apply_env(|name| std::env::var(name).ok());

    init_tracing(&config.logging);
    info!("Configuration loaded from {}", source);
    info!(
        "Auth mode {:?}, identity source {:?}",
        config.auth.mode, config.auth.identity
    );

    let bind_addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        cloudkeep::metrics::init_metrics();
        cloudkeep::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let metadata = build_metadata(&config).await?;

    if config.storage.presign_secret.is_empty() && config.storage.backend != "aws" {
        warn!("storage.presign_secret is empty; blob links will not survive a restart");
    }
    let signer = Arc::new(UrlSigner::from_secret_or_random(
        &config.storage.presign_secret,
        &config.server.public_url,
    ));
    let storage = build_storage(&config, signer.clone()).await?;

    let verifier: Option<Arc<dyn TokenVerifier>> = match &config.auth.jwt {
        Some(jwt) => {
            info!("JWT verifier configured for issuer {}", jwt.issuer);
            Some(Arc::new(JwtVerifier::new(jwt)))
        }
        None => None,
    };
    let authorizer = Authorizer::new(&config.auth, verifier);

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(cloudkeep::AppState {
        config,
        metadata,
        storage,
        authorizer,
        signer,
    });

    let app = cloudkeep::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("CloudKeep listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("CloudKeep shut down");

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_metadata(config: &Config) -> anyhow::Result<Arc<dyn MetadataStore>> {
    let store: Arc<dyn MetadataStore> = match config.metadata.engine.as_str() {
        "memory" => {
            info!("In-memory metadata store initialized");
            Arc::new(cloudkeep::metadata::memory::MemoryMetadataStore::new())
        }
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            // Ensure parent directory exists for the SQLite file.
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = cloudkeep::metadata::sqlite::SqliteMetadataStore::new(path)?;
            info!("SQLite metadata store initialized at {}", path);
            Arc::new(store)
        }
        "dynamodb" => {
            let dynamo = config.metadata.dynamodb.as_ref().ok_or_else(|| {
                anyhow::anyhow!(
                    "metadata.engine is 'dynamodb' but metadata.dynamodb config section is missing"
                )
            })?;
            let store = cloudkeep::metadata::dynamodb::DynamoDbMetadataStore::new(dynamo).await?;
            info!("DynamoDB metadata store initialized: table={}", dynamo.table);
            Arc::new(store)
        }
        other => anyhow::bail!("Unknown metadata engine: {other}"),
    };
    Ok(store)
}

async fn build_storage(
    config: &Config,
    signer: Arc<UrlSigner>,
) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let storage: Arc<dyn ObjectStore> = match config.storage.backend.as_str() {
        "memory" => {
            let max = config.storage.memory.max_size_bytes;
            info!("In-memory object store initialized (max_size_bytes={})", max);
            Arc::new(cloudkeep::storage::memory::MemoryObjectStore::new(
                max, signer,
            ))
        }
        "local" => {
            let root = &config.storage.local.root_dir;
            let store = cloudkeep::storage::local::LocalObjectStore::new(root, signer)?;
            info!("Local object store initialized at {}", root);
            Arc::new(store)
        }
        "aws" => {
            let aws = config.storage.aws.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 'aws' but storage.aws config section is missing")
            })?;
            Arc::new(cloudkeep::storage::aws::S3ObjectStore::new(aws).await?)
        }
        other => anyhow::bail!("Unknown storage backend: {other}"),
    };
    Ok(storage)
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful
/// shutdown. A watchdog exits the process if draining exceeds `timeout`.
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        warn!("In-flight requests did not finish within {:?}, exiting", timeout);
        std::process::exit(1);
    });
}
