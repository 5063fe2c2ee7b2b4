use super::config::{default_config_path, default_database_path, LoggingConfig, NodeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use zkattest::algorithm::AlgorithmRegistry;
use zkattest::community::StaticAttributeHandler;
use zkattest::store::SqliteAttestationStore;
use zkattest::transport::udp::MAX_DATAGRAM_SIZE;
use zkattest::transport::{Peer, UdpTransport};
use zkattest::AttestationCommunity;

/// Run the attestation node
///
/// Binds the UDP socket, opens the attestation database and serves the
/// attestation protocol until interrupted.
///
/// ## Configuration Loading
///
/// 1. `--config` flag if provided
/// 2. Default config at `~/.local/share/zkattest/config.toml`
///
/// If the config file doesn't exist, a default one is generated.
pub async fn execute(
    config_path: Option<String>,
    bind: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let mut config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        eprintln!(
            "No config file found. Creating default configuration at {}",
            config_path.display()
        );
        NodeConfig::create_default(&config_path, &default_database_path())?;
        NodeConfig::load(&config_path)?
    };
    if let Some(bind) = bind {
        config.node.bind_address = bind;
    }

    init_tracing(&config.logging)?;
    info!(config = %config_path.display(), "Starting zkattest node");

    let store = SqliteAttestationStore::open(&config.storage.database_path).await?;
    let transport = UdpTransport::bind(config.bind_address()?).await?;
    let me = Peer::from_address(transport.local_addr()?);

    let handler = config.attribute_values()?.into_iter().fold(
        StaticAttributeHandler::new().allow_verification(config.verification.allow),
        |handler, (name, value)| handler.with_attribute(&name, &value),
    );

    let community = Arc::new(AttestationCommunity::new(
        me.clone(),
        config.protocol.clone(),
        AlgorithmRegistry::with_defaults(),
        Arc::new(transport.clone()),
        Arc::new(store),
        Arc::new(handler),
    )?);
    community.load_keys().await?;

    info!(
        peer_name = %config.node.peer_name,
        peer = %me,
        attributes = config.attributes.len(),
        verification_allowed = config.verification.allow,
        "Node listening"
    );

    let sweeper = community.spawn_sweeper();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            received = transport.recv(&mut buf) => {
                match received {
                    Ok((len, from)) => {
                        let peer = Peer::from_address(from);
                        let bytes = buf[..len].to_vec();
                        let community = Arc::clone(&community);
                        debug!(peer = %peer, size = len, "Datagram received");
                        tokio::spawn(async move {
                            community.on_packet(&peer, &bytes).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Receive failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    sweeper.abort();
    Ok(())
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &logging.file {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| format!("Failed to open log file '{}': {}", log_file.display(), e))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
