//! `wa-relay` binary: run the relay, pair the sidecar, or show its status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bollard::Docker;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use wa_relay::config::RelayConfig;
use wa_relay::logging;
use wa_relay::relay::dispatcher::Dispatcher;
use wa_relay::relay::forwarder::WebhookForwarder;
use wa_relay::session::{pairing_display, Session, SessionBootstrap};
use wa_relay::whatsapp::client::WhatsAppClient;
use wa_relay::whatsapp::events::spawn_event_listener;
use wa_relay::whatsapp::setup::setup_qr;

/// Relay WhatsApp messages to an HTTP webhook and send its replies back.
#[derive(Debug, Parser)]
#[command(name = "wa-relay", version, about)]
struct Cli {
    /// Path to the TOML config file (default: $WA_RELAY_CONFIG or ./wa-relay.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay until interrupted.
    Start,
    /// Start the WhatsApp sidecar container and print the pairing QR code.
    Setup,
    /// Show the sidecar's WhatsApp connection status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RelayConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Start => {
            let logs_dir = config.logging.resolve_logs_dir()?;
            let _guard = logging::init_production(&logs_dir, &config.logging.level)?;
            run_relay(config).await
        }
        Command::Setup => {
            logging::init_cli(&config.logging.level);
            run_setup(&config).await
        }
        Command::Status => {
            logging::init_cli(&config.logging.level);
            run_status(&config).await
        }
    }
}

/// Wire the event listener, forwarder and dispatcher, then run until ctrl-c.
async fn run_relay(config: RelayConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "wa-relay starting");

    let forwarder =
        Arc::new(WebhookForwarder::new(&config.webhook).context("failed to build webhook client")?);
    let client = WhatsAppClient::from_config(&config.session);

    match client.status().await {
        Ok(status) if status.connected => {
            info!(phone = ?status.phone_number, "saved WhatsApp session found");
        }
        Ok(_) => info!("WhatsApp session not paired yet, waiting for a pairing code"),
        Err(e) => warn!(error = %e, "sidecar not reachable yet, the event listener will keep retrying"),
    }

    let (event_tx, event_rx) = mpsc::channel(config.session.channel_buffer_size);
    let listener = spawn_event_listener(
        config.session.bridge_url.clone(),
        Duration::from_secs(config.session.poll_timeout_secs),
        event_tx,
    );

    let session: Arc<dyn Session> = Arc::new(client);
    let dispatcher = Dispatcher::new(forwarder, session, SessionBootstrap::new(true));

    info!(webhook = %config.webhook.url, "wa-relay ready, listening for messages");

    let stats = dispatcher
        .run(
            event_rx,
            shutdown_signal(),
            Duration::from_secs(config.shutdown_timeout_secs),
        )
        .await;

    listener.abort();
    info!(?stats, "wa-relay shut down cleanly");
    Ok(())
}

/// Resolves on ctrl-c. If the signal handler cannot be installed the relay
/// runs until killed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn run_setup(config: &RelayConfig) -> Result<()> {
    let docker = Docker::connect_with_local_defaults().context("failed to connect to Docker")?;
    let client = WhatsAppClient::from_config(&config.session);
    match setup_qr(&docker, &config.sidecar, &client).await? {
        Some(code) => {
            println!("Scan this QR code with WhatsApp (Settings > Linked devices):");
            println!("{}", pairing_display(&code));
        }
        None => println!("WhatsApp session already paired."),
    }
    Ok(())
}

async fn run_status(config: &RelayConfig) -> Result<()> {
    let client = WhatsAppClient::from_config(&config.session);
    let status = client
        .status()
        .await
        .with_context(|| format!("sidecar not reachable at {}", client.base_url()))?;

    let state = if status.connected {
        "ready"
    } else if status.awaiting_pairing {
        "awaiting pairing"
    } else {
        "unauthenticated"
    };
    println!("session:  {state}");
    if let Some(phone) = status.phone_number {
        println!("phone:    {phone}");
    }
    println!("webhook:  {}", config.webhook.url);
    Ok(())
}
