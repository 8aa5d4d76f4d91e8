//! coachlink - messaging-gateway session manager
//!
//! Keeps a session with the gateway alive, prints pairing codes, and sends
//! messages from the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use coachlink::notify::Notification;
use coachlink::{
    ControlPlane, GatewayClient, GatewayConfig, HttpControlPlane, PhonePlan, SessionState,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "coachlink")]
#[command(about = "Messaging-gateway session manager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hold the session open and report what happens
    Run {
        /// Path to config file
        #[arg(short, long, env = "COACHLINK_CONFIG", default_value = "coachlink.toml")]
        config: PathBuf,
    },

    /// Ask the gateway for its session status
    Status {
        /// Path to config file
        #[arg(short, long, env = "COACHLINK_CONFIG", default_value = "coachlink.toml")]
        config: PathBuf,
    },

    /// Send one message once the session is ready
    Send {
        /// Path to config file
        #[arg(short, long, env = "COACHLINK_CONFIG", default_value = "coachlink.toml")]
        config: PathBuf,

        /// Recipient phone number
        #[arg(long)]
        to: String,

        /// Message body
        #[arg(long)]
        body: String,

        /// Seconds to wait for the session to become ready
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,
    },

    /// Log the gateway session out and start a fresh pairing
    Logout {
        /// Path to config file
        #[arg(short, long, env = "COACHLINK_CONFIG", default_value = "coachlink.toml")]
        config: PathBuf,
    },

    /// Normalize a phone number
    Normalize {
        /// Number to normalize
        number: String,

        /// Country code to assume
        #[arg(long)]
        country_code: Option<String>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "coachlink.toml")]
        output: PathBuf,

        /// Control-plane base URL
        #[arg(long, default_value = "http://localhost:3001")]
        control_plane: String,

        /// Primary event-channel endpoint
        #[arg(long, default_value = "ws://localhost:3001/events")]
        endpoint: String,

        /// Secondary event-channel endpoint
        #[arg(long)]
        secondary: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("coachlink=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await?,
        Commands::Status { config } => status(&config).await?,
        Commands::Send {
            config,
            to,
            body,
            wait_secs,
        } => send(&config, &to, &body, Duration::from_secs(wait_secs)).await?,
        Commands::Logout { config } => logout(&config).await?,
        Commands::Normalize {
            number,
            country_code,
        } => normalize(&number, country_code)?,
        Commands::InitConfig {
            output,
            control_plane,
            endpoint,
            secondary,
        } => init_config(&output, control_plane, endpoint, secondary)?,
    }

    Ok(())
}

fn load(path: &Path) -> anyhow::Result<GatewayConfig> {
    GatewayConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    info!(
        control_plane = %config.control_plane_url,
        primary = %config.primary_endpoint,
        secondary = ?config.secondary_endpoint,
        "starting coachlink"
    );

    let client = GatewayClient::start(&config)?;
    let mut notifications = client.subscribe();
    client.open()?;

    loop {
        tokio::select! {
            received = notifications.recv() => match received {
                Ok(notification) => report(&notification),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notification listener lagged"),
                Err(RecvError::Closed) => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "cannot listen for shutdown signal");
                }
                info!("shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn report(notification: &Notification) {
    match notification {
        Notification::Qr { code } => {
            info!("scan this pairing code with the phone app");
            println!("{code}");
        }
        Notification::ConnectionStatus { connected: true, .. } => info!("session ready"),
        Notification::ConnectionStatus {
            connected: false,
            reason,
        } => warn!(reason = ?reason, "session not ready"),
        Notification::ConnectionError {
            endpoint,
            attempts,
            message,
        } => error!(endpoint = %endpoint, attempts, error = %message, "endpoint unreachable"),
        Notification::LoadingStatus(status) => {
            info!(percent = status.percent, message = %status.message, "loading");
        }
        other => info!(kind = other.kind().as_str(), "notification"),
    }
}

async fn status(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let control_plane = HttpControlPlane::from_config(&config)?;
    let snapshot = control_plane.status().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn send(config_path: &Path, to: &str, body: &str, wait: Duration) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let client = GatewayClient::start(&config)?;
    client.open()?;

    let outcome = async {
        client
            .wait_for_state(SessionState::FullyConnected, wait)
            .await?;
        client.send_message(to, body).await?;
        anyhow::Ok(())
    }
    .await;

    client.shutdown().await;
    outcome?;
    println!("sent");
    Ok(())
}

async fn logout(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let client = GatewayClient::start(&config)?;
    client.open()?;

    let outcome = client.force_disconnect().await;
    client.shutdown().await;
    outcome?;
    println!("logged out");
    Ok(())
}

fn normalize(number: &str, country_code: Option<String>) -> anyhow::Result<()> {
    let mut plan = PhonePlan::default();
    if let Some(cc) = country_code {
        plan.country_code = cc;
    }
    println!("{}", plan.normalize(number)?);
    Ok(())
}

fn init_config(
    output: &Path,
    control_plane: String,
    endpoint: String,
    secondary: Option<String>,
) -> anyhow::Result<()> {
    let mut config = GatewayConfig::new(control_plane, endpoint);
    if let Some(secondary) = secondary {
        config = config.with_secondary_endpoint(secondary);
    }
    config.write_file(output)?;
    println!("wrote {}", output.display());
    Ok(())
}
