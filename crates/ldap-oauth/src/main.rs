//! OAuth2 authorization server authenticating users against LDAP
//!
//! Provides:
//! - Password and refresh-token grants issuing signed JWTs
//! - Token key and check-token endpoints for resource servers
//! - Scope approvals
//! - Bearer-token protection for every non-public route

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ldap_oauth::config::Config;
use ldap_oauth::directory::{LdapCredentialValidator, LdapDirectory};
use ldap_oauth::{password, AppState};

#[derive(Parser, Debug)]
#[command(name = "ldap-oauth")]
#[command(about = "OAuth2 authorization server backed by an LDAP directory")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8080, env = "LDAP_OAUTH_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "LDAP_OAUTH_BIND")]
    bind: String,

    /// Path to config directory
    #[arg(long, default_value = "/config", env = "LDAP_OAUTH_CONFIG_PATH")]
    config_path: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a bcrypt hash of a client secret for config.json
    HashSecret {
        secret: String,

        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ldap_oauth=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Some(Command::HashSecret { secret, cost }) = cli.command {
        let hash = password::hash_secret(&secret, cost).context("Failed to hash secret")?;
        println!("{}", hash);
        return Ok(());
    }

    // Load configuration
    let config = Config::load(&cli.config_path)?;
    let directory = LdapDirectory::new(&config.directory);
    let validator = Arc::new(LdapCredentialValidator::new(
        directory,
        config.directory.clone(),
    ));
    let sweep_interval = Duration::from_secs(config.tokens.sweep_interval_secs.max(1));

    let state = Arc::new(
        AppState::new(config, validator).context("Failed to load token signing key")?,
    );

    tokio::spawn(sweep_expired(state.clone(), sweep_interval));

    let app = ldap_oauth::router(state.clone());

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;

    tracing::info!("Starting ldap-oauth on {}", addr);
    tracing::info!("Directory: {}", state.config.directory.url);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("ldap-oauth shut down");
    Ok(())
}

/// Periodically drop expired approvals and spent refresh token ids
async fn sweep_expired(state: Arc<AppState>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        state.sweep();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
