//! CLI Module
//!
//! Command-line interface for the gateway using Clap v4.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::gateway::{self, AppContext};
use crate::session::{PairingWaiters, RetryPolicy, SessionDirs, SessionManager, SessionStore};
use crate::transport::Transport;

/// Wagate - Multi-Session WhatsApp Pairing Gateway
#[derive(Parser, Debug)]
#[command(name = "wagate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode (writes log files under the data directory)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP gateway (default)
    Serve {
        /// Port override
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Delete stale session directories and exit
    Cleanup {
        /// Age threshold in hours
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
    },
}

/// Run the selected command.
pub async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Cleanup { max_age_hours } => {
            let dirs = SessionDirs::new(&config.sessions.root);
            let removed = dirs
                .sweep_stale(std::time::Duration::from_secs(max_age_hours * 60 * 60))
                .context("stale-session sweep failed")?;
            println!("Removed {removed} stale session director(y/ies)");
            Ok(())
        }
    }
}

fn build_transport() -> Arc<dyn Transport> {
    #[cfg(feature = "whatsapp-web")]
    {
        Arc::new(crate::transport::wa::WaTransport::new())
    }
    #[cfg(not(feature = "whatsapp-web"))]
    {
        tracing::warn!(
            "built without the whatsapp-web feature; sessions run on the in-memory transport"
        );
        Arc::new(crate::transport::MemoryTransport::new())
    }
}

async fn serve(mut config: Config, port_override: Option<u16>) -> Result<()> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let store = Arc::new(SessionStore::new(config.sessions.max_sessions));
    let waiters = Arc::new(PairingWaiters::new());
    let dirs = SessionDirs::new(&config.sessions.root);
    let manager = Arc::new(
        SessionManager::new(
            store.clone(),
            dirs.clone(),
            build_transport(),
            waiters.clone(),
        )
        .with_retry_policy(RetryPolicy {
            max_retries: config.sessions.max_retries,
            backoff: config.sessions.reconnect_delay(),
        })
        .with_pairing_delay(config.sessions.pairing_delay())
        .with_newsletters(config.whatsapp.newsletters.clone())
        .with_connect_notice(config.whatsapp.connect_notice),
    );

    // Disk is ground truth after a restart; rebuild the store from it.
    let restored = manager.reconcile().await?;
    if restored > 0 {
        tracing::info!("resumed with {restored} session(s) from a previous run");
    }

    let cleanup_task = manager.clone().spawn_cleanup_task(
        config.sessions.cleanup_interval(),
        config.sessions.stale_age(),
    );

    let state = Arc::new(AppContext {
        store,
        manager: manager.clone(),
        waiters,
        dirs,
        pairing_timeout: config.sessions.pairing_timeout(),
        started_at: Instant::now(),
    });

    let public_dir = config.gateway.public_dir.clone();
    let public_dir = public_dir.is_dir().then_some(public_dir);
    let app = gateway::router(state, public_dir);

    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        "gateway listening on http://{addr} (limit: {} sessions)",
        config.sessions.max_sessions
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cleanup_task.abort();
    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
