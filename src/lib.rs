//! partyd - real-time tabletop session server daemon
//!
//! Rooms, characters, battle maps and turn-based combat, with every change
//! pushed to the room's live WebSocket connections.

pub mod api;
pub mod auth;
pub mod combat;
pub mod config;
pub mod connections;
pub mod coordinator;
pub mod db;
pub mod dice;
pub mod error;
pub mod permissions;
pub mod protocol;
pub mod store;
pub mod timers;

pub use config::Config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use api::{AppState, ConnectionSettings};
use connections::ConnectionRegistry;
use coordinator::Coordinator;
use db::Database;
use store::Store;
use timers::GraceTimers;

/// The partyd server instance
pub struct Server {
    config: Config,
    db: Arc<Database>,
    coordinator: Arc<Coordinator>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Open the database and bind the listener
    pub async fn new(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(config.db_path.as_deref()).await?);
        let coordinator = Arc::new(Coordinator::new(
            Store::new(db.pool().clone()),
            Arc::new(ConnectionRegistry::new(config.outbound_buffer)),
            Arc::new(GraceTimers::new(config.grace_period())),
        ));

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            db,
            coordinator,
            listener: Mutex::new(Some(listener)),
            local_addr,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the database handle
    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    fn router(&self) -> Router {
        api::router(AppState {
            db: self.db.clone(),
            coordinator: self.coordinator.clone(),
            settings: Arc::new(ConnectionSettings::from(&self.config)),
        })
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("server is already running"))?;
        info!("partyd listening on {}", self.local_addr);

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let coordinator = self.coordinator.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
                // Open sockets would otherwise hold the graceful shutdown
                coordinator.shutdown();
            })
            .await?;

        info!("partyd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Address actually bound (differs from `bind_addr` for port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
