//! HTTP server runner.

use axum::Router;
use gateway_config::ServerSettings;
use gateway_core::{GatewayError, GatewayResult};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::routes::create_router;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;

/// Listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Grace period for in-flight requests after the shutdown signal
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// From the `server` settings section
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }

    /// Set the bind address
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the shutdown grace period
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Parsed socket address
    ///
    /// # Errors
    /// Returns `Configuration` if host and port do not form an address
    pub fn socket_addr(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                GatewayError::configuration(format!(
                    "invalid listen address {}:{}: {e}",
                    self.host, self.port
                ))
            })
    }
}

/// The gateway HTTP server
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a server
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// The router this server serves
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Bind and serve until a shutdown signal arrives
    ///
    /// # Errors
    /// Returns error if binding or serving fails
    pub async fn run(self) -> GatewayResult<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::internal(format!("failed to bind {addr}: {e}")))?;
        self.run_with_listener(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` resolves, then drain
    ///
    /// Connections still open when the grace period ends are abandoned.
    ///
    /// # Errors
    /// Returns error if serving fails
    pub async fn run_with_listener<F>(self, listener: TcpListener, signal: F) -> GatewayResult<()>
    where
        F: Future + Send + 'static,
    {
        let local = listener
            .local_addr()
            .map_err(|e| GatewayError::internal(format!("listener address: {e}")))?;
        info!(address = %local, "Gateway listening");

        let router = self.router();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { trigger.cancelled().await });
        let mut server = tokio::spawn(async move { serve.await });

        tokio::select! {
            result = &mut server => return flatten(result),
            _ = signal => {}
        }

        info!(
            grace_secs = self.config.shutdown_timeout.as_secs(),
            "Draining in-flight requests"
        );
        token.cancel();

        match tokio::time::timeout(self.config.shutdown_timeout, &mut server).await {
            Ok(result) => flatten(result),
            Err(_) => {
                warn!("Shutdown grace period elapsed, abandoning open connections");
                server.abort();
                Ok(())
            }
        }
    }
}

fn flatten(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> GatewayResult<()> {
    match result {
        Ok(Ok(())) => {
            info!("Server stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(GatewayError::internal(format!("server error: {e}"))),
        Err(e) => Err(GatewayError::internal(format!("server task failed: {e}"))),
    }
}
