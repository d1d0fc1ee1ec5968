//! Credential proxy server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::forward::{ProxyState, UpstreamTarget};
use super::router::create_router;
use crate::broker::handler::IssuanceState;
use crate::broker::{CredentialBroker, Reaper};
use crate::config::Config;
use crate::{Error, Result};

/// Credential proxy server
pub struct CredentialProxy {
    /// Configuration
    config: Config,
    /// Token authority shared with the handlers and the reaper
    broker: Arc<CredentialBroker>,
}

impl CredentialProxy {
    /// Create a proxy, resolving the upstream secret from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no usable secret is configured or the
    /// token settings are inconsistent.
    pub fn new(config: Config) -> Result<Self> {
        let broker = Arc::new(CredentialBroker::from_config(&config)?);
        Ok(Self::with_broker(config, broker))
    }

    /// Create a proxy around an existing broker.
    #[must_use]
    pub fn with_broker(config: Config, broker: Arc<CredentialBroker>) -> Self {
        Self { config, broker }
    }

    /// Shared broker handle.
    #[must_use]
    pub fn broker(&self) -> &Arc<CredentialBroker> {
        &self.broker
    }

    /// Build the application router.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the upstream client cannot be built.
    pub fn router(&self) -> Result<Router> {
        let upstream = &self.config.upstream;
        let client = reqwest::Client::builder()
            .timeout(upstream.timeout)
            .connect_timeout(upstream.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("failed to build upstream client: {e}")))?;

        let state = Arc::new(ProxyState {
            broker: Arc::clone(&self.broker),
            client,
            upstream: UpstreamTarget::from_config(upstream, self.config.server.max_body_size)?,
        });

        let issuance = self.config.tokens.issuance_enabled.then(|| {
            Arc::new(IssuanceState {
                broker: Arc::clone(&self.broker),
                admin_token: self.config.tokens.resolve_admin_token(),
            })
        });

        Ok(create_router(state, issuance))
    }

    /// Bind the configured address and serve until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    ///
    /// The reaper runs for the lifetime of the server and is joined before
    /// this returns. In-flight requests get `server.shutdown_timeout` to
    /// finish once `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the router cannot be built or serving fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router()?;
        let local_addr = listener.local_addr()?;
        self.log_banner(local_addr);

        let reaper = Reaper::start(
            Arc::clone(self.broker.store()),
            self.config.tokens.cleanup_interval,
        );

        let draining = Arc::new(Notify::new());
        let drain_started = Arc::clone(&draining);
        let server = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown.await;
                    drain_started.notify_one();
                })
                .await
        };

        let grace = self.config.server.shutdown_timeout;
        let result = tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string())),
            () = async {
                draining.notified().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(timeout = ?grace, "Graceful shutdown timed out, dropping open connections");
                Ok(())
            }
        };

        info!("Stopping token reaper...");
        reaper.shutdown().await;

        result
    }

    fn log_banner(&self, addr: SocketAddr) {
        let tokens = &self.config.tokens;
        info!("============================================================");
        info!("CREDENTIAL PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(addr = %addr, "Listening");
        info!(upstream = %self.config.upstream.base_url, "Forwarding to upstream");
        info!(
            prefix = %tokens.prefix,
            default_ttl = ?tokens.default_ttl,
            max_ttl = ?tokens.max_ttl,
            cleanup_interval = ?tokens.cleanup_interval,
            "Token policy"
        );
        if tokens.issuance_enabled {
            info!("TOKEN ISSUANCE enabled:");
            info!("  POST   http://{addr}/token  (issue)");
            info!("  DELETE http://{addr}/token  (revoke)");
            if tokens.resolve_admin_token().is_none() {
                warn!("ISSUANCE UNAUTHENTICATED - set tokens.admin_token to restrict minting");
            }
        }
        info!("============================================================");
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
