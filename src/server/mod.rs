//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and serves each one on its own task with
//! [`serve_connection`]: HTTP/1.1 requests are routed through a [`Router`],
//! and WebSocket routes take over the connection after the upgrade.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::http::{HttpError, Response, StatusCode};
use crate::router::Router;
use crate::stream::StreamError;

pub mod connection;

pub use connection::{App, ErrorHandler, serve_connection};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("connection stream failed: {0}")]
    Stream(#[from] StreamError),
}

/// The switchyard HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use switchyard::context::Context;
/// use switchyard::http::HttpError;
/// use switchyard::{Router, Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |_ctx: Context| async { Ok::<_, HttpError>("Hello!") })?;
///
///     Server::bind("127.0.0.1:8080").await?.serve(router).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    error_handlers: Vec<(StatusCode, ErrorHandler)>,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config: ServerConfig::default(),
            error_handlers: Vec::new(),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Replaces the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when `config` fails validation.
    pub fn with_config(mut self, config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Renders every error with `status` (including router 404/405s) through
    /// `handler`.
    #[must_use]
    pub fn on_error<F>(mut self, status: StatusCode, handler: F) -> Self
    where
        F: Fn(HttpError) -> Response + Send + Sync + 'static,
    {
        self.error_handlers.push((status, Arc::new(handler)));
        self
    }

    /// Serves `router` until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, router: Router) -> Result<(), ServerError> {
        self.serve_with_shutdown(router, std::future::pending()).await
    }

    /// Serves `router` until `shutdown` resolves. Connections already accepted
    /// run to completion on their own tasks.
    pub async fn serve_with_shutdown<S>(self, router: Router, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let mut app = App::new(router, self.config);
        for (status, handler) in self.error_handlers {
            app.set_error_handler(status, handler);
        }
        let app = Arc::new(app);

        info!(address = %self.local_addr, routes = app.router().len(), "switchyard listening");

        tokio::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested; no longer accepting");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
            }
            debug!(peer = %peer_addr, "connection accepted");

            let app = Arc::clone(&app);
            tokio::spawn(
                async move {
                    if let Err(e) = serve_connection(stream, app).await {
                        warn!(error = %e, "connection closed with error");
                    }
                }
                .instrument(info_span!("connection", peer = %peer_addr)),
            );
        }
    }
}
