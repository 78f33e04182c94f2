//! The per-connection request loop.
//!
//! One request is handled at a time: parse, resolve, run the handler, write
//! the response, and only then read the next request. A successful WebSocket
//! upgrade hands the stream to the route's handler for the rest of the
//! connection's life.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, warn};

use super::ServerError;
use crate::config::ServerConfig;
use crate::context::Context;
use crate::http::{HttpError, Method, ParseError, Request, Response, StatusCode};
use crate::middleware::Next;
use crate::router::{Endpoint, Resolved, Router};
use crate::stream::{self, StreamError, StreamReader, StreamWriter};
use crate::websocket::ServerWebSocket;
use crate::websocket::handshake::{is_upgrade_request, select_subprotocol, switching_protocols};

/// Renders an [`HttpError`] of one status into a response.
pub type ErrorHandler = Arc<dyn Fn(HttpError) -> Response + Send + Sync + 'static>;

/// Everything a connection needs to serve requests, shared by all of them.
pub struct App {
    router: Router,
    config: ServerConfig,
    error_handlers: HashMap<StatusCode, ErrorHandler>,
}

impl App {
    pub fn new(mut router: Router, config: ServerConfig) -> Self {
        router.set_cache_capacity(config.route_cache_capacity);
        Self {
            router,
            config,
            error_handlers: HashMap::new(),
        }
    }

    /// Renders errors with `status` through `handler` instead of the default
    /// plain-text body.
    #[must_use]
    pub fn on_error<F>(mut self, status: StatusCode, handler: F) -> Self
    where
        F: Fn(HttpError) -> Response + Send + Sync + 'static,
    {
        self.error_handlers.insert(status, Arc::new(handler));
        self
    }

    pub(crate) fn set_error_handler(&mut self, status: StatusCode, handler: ErrorHandler) {
        self.error_handlers.insert(status, handler);
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn render_error(&self, err: HttpError) -> Response {
        let Some(handler) = self.error_handlers.get(&err.status) else {
            return err.into_response();
        };

        let headers = err.headers.clone();
        let mut response = handler(err);
        // Headers the error requires (such as `Allow`) survive custom rendering.
        for (name, value) in headers.iter() {
            if !response.headers().contains(name) {
                response.add_header(name, value);
            }
        }
        response
    }
}

enum Outcome {
    Respond(Response),
    Upgraded,
}

/// Serves every request arriving on `io` until the peer goes away, a
/// request asks to close, or the connection is upgraded and its WebSocket
/// handler returns.
pub async fn serve_connection<T>(io: T, app: Arc<App>) -> Result<(), ServerError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (reader, writer) = stream::open(io, app.config.transport_options());

    let result = request_loop(&reader, &writer, &app).await;

    writer.close();
    if let Err(err) = writer.wait_closed().await {
        debug!(error = %err, "transport teardown failed");
    }
    result
}

async fn request_loop(reader: &StreamReader, writer: &StreamWriter, app: &App) -> Result<(), ServerError> {
    loop {
        let parsed = Request::parse(reader, app.config.max_head_size, app.config.read_timeout()).await;
        let request = match parsed {
            Ok(request) => request,
            Err(ParseError::Stream(err)) if err.is_clean_eof() => {
                debug!("connection closed by peer");
                return Ok(());
            }
            Err(ParseError::Stream(StreamError::Timeout)) => {
                debug!("timed out waiting for a request");
                let response = Response::new(StatusCode::RequestTimeout).keep_alive(false);
                send(response, writer, app, false).await?;
                return Ok(());
            }
            Err(ParseError::UnsupportedVersion(version)) => {
                warn!(%version, "unsupported HTTP version");
                return reject(StatusCode::HttpVersionNotSupported, writer, app).await;
            }
            Err(err @ ParseError::HeadTooLarge(_)) => {
                warn!(error = %err, "request head too large");
                return reject(StatusCode::RequestHeaderFieldsTooLarge, writer, app).await;
            }
            Err(err @ ParseError::InvalidContentLength(_)) => {
                warn!(error = %err, "rejecting request");
                return reject(StatusCode::BadRequest, writer, app).await;
            }
            Err(err @ ParseError::UnsupportedTransferEncoding(_)) => {
                warn!(error = %err, "rejecting request");
                return reject(StatusCode::NotImplemented, writer, app).await;
            }
            Err(err) => {
                // Nothing sensible can be answered to an unparsable request.
                warn!(error = %err, "malformed request; dropping connection");
                return Ok(());
            }
        };

        let method = request.method();
        let keep_alive = app.config.keep_alive && request.is_keep_alive();
        let body = request.body().clone();

        debug!(%method, path = %request.path(), "dispatching request");

        let mut response = match dispatch(request, reader, writer, app).await? {
            Outcome::Respond(response) => response,
            Outcome::Upgraded => return Ok(()),
        };

        let keep_alive = keep_alive && !response.headers().has_token("connection", "close");
        response.set_keep_alive(keep_alive);
        send(response, writer, app, method == Method::Head).await?;

        if !keep_alive {
            return Ok(());
        }
        // Unread body bytes would otherwise be parsed as the next request.
        if let Err(err) = body.discard().await {
            debug!(error = %err, "request body truncated");
            return Ok(());
        }
    }
}

/// Answers a request that cannot be served and ends the connection. The
/// framing is unknown, so nothing after the head can be trusted.
async fn reject(status: StatusCode, writer: &StreamWriter, app: &App) -> Result<(), ServerError> {
    let response = Response::new(status)
        .body(status.canonical_reason())
        .keep_alive(false);
    send(response, writer, app, false).await
}

async fn send(
    mut response: Response,
    writer: &StreamWriter,
    app: &App,
    head_only: bool,
) -> Result<(), ServerError> {
    response.finalize(&app.config.server_name);
    response.write_to(writer, head_only).await?;
    Ok(())
}

async fn dispatch(
    request: Request,
    reader: &StreamReader,
    writer: &StreamWriter,
    app: &App,
) -> Result<Outcome, ServerError> {
    let Resolved { route, params } = match app.router.resolve(request.path(), request.method()) {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(error = %err, "route resolution failed");
            return Ok(Outcome::Respond(app.render_error(err.into())));
        }
    };

    match route.endpoint() {
        Endpoint::WebSocket(handler) => {
            if !is_upgrade_request(&request) {
                let err = HttpError::new(StatusCode::UpgradeRequired)
                    .with_message("this endpoint only accepts WebSocket upgrades")
                    .header("Upgrade", "websocket")
                    .header("Sec-WebSocket-Version", "13");
                return Ok(Outcome::Respond(app.render_error(err)));
            }

            let key = request.headers().get("sec-websocket-key").unwrap_or_default().to_owned();
            let protocol = select_subprotocol(&request, route.supported_subprotocols());
            send(switching_protocols(&key, protocol.as_deref()), writer, app, false).await?;
            debug!(path = %request.path(), ?protocol, "upgraded to websocket");

            let socket = ServerWebSocket::new(reader.clone(), writer.clone()).with_subprotocol(protocol);
            handler(Context::new(request, params), socket).await;
            Ok(Outcome::Upgraded)
        }
        Endpoint::Http(handler) => {
            let chain = app.router.chain_for(&route);
            let ctx = Context::new(request, params);
            let run = Next::new(chain, Arc::clone(handler)).run(ctx);

            let mut response = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(reply)) => reply.into_response(),
                Ok(Err(err)) => app.render_error(err),
                Err(_) => {
                    error!(path = %route.path(), "handler panicked");
                    app.render_error(HttpError::internal("Internal Server Error"))
                }
            };

            if let Some(control) = route.cache_control() {
                response.apply_cache_control(control);
            }
            Ok(Outcome::Respond(response))
        }
    }
}
