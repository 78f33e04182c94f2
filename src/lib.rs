//! # switchyard
//!
//! An async HTTP/1.1 connection pipeline: buffered streams with backpressure,
//! a request/response codec, a template router with a resolution cache, and
//! RFC 6455 WebSockets.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchyard::context::Context;
//! use switchyard::http::HttpError;
//! use switchyard::websocket::{CloseCode, ServerWebSocket};
//! use switchyard::{Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/users/{id}", |ctx: Context| async move {
//!         Ok::<_, HttpError>(format!("user {}", ctx.param("id").unwrap_or_default()))
//!     })?;
//!     router.websocket("/echo", |_ctx: Context, mut ws: ServerWebSocket| async move {
//!         while let Some(Ok(message)) = ws.next().await {
//!             let _ = ws.send_binary(message.into_payload()).await;
//!         }
//!         let _ = ws.close(CloseCode::NORMAL, "").await;
//!     })?;
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;
pub mod stream;
pub mod websocket;

pub use config::ServerConfig;
pub use context::{Context, Parameters};
pub use http::{Headers, HttpError, Method, Reply, Request, Response, StatusCode};
pub use router::{Route, Router};
pub use server::{Server, ServerError};
