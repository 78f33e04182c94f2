//! HTTP + WebSocket echo server.
//!
//! Run with: cargo run --example echo
//! Then: curl -d hello localhost:8080/echo, or open ws://localhost:8080/ws

use std::sync::Arc;

use serde::Deserialize;
use switchyard::context::Context;
use switchyard::http::{CacheControl, HttpError, Reply};
use switchyard::middleware::{LoggerMiddleware, from_middleware};
use switchyard::websocket::{CloseCode, ServerWebSocket};
use switchyard::{Method, Response, Route, Router, Server, ServerConfig, StatusCode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard=debug,echo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    let mut router = Router::new();
    router.middleware(from_middleware(Arc::new(LoggerMiddleware)));

    router.add(
        Route::new("/", Method::Get, |_ctx: Context| async {
            Ok::<_, HttpError>(Response::html("<h1>switchyard</h1>"))
        })
        .cache(CacheControl::new().public().max_age(300)),
    )?;

    router.post("/echo", |ctx: Context| async move {
        let body = ctx.body().bytes().await?;
        Ok::<_, HttpError>(Reply::Bytes(body))
    })?;

    router.post("/greet", |ctx: Context| async move {
        let greeting: Greeting = ctx.json().await?;
        Ok::<_, HttpError>(serde_json::json!({ "message": format!("hello, {}", greeting.name) }))
    })?;

    router.get("/files/{path}", |ctx: Context| async move {
        let path = ctx.param("path").unwrap_or_default().to_owned();
        if path.contains("..") {
            return Err(HttpError::bad_request("no parent segments"));
        }
        Ok(format!("you asked for {path}"))
    })?;

    router.websocket("/ws", |_ctx: Context, mut ws: ServerWebSocket| async move {
        while let Some(message) = ws.next().await {
            let Ok(message) = message else { break };
            let sent = if message.is_text() {
                match message.text() {
                    Ok(text) => ws.send_text(text.to_owned()).await,
                    Err(_) => break,
                }
            } else {
                ws.send_binary(message.into_payload()).await
            };
            if sent.is_err() {
                break;
            }
        }
        let _ = ws.close(CloseCode::NORMAL, "").await;
    })?;

    let server = Server::bind("127.0.0.1:8080")
        .await?
        .with_config(config)?
        .on_error(StatusCode::NotFound, |err| {
            Response::html(format!("<h1>{}</h1>", err.status)).with_status(err.status)
        });
    tracing::info!(address = %server.local_addr(), "echo demo ready");

    server
        .serve_with_shutdown(router, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
