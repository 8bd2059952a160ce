//! HTTP handlers for the wschat server.
//!
//! Serves the chat page, upgrades `/ws` requests and hands each socket to a
//! session joined to the shared hub.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use wschat_core::{hub, HubHandle, SessionConfig};
use wschat_transport::axum_ws;

/// Chat page served when no `base_dir` is configured.
const DEFAULT_HOME: &str = include_str!("../static/home.html");

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Settings applied to every session.
    pub session: SessionConfig,
    /// Home page template.
    pub home: String,
}

impl AppState {
    /// Create new app state around a running hub.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured home page template cannot be read.
    pub fn new(config: &Config, hub: HubHandle) -> Result<Self> {
        let home = match config.home_template() {
            Some(path) => std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read home template: {}", path.display()))?,
            None => DEFAULT_HOME.to_string(),
        };

        Ok(Self {
            hub,
            session: config.session_config(),
            home,
        })
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (hub, hub_task) = hub::spawn(config.hub_config());
    let state = Arc::new(AppState::new(&config, hub.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("wschat listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(hub))
    .await
    .context("HTTP server failed")?;

    if let Err(e) = hub_task.await {
        warn!("Hub task ended abnormally: {}", e);
    }
    info!("wschat stopped");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM, after telling the hub to close every queue.
async fn shutdown_signal(hub: HubHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutting down");
    if hub.shutdown().await.is_err() {
        debug!("Hub already stopped");
    }
}

/// Chat page, with the request's host filled in for the socket URL.
async fn home_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Html<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    Html(render_home(&state.home, host))
}

fn render_home(template: &str, host: &str) -> String {
    template.replace("{{host}}", &escape_html(host))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "participants": stats.participants,
        }))
        .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "stopping",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        )
            .into_response(),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let limit = state.session.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            // Record connection metrics
            let _metrics_guard = ConnectionMetricsGuard::new();

            let connection = axum_ws::split(socket).with_remote_addr(remote.to_string());
            let id = connection.id.clone();
            debug!(connection = %id, remote = %remote, "WebSocket connected");

            match wschat_core::serve(connection, state.hub.clone(), state.session.clone()).await {
                Ok(()) => debug!(connection = %id, "WebSocket disconnected"),
                Err(e) => debug!(connection = %id, error = %e, "WebSocket closed with error"),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use wschat_protocol::codec::{decode_batch, encode_message};
    use wschat_protocol::ChatMessage;

    async fn start() -> (SocketAddr, HubHandle) {
        let (hub, _task) = hub::spawn(Default::default());
        let state = Arc::new(AppState::new(&Config::default(), hub.clone()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (addr, hub)
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_render_home_substitutes_host() {
        let page = render_home("ws://{{host}}/ws", "chat.example:8080");
        assert_eq!(page, "ws://chat.example:8080/ws");
        assert!(DEFAULT_HOME.contains("{{host}}"));
    }

    #[test]
    fn test_render_home_escapes_host() {
        let page = render_home("{{host}}", "a\"<b>");
        assert_eq!(page, "a&#34;&lt;b&gt;");
    }

    #[tokio::test]
    async fn test_home_page() {
        let (addr, _hub) = start().await;
        let response = raw_request(
            addr,
            "GET / HTTP/1.1\r\nHost: chat.example:8080\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("text/html"));
        assert!(response.contains("chat.example:8080/ws"));
    }

    #[tokio::test]
    async fn test_home_rejects_other_methods() {
        let (addr, _hub) = start().await;
        let response = raw_request(
            addr,
            "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 405"));
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let (addr, _hub) = start().await;
        let response = raw_request(
            addr,
            "GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_chat_over_websocket() {
        let (addr, hub) = start().await;
        let url = format!("ws://{}/ws", addr);

        let (mut alice, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut bob, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        while hub.stats().await.unwrap().participants != 2 {
            tokio::task::yield_now().await;
        }

        let health = raw_request(
            addr,
            "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(health.contains("\"participants\":2"));

        let hello = ChatMessage::new("alice", "hello");
        alice
            .send(Message::Text(encode_message(&hello).unwrap()))
            .await
            .unwrap();

        for socket in [&mut alice, &mut bob] {
            let text = loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("Expected batch, got {:?}", other),
                }
            };
            assert_eq!(
                decode_batch(text.as_bytes()).unwrap().messages,
                vec![hello.clone()]
            );
        }

        bob.close(None).await.unwrap();
        while hub.stats().await.unwrap().participants != 1 {
            tokio::task::yield_now().await;
        }
    }
}
