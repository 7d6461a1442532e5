//! Echo/handshake endpoint
//!
//! A small HTTP/1.1 server on its own listener, independent of the chat
//! core:
//!
//! - `GET /`        plain `hello`
//! - `GET /ws`      websocket: one JSON request in, one fixed JSON reply out
//! - `GET /health`  `OK`
//! - `GET /metrics` Prometheus text
//!
//! Nothing here touches the registry, so a misbehaving echo client can never
//! disturb chat sessions.

use std::convert::Infallible;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use parley_protocol::{echo_reply_json, ECHO_INDEX_BODY};
use parley_utils::{ParleyError, Result};

use crate::observability::Metrics;

/// Failure of one websocket exchange
#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    #[error("no request within {0:?}")]
    Timeout(Duration),

    #[error("client closed before sending a request")]
    Closed,

    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Endpoints served by the echo listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Index,
    WebSocket,
    Health,
    Metrics,
    NotFound,
}

impl Route {
    fn resolve(method: &Method, path: &str) -> Self {
        if *method != Method::GET {
            return Route::NotFound;
        }
        match path {
            "/" => Route::Index,
            "/ws" => Route::WebSocket,
            "/health" => Route::Health,
            "/metrics" => Route::Metrics,
            _ => Route::NotFound,
        }
    }
}

/// Bind the echo listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ParleyError::bind(addr, e))?;

    match listener.local_addr() {
        Ok(local) => info!("Echo endpoint listening on http://{}", local),
        Err(_) => info!("Echo endpoint listening on http://{}", addr),
    }
    Ok(listener)
}

/// Run the echo server until shutdown is signalled
pub async fn run_echo_server(
    listener: TcpListener,
    read_timeout: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, remote_addr) = match accept_result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Echo endpoint accept error: {}", e);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);

                tokio::spawn(async move {
                    let service = service_fn(move |req| handle_request(req, read_timeout));

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        // Connection errors are expected when clients disconnect
                        if !e.is_incomplete_message() {
                            warn!("Echo connection error from {}: {}", remote_addr, e);
                        }
                    }
                });
            }

            _ = shutdown_rx.recv() => {
                info!("Echo endpoint shutting down");
                break;
            }
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    read_timeout: Duration,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match Route::resolve(req.method(), req.uri().path()) {
        Route::Index => text_response(StatusCode::OK, ECHO_INDEX_BODY),
        Route::WebSocket => upgrade_websocket(req, read_timeout),
        Route::Health => text_response(StatusCode::OK, "OK"),
        Route::Metrics => serve_metrics(),
        Route::NotFound => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn serve_metrics() -> Response<Full<Bytes>> {
    let metrics = Metrics::global();
    let mut gauges = metrics.gauges();
    gauges.collect_process_metrics();

    let mut response = Response::new(Full::new(Bytes::from(metrics.to_prometheus(&gauges))));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    response
}

fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Answer the handshake and hand the upgraded connection to a task
fn upgrade_websocket(mut req: Request<Incoming>, read_timeout: Duration) -> Response<Full<Bytes>> {
    if !is_websocket_upgrade(&req) {
        return text_response(StatusCode::BAD_REQUEST, "Expected websocket upgrade");
    }
    let accept = match req.headers().get(header::SEC_WEBSOCKET_KEY) {
        Some(key) => derive_accept_key(key.as_bytes()),
        None => return text_response(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key"),
    };
    let accept = match HeaderValue::from_str(&accept) {
        Ok(v) => v,
        Err(e) => {
            error!("Invalid websocket accept key: {}", e);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Handshake failed");
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                serve_websocket(ws, read_timeout).await;
            }
            Err(e) => warn!("Websocket upgrade failed: {}", e),
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    response
}

/// Run one exchange, then close with a code reflecting how it went
async fn serve_websocket<S>(mut ws: WebSocketStream<S>, read_timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (code, reason) = match exchange(&mut ws, read_timeout).await {
        Ok(()) => {
            Metrics::global().record_echo_exchange();
            (CloseCode::Normal, "")
        }
        Err(e) => {
            warn!(error = %e, "Echo exchange failed");
            (CloseCode::Error, "exchange failed")
        }
    };

    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "Websocket close failed");
        return;
    }

    // Wait briefly for the client's close reply so the socket shuts down cleanly
    let drain = async { while let Some(Ok(_)) = ws.next().await {} };
    let _ = tokio::time::timeout(read_timeout, drain).await;
}

/// Read one JSON message, log it, send the fixed reply
async fn exchange<S>(
    ws: &mut WebSocketStream<S>,
    read_timeout: Duration,
) -> std::result::Result<(), EchoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = tokio::time::timeout(read_timeout, read_json(ws))
        .await
        .map_err(|_| EchoError::Timeout(read_timeout))??;

    info!(request = %request, "Echo request received");

    ws.send(Message::text(echo_reply_json())).await?;
    Ok(())
}

async fn read_json<S>(
    ws: &mut WebSocketStream<S>,
) -> std::result::Result<serde_json::Value, EchoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
            Message::Binary(data) => return Ok(serde_json::from_slice(&data)?),
            Message::Close(_) => return Err(EchoError::Closed),
            // Pings are answered by the protocol layer
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
    Err(EchoError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::connect_async;

    async fn start(read_timeout: Duration) -> (SocketAddr, broadcast::Sender<()>) {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(run_echo_server(listener, read_timeout, shutdown_rx));
        (addr, shutdown_tx)
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_route_resolution() {
        assert_eq!(Route::resolve(&Method::GET, "/"), Route::Index);
        assert_eq!(Route::resolve(&Method::GET, "/ws"), Route::WebSocket);
        assert_eq!(Route::resolve(&Method::GET, "/health"), Route::Health);
        assert_eq!(Route::resolve(&Method::GET, "/metrics"), Route::Metrics);
        assert_eq!(Route::resolve(&Method::GET, "/nope"), Route::NotFound);
        assert_eq!(Route::resolve(&Method::POST, "/"), Route::NotFound);
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::NOT_FOUND, "Not Found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }

    #[tokio::test]
    async fn test_index_and_health() {
        let (addr, _shutdown) = start(Duration::from_secs(10)).await;

        let index = http_get(addr, "/").await;
        assert!(index.starts_with("HTTP/1.1 200 OK"));
        assert!(index.ends_with("hello"));

        let health = http_get(addr, "/health").await;
        assert!(health.ends_with("OK"));

        let missing = http_get(addr, "/missing").await;
        assert!(missing.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (addr, _shutdown) = start(Duration::from_secs(10)).await;

        let metrics = http_get(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 200 OK"));
        assert!(metrics.contains("parley_active_sessions"));
    }

    #[tokio::test]
    async fn test_plain_get_on_ws_is_rejected() {
        let (addr, _shutdown) = start(Duration::from_secs(10)).await;

        let response = http_get(addr, "/ws").await;
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_websocket_exchange() {
        let (addr, _shutdown) = start(Duration::from_secs(10)).await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        ws.send(Message::text(r#"{"greeting":"hi"}"#)).await.unwrap();

        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), "\"hello websocket client\""),
            other => panic!("expected text reply, got {:?}", other),
        }
        match ws.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_request_closes_with_error() {
        let (addr, _shutdown) = start(Duration::from_secs(10)).await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        ws.send(Message::text("not json")).await.unwrap();

        match ws.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Error),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let (addr, _shutdown) = start(Duration::from_millis(100)).await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server never closed the socket");
        match next.unwrap().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Error),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_echo_server(listener, Duration::from_secs(1), shutdown_rx));

        let _ = shutdown_tx.send(());
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "Echo server did not shut down");
    }
}
