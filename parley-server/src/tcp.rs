//! TCP listener for chat clients

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use parley_utils::{ParleyError, Result};

use crate::connection::handle_client;
use crate::observability::Metrics;
use crate::SharedState;

/// Bind the chat listener
///
/// Failure here is fatal for the server.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ParleyError::bind(addr, e))?;

    match listener.local_addr() {
        Ok(local) => info!("Chat listener bound to {}", local),
        Err(_) => info!("Chat listener bound to {}", addr),
    }
    Ok(listener)
}

/// Run the TCP accept loop until shutdown is signalled
///
/// Every accepted connection gets its own handler task. Accept errors are
/// logged and the loop keeps going.
pub async fn run_tcp_accept_loop(listener: TcpListener, shared_state: SharedState) {
    let mut shutdown_rx = shared_state.subscribe_shutdown();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        if shared_state.registry.is_closed() {
                            error!("Session registry stopped, no longer accepting");
                            break;
                        }
                        debug!("New TCP connection from {}", peer_addr);
                        Metrics::global().record_accept();

                        let registry = shared_state.registry.clone();
                        let config = shared_state.config.session.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_client(reader, writer, peer_addr.to_string(), registry, config)
                                .await;
                        });
                    }
                    Err(e) => {
                        Metrics::global().record_accept_error();
                        error!("TCP accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping TCP accept loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::sync::broadcast;

    use crate::config::AppConfig;
    use crate::registry::Registry;

    fn shared_state() -> SharedState {
        let (registry, _task) = Registry::spawn(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        SharedState {
            registry,
            config: Arc::new(AppConfig::default()),
            shutdown_tx,
        }
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let err = bind(&taken).await.unwrap_err();
        assert!(matches!(err, ParleyError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_accepts_and_relays() {
        let state = shared_state();
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown_tx = state.shutdown_tx.clone();
        let registry = state.registry.clone();

        let handle = tokio::spawn(run_tcp_accept_loop(listener, state));

        let a = TcpStream::connect(addr).await.unwrap();
        let (a_read, mut a_write) = a.into_split();
        let mut a_lines = BufReader::new(a_read).lines();
        let welcome = a_lines.next_line().await.unwrap().unwrap();
        assert!(welcome.starts_with("Welcome "));
        while registry.session_count().await.unwrap() < 1 {
            tokio::task::yield_now().await;
        }

        let b = TcpStream::connect(addr).await.unwrap();
        let (b_read, mut b_write) = b.into_split();
        let mut b_lines = BufReader::new(b_read).lines();
        let b_welcome = b_lines.next_line().await.unwrap().unwrap();
        assert!(b_welcome.starts_with("Welcome "));

        let entered = a_lines.next_line().await.unwrap().unwrap();
        assert!(entered.ends_with(" has entered the chat room!"));

        b_write.write_all(b"over tcp\r\n").await.unwrap();
        let relayed = a_lines.next_line().await.unwrap().unwrap();
        assert!(relayed.ends_with(": over tcp"));

        let _ = shutdown_tx.send(());
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "TCP accept loop did not shut down");

        // Open sessions outlive the accept loop
        a_write.write_all(b"still here\n").await.unwrap();
        let relayed = b_lines.next_line().await.unwrap().unwrap();
        assert!(relayed.ends_with(": still here"));
    }
}
