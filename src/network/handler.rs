//! Main network handler

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::proxy::HttpProxy;
use crate::{PollyError, Result};

use super::SHUTDOWN_TIMEOUT_MS;

/// Accepts connections and hands every request to the proxy
pub struct NetworkHandler {
    proxy: Arc<HttpProxy>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NetworkHandler {
    /// Create a new network handler
    #[must_use]
    pub fn new(proxy: Arc<HttpProxy>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { proxy, shutdown_tx }
    }

    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| PollyError::Other(format!("Failed to bind {addr}: {e}")))
    }

    /// Sender that stops [`serve`](Self::serve) when signalled
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve until Ctrl-C or the shutdown handle fires
    ///
    /// In-flight connections get [`SHUTDOWN_TIMEOUT_MS`] to finish.
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Listening on {}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("Accepted connection from {}", peer_addr);
                            let proxy = Arc::clone(&self.proxy);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            connections.spawn(serve_connection(stream, proxy, shutdown_rx));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        drop(listener);
        self.shutdown_tx.send(()).ok();

        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Connection cleanup error: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connections still open after {}ms, aborting",
                connections.len(),
                SHUTDOWN_TIMEOUT_MS
            );
            connections.shutdown().await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    proxy: Arc<HttpProxy>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let max_headers = proxy.limits().max_headers;
    let service = service_fn(move |request: Request<Incoming>| {
        let proxy = Arc::clone(&proxy);
        async move { Ok::<_, Infallible>(proxy.handle(request).await) }
    });

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .max_headers(max_headers)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut shutting_down = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("Connection closed with error: {}", e);
                }
                break;
            }
            _ = shutdown_rx.recv(), if !shutting_down => {
                conn.as_mut().graceful_shutdown();
                shutting_down = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Mode};
    use crate::storage::SessionStore;
    use tempfile::TempDir;

    fn replay_proxy(temp_dir: &TempDir) -> Arc<HttpProxy> {
        proxy_with(temp_dir, Config::default())
    }

    fn proxy_with(temp_dir: &TempDir, config: Config) -> Arc<HttpProxy> {
        let config = Config {
            mode: Mode::Replay,
            session: "handler".to_string(),
            ..config
        };
        let store = Arc::new(SessionStore::create_empty(temp_dir.path(), "handler"));
        Arc::new(HttpProxy::new(&config, store).unwrap())
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = NetworkHandler::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_in_use_fails() {
        let first = NetworkHandler::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();

        assert!(NetworkHandler::bind(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let temp_dir = TempDir::new().unwrap();
        let handler = NetworkHandler::new(replay_proxy(&temp_dir));
        let shutdown = handler.shutdown_handle();

        let listener = NetworkHandler::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let handle = tokio::spawn(async move { handler.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.send(()).ok();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_header_limit_enforced_on_connection() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.limits.max_headers = 8;
        let handler = NetworkHandler::new(proxy_with(&temp_dir, config));
        let shutdown = handler.shutdown_handle();

        let listener = NetworkHandler::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { handler.serve(listener).await });

        let client = reqwest::Client::new();

        // Within the limit: reaches the proxy, which has nothing to replay
        let response = client
            .get(format!("http://{addr}/users"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let mut request = client.get(format!("http://{addr}/users"));
        for i in 0..16 {
            request = request.header(format!("x-extra-{i}"), "1");
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), 431);

        shutdown.send(()).ok();
        let result = tokio::time::timeout(Duration::from_secs(10), server).await;
        assert!(result.is_ok());
    }
}
