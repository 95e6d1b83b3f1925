//! Connection server.
//!
//! One accept loop hands each connection to a fixed-size `WorkerPool`.
//! A connection is served line by line: every request line gets exactly one
//! terminated response frame. Closing the connection ends only that session.

use crate::backend::StoryBackend;
use crate::dispatcher::Dispatcher;
use crate::pool::WorkerPool;
use crate::protocol::{FrameReader, FrameWriter, Reply};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Errors from starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Backend authentication failed: {0}")]
    Authentication(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where to listen and how many connections to serve at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// `host:port`, as passed to bind and connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Cloneable trigger for stopping a running server.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Calling it again is a no-op.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("shutdown requested");
            self.token.cancel();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

/// A bound, authenticated server ready to `run`.
pub struct StoryServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    pool: WorkerPool,
    shutdown: ShutdownHandle,
}

impl StoryServer {
    /// Authenticate with the backend, then bind the listening socket.
    ///
    /// Nothing is bound if authentication fails.
    pub async fn start(
        config: &ServerConfig,
        backend: Arc<dyn StoryBackend>,
    ) -> Result<Self, ServerError> {
        match backend.authenticate().await {
            Ok(true) => tracing::info!(backend = backend.name(), "backend authenticated"),
            Ok(false) => {
                return Err(ServerError::Authentication(
                    "backend rejected the probe request".to_string(),
                ))
            }
            Err(e) => return Err(ServerError::Authentication(e.to_string())),
        }

        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            pool_size = config.pool_size,
            "story server listening"
        );

        Ok(Self {
            listener,
            local_addr,
            dispatcher: Dispatcher::new(backend),
            pool: WorkerPool::new(config.pool_size),
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept and serve connections until shutdown is requested.
    ///
    /// On shutdown the listening socket is released first, then in-flight
    /// connections are drained.
    pub async fn run(self) -> Result<(), ServerError> {
        let StoryServer {
            listener,
            dispatcher,
            pool,
            shutdown,
            ..
        } = self;

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };

            let task = handle_connection(stream, peer, dispatcher.clone(), shutdown.clone());
            let submitted = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                submitted = pool.submit(task) => submitted,
            };
            if submitted.is_err() {
                break;
            }
        }

        drop(listener);
        tracing::info!(active = pool.active(), "draining connections");
        pool.shutdown().await;
        tracing::info!("story server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    shutdown: ShutdownHandle,
) {
    tracing::info!(%peer, "connection accepted");

    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(BufReader::new(read_half));
    let mut writer = FrameWriter::new(write_half);

    loop {
        // Only an idle connection is interrupted by shutdown.
        let line = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            line = reader.read_request() => line,
        };

        let reply = match line {
            Ok(Some(line)) => {
                tracing::debug!(%peer, "request received");
                dispatcher.handle_line(&line).await
            }
            Ok(None) => break,
            Err(e) if e.is_line_error() => {
                tracing::warn!(%peer, error = %e, "rejected request line");
                Reply::error(e)
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "read failed");
                break;
            }
        };

        if let Err(e) = writer.write_reply(&reply).await {
            tracing::warn!(%peer, error = %e, "write failed");
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!(%peer, error = %e, "socket already closed");
    }
    tracing::info!(%peer, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "localhost:8888");
        assert_eq!(config.pool_size, 10);

        let config = ServerConfig::new("127.0.0.1", 0).with_pool_size(3);
        assert_eq!(config.addr(), "127.0.0.1:0");
        assert_eq!(config.pool_size, 3);
    }

    #[test]
    fn test_shutdown_handle_is_idempotent() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_shutdown());

        handle.shutdown();
        handle.shutdown();
        assert!(clone.is_shutdown());
    }
}
