//! TCP listener for the chat service.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::connection::serve_connection;
use crate::config::ServerConfig;
use crate::service::ChatService;
use crate::{LoungeError, Result};

/// Notice sent to every chatter when the server stops.
pub const SHUTDOWN_NOTICE: &str = "@@ Chat service is shutting down.";

/// Chat server that accepts TCP connections.
pub struct ChatServer {
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ChatServer {
    /// Create a new ChatServer bound to the configured address.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Chat service listening on {}", local_addr);

        Ok(Self {
            listener,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get the maximum number of connections allowed.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the number of active connections.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Accept a new connection.
    ///
    /// Waits for a free connection slot before accepting.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LoungeError::Io(std::io::Error::other("semaphore closed")))?;

        let (stream, addr) = self.listener.accept().await?;
        debug!("Accepted connection from {}", addr);

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Run the server, serving every accepted connection on its own task.
    pub async fn run(self, service: Arc<ChatService>) -> Result<()> {
        self.run_until(service, std::future::pending()).await
    }

    /// Run the server until `shutdown` completes.
    ///
    /// On shutdown every connected chatter gets a notice and the listener
    /// stops accepting. Sessions already running are left to their tasks.
    pub async fn run_until<F>(self, service: Arc<ChatService>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.accept() => match accepted {
                    Ok((stream, addr, permit)) => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, service).await {
                                warn!("Session for {} ended with error: {}", addr, e);
                            }
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        let notified = service.registry.announce(SHUTDOWN_NOTICE).await;
        info!(
            "Stopped accepting; {} connection(s) active, {} notified",
            self.active_connections(),
            notified
        );
        Ok(())
    }
}

/// A permit that represents an active connection slot.
///
/// When this permit is dropped, the connection slot is released.
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
