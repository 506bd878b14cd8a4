//! Accept loop and top-level server configuration.
//!
//! Mirrors the original `Server::run()`: bind, then loop accepting
//! connections, rejecting new ones outright once `max_clients` is
//! reached (spec §4.2). Each accepted connection gets its own task
//! wrapping a [`Session`] and sharing one [`Registry`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use c4_registry::Registry;
use c4_transport::{TcpConnection, TcpTransport, Transport};

use crate::handler;
use crate::ServerError;

/// Defaults mirror the original `InputShell` (`PORT_DEFAULT`,
/// `MAX_CLIENTS_DEFAULT`); `c4-cli` only overrides them when the
/// operator passes `-p`/`-c`.
pub const DEFAULT_PORT: u16 = 53333;
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// Server startup configuration, produced by `c4-cli`'s argument parser.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub port: u16,
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT, max_clients: DEFAULT_MAX_CLIENTS }
    }
}

/// A bound, not-yet-running Connect Four lobby server.
pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Binds the listening socket and runs the accept loop until the
    /// process is terminated.
    ///
    /// A connection accepted while the server is already at
    /// `max_clients` is closed immediately with no message, matching
    /// `Server::run`'s `numberOfClients == maxClients` check.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let mut transport = TcpTransport::bind(&addr).await?;
        tracing::info!(%addr, max_clients = self.config.max_clients, "server listening");

        let registry: Arc<Registry<TcpConnection>> = Arc::new(Registry::new());
        let active = Arc::new(AtomicUsize::new(0));

        loop {
            match transport.accept().await {
                Ok(conn) => {
                    if active.load(Ordering::Acquire) >= self.config.max_clients {
                        tracing::warn!(
                            addr = %conn.remote_addr(),
                            "max clients reached, rejecting connection"
                        );
                        let _ = conn.close().await;
                        continue;
                    }
                    active.fetch_add(1, Ordering::AcqRel);
                    let registry = Arc::clone(&registry);
                    let active = Arc::clone(&active);
                    tokio::spawn(async move {
                        handler::handle_connection(conn, registry).await;
                        active.fetch_sub(1, Ordering::AcqRel);
                    });
                }
                Err(err) => {
                    tracing::error!(error = %err, "accept failed, continuing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_original_input_shell_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 53333);
        assert_eq!(config.max_clients, 10);
    }
}
