//! TCP listener and accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use switchboard_core::EventFeed;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::registry::UserRegistry;
use crate::session::SessionHandler;
use crate::status::spawn_status_reporter;

/// Chat broker bound to a TCP address.
pub struct ChatServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<UserRegistry>,
    feed: EventFeed,
    connection_semaphore: Arc<Semaphore>,
}

impl ChatServer {
    /// Validates `config` and binds the listener.
    ///
    /// Binding to port 0 picks an ephemeral port, see [`ChatServer::local_addr`].
    pub async fn bind(config: ServerConfig, feed: EventFeed) -> ServerResult<Self> {
        config.validate()?;

        let listener = match TcpListener::bind(config.bind_address).await {
            Ok(listener) => listener,
            Err(e) => {
                feed.error(format!("Error starting server: {e}"));
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Chat server listening");

        Ok(Self {
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            registry: Arc::new(UserRegistry::new(feed.clone())),
            config,
            listener,
            local_addr,
            feed,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<UserRegistry> {
        self.registry.clone()
    }

    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// On return every connection task has been stopped, the status report
    /// is cancelled and every delivery routine has been told to exit.
    pub async fn run_until_shutdown<S>(self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        let handler = SessionHandler::new(self.registry.clone(), self.feed.clone())
            .with_require_login(self.config.require_login);

        self.feed.notice(format!("Server started at {}", self.local_addr));
        let status_task = self
            .config
            .user_status_interval
            .map(|period| spawn_status_reporter(self.registry.clone(), self.feed.clone(), period));

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        warn!(error = %e, "Connection task panicked");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let Ok(permit) = self.connection_semaphore.clone().try_acquire_owned() else {
                            self.feed.warning(format!("Connection limit reached, rejecting {peer}"));
                            continue;
                        };
                        debug!(%peer, "Accepted connection");
                        let handler = handler.clone();
                        connections.spawn(async move {
                            handler.serve(stream, peer).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        self.feed.error(format!("Error accepting connection: {e}"));
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        connections.shutdown().await;
        if let Some(task) = status_task {
            task.abort();
        }
        self.registry.shutdown().await;
        self.feed.notice("Server stopped");
        Ok(())
    }
}
