//! Listening side.
//!
//! A [`Host`] accepts connections, negotiates each one on its own task and
//! runs the resulting session with a fresh handler.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{Result, VerseError};
use crate::negotiation::{negotiate_host, AuthMethods, CredentialStore};
use crate::session::SessionHandler;
use crate::transport::StreamConnection;

/// Stops a running [`Host`] and the sessions it spawned.
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl HostHandle {
    /// Stop accepting and ask every live session to terminate.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// TCP listener that turns accepted connections into sessions.
pub struct Host {
    listener: TcpListener,
    methods: AuthMethods,
    store: Arc<dyn CredentialStore>,
    config: Arc<Config>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Host {
    /// Bind `config.host.listen` with the configured methods and users.
    pub async fn bind(config: Config) -> Result<Self> {
        let methods = config.host.auth_methods()?;
        let store: Arc<dyn CredentialStore> = Arc::new(config.host.credential_store());
        let listener = TcpListener::bind(&config.host.listen)
            .await
            .map_err(|e| VerseError::Config(format!("Cannot listen on {}: {e}", config.host.listen)))?;
        let (tx, rx) = watch::channel(false);

        Ok(Self {
            listener,
            methods,
            store,
            config: Arc::new(config),
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        })
    }

    /// Replace the credential store built from config.
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping [`serve`](Self::serve) from elsewhere.
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Accept until shut down. `make_handler` is called once per session.
    pub async fn serve<F, H>(self, make_handler: F) -> Result<()>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: SessionHandler + 'static,
    {
        let make_handler = Arc::new(make_handler);
        let mut shutdown = self.shutdown_rx.clone();

        tracing::info!(
            "Verse host listening on {} (methods: {:?})",
            self.local_addr()?,
            self.methods
        );

        while !*shutdown.borrow() {
            let accepted = tokio::select! {
                accepted = StreamConnection::accept_as_host(&self.listener) => accepted,
                _ = shutdown.changed() => break,
            };

            let conn = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                },
            };

            let methods = self.methods.clone();
            let store = Arc::clone(&self.store);
            let config = Arc::clone(&self.config);
            let make_handler = Arc::clone(&make_handler);
            let mut shutdown = self.shutdown_rx.clone();

            tokio::spawn(async move {
                let peer = conn
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_default();
                let session = match negotiate_host(conn, methods, store, &config).await {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::warn!("Handshake with {} failed: {}", peer, e);
                        return;
                    },
                };

                let handle = session.handle();
                let run = session.run((*make_handler)());
                tokio::pin!(run);
                let exit = tokio::select! {
                    exit = &mut run => exit,
                    _ = shutdown.changed() => {
                        handle.shutdown();
                        run.await
                    },
                };

                match exit {
                    Ok(exit) => tracing::info!("Session with {} ended: {:?}", peer, exit),
                    Err(e) => tracing::error!("Session with {} failed: {}", peer, e),
                }
            });
        }

        tracing::info!("Verse host stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("listener", &self.listener)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}
