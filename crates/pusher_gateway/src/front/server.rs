//! The accept loop.

use crate::error::GatewayError;
use crate::front::handler::handle_connection;
use crate::multiplexer::SessionMultiplexer;
use futures::stream::{FuturesUnordered, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The client-facing WebSocket server.
pub struct FrontServer {
    mux: Arc<SessionMultiplexer>,
    shutdown: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
}

impl FrontServer {
    pub fn new(mux: Arc<SessionMultiplexer>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            mux,
            shutdown,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// With `use_reuse_port` enabled, one accept loop per CPU core shares
    /// the port so the kernel load-balances incoming handshakes.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let config = self.mux.config().clone();
        info!("🚀 Front server starting on {}", config.bind_address);

        let num_acceptors = if config.use_reuse_port {
            num_cpus::get()
        } else {
            1
        };

        let mut listeners = Vec::with_capacity(num_acceptors);
        for i in 0..num_acceptors {
            let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
                .map_err(|e| GatewayError::Network(format!("socket creation failed: {e}")))?;
            socket.set_reuse_address(true).ok();
            #[cfg(unix)]
            if config.use_reuse_port {
                if let Err(e) = socket.set_reuse_port(true) {
                    warn!("SO_REUSEPORT not available: {}", e);
                }
            }
            socket
                .bind(&config.bind_address.into())
                .map_err(|e| GatewayError::Network(format!("bind failed: {e}")))?;
            socket
                .listen(1024)
                .map_err(|e| GatewayError::Network(format!("listen failed: {e}")))?;

            let std_listener: StdTcpListener = socket.into();
            std_listener.set_nonblocking(true).ok();
            let listener = TcpListener::from_std(std_listener)
                .map_err(|e| GatewayError::Network(format!("listener registration failed: {e}")))?;
            listeners.push(listener);
            info!("✅ Listener {} bound on {}", i, config.bind_address);
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let max_connections = config.max_connections;

        let mut accept_loops = listeners
            .into_iter()
            .map(|listener| {
                let mux = self.mux.clone();
                let active = self.active_connections.clone();
                async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, addr)) => {
                                if active.load(Ordering::SeqCst) >= max_connections {
                                    warn!("Connection limit reached; refusing {}", addr);
                                    drop(stream);
                                    continue;
                                }
                                active.fetch_add(1, Ordering::SeqCst);
                                let mux = mux.clone();
                                let active = active.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, addr, mux).await {
                                        error!("Connection error from {}: {}", addr, e);
                                    }
                                    active.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                error!("Accept failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        tokio::select! {
            _ = accept_loops.next() => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
            }
        }

        info!("Front server stopped");
        Ok(())
    }

    /// Signals the accept loops to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Currently open client sockets.
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}
