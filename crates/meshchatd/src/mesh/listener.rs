//! Mesh accept loop.
//!
//! Every inbound connection is accepted regardless of id ordering; it stays
//! anonymous until its hello arrives.

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::ConnectionManager;

pub struct MeshListener {
    listener: TcpListener,
    manager: ConnectionManager,
    shutdown: broadcast::Receiver<()>,
}

impl MeshListener {
    pub fn new(
        listener: TcpListener,
        manager: ConnectionManager,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            manager,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("mesh listener shutting down");
                    return;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.manager.accept(stream, addr),
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}
