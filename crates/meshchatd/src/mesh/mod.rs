//! Peer mesh connection manager.
//!
//! Owns the TCP side of a peer: the accept loop, outbound dials, and one
//! reader plus one writer task per link. Link identity and routing live in
//! the node's `ConnectionTable`; this module only moves bytes.

pub mod link;
pub mod listener;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use meshchat_core::ProtocolError;
use meshchat_services::{Direction, LinkHandle, PeerNode};

use link::LinkTask;
use listener::MeshListener;

const LISTEN_BACKLOG: i32 = 128;

#[derive(Debug, Clone, Copy)]
pub struct MeshSettings {
    /// Bound on the TCP connect of an outbound dial.
    pub connect_timeout: Duration,
    /// How long an accepted link may stay anonymous before it is closed.
    pub hello_timeout: Duration,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            hello_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect to {addr} timed out")]
    Timeout { addr: String },
    #[error("connect failed: {0}")]
    Io(#[from] io::Error),
    #[error("hello encode failed: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    Linked,
    AlreadyLinked,
}

#[derive(Clone)]
pub struct ConnectionManager {
    node: Arc<PeerNode>,
    settings: MeshSettings,
    shutdown: broadcast::Sender<()>,
}

impl ConnectionManager {
    pub fn new(node: Arc<PeerNode>, settings: MeshSettings, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            node,
            settings,
            shutdown,
        }
    }

    pub fn node(&self) -> &Arc<PeerNode> {
        &self.node
    }

    /// Bind the mesh port and spawn the accept loop. Returns the bound
    /// address, which differs from the request when `port` is 0.
    pub fn listen(&self, ip: &str, port: u16) -> io::Result<SocketAddr> {
        let listener = bind_listener(ip, port)?;
        let addr = listener.local_addr()?;
        tracing::info!(peer = %self.node.peer_id(), %addr, "mesh listening");

        let task = MeshListener::new(listener, self.clone(), self.shutdown.subscribe());
        tokio::spawn(task.run());
        Ok(addr)
    }

    /// Open a link to `peer_id`. The link is keyed by that id at once and
    /// its first frame is our hello. Any failure leaves no table entry.
    pub async fn dial(&self, peer_id: &str, ip: &str, port: u16) -> Result<DialOutcome, DialError> {
        if self.node.links().contains(peer_id) {
            return Ok(DialOutcome::AlreadyLinked);
        }

        let stream = match tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect((ip, port)),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(DialError::Timeout {
                    addr: format!("{ip}:{port}"),
                })
            }
        };
        set_keepalive(&stream);
        let remote_addr = stream.peer_addr()?;
        let hello = self.node.hello_frame().encode()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LinkHandle::new(
            self.node.links().next_link_id(),
            remote_addr,
            Direction::Outbound,
            tx,
        );
        handle.send(hello);
        self.node.links().bind(peer_id, handle.clone());
        tracing::info!(peer = peer_id, addr = %remote_addr, "connected");

        self.spawn_link(stream, handle, rx, None);
        Ok(DialOutcome::Linked)
    }

    /// Adopt an accepted socket as an anonymous link awaiting hello.
    pub(crate) fn accept(&self, stream: TcpStream, remote_addr: SocketAddr) {
        set_keepalive(&stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LinkHandle::new(
            self.node.links().next_link_id(),
            remote_addr,
            Direction::Inbound,
            tx,
        );
        self.node.links().add_pending(&handle);
        tracing::debug!(addr = %remote_addr, link = handle.id, "inbound link pending hello");

        let deadline = Instant::now() + self.settings.hello_timeout;
        self.spawn_link(stream, handle, rx, Some(deadline));
    }

    fn spawn_link(
        &self,
        stream: TcpStream,
        handle: LinkHandle,
        outbound: mpsc::UnboundedReceiver<bytes::Bytes>,
        hello_deadline: Option<Instant>,
    ) {
        let task = LinkTask {
            node: self.node.clone(),
            stream,
            handle,
            outbound,
            hello_deadline,
            shutdown: self.shutdown.subscribe(),
        };
        tokio::spawn(task.run());
    }
}

fn bind_listener(ip: &str, port: u16) -> io::Result<TcpListener> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let addr = SocketAddr::new(ip, port);

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

fn set_keepalive(stream: &TcpStream) {
    if let Err(e) = SockRef::from(stream).set_keepalive(true) {
        tracing::debug!(error = %e, "failed to set SO_KEEPALIVE");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(peer_id: &str) -> ConnectionManager {
        let node = Arc::new(PeerNode::new(peer_id, "room"));
        let (shutdown, _) = broadcast::channel(1);
        let settings = MeshSettings {
            connect_timeout: Duration::from_millis(500),
            hello_timeout: Duration::from_secs(1),
        };
        ConnectionManager::new(node, settings, shutdown)
    }

    #[tokio::test]
    async fn failed_dial_leaves_no_link() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let mgr = manager("a");
        let err = mgr.dial("b", "127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, DialError::Io(_) | DialError::Timeout { .. }));
        assert!(!mgr.node().links().contains("b"));
        assert!(mgr.node().links().is_empty());
        assert_eq!(mgr.node().links().pending_count(), 0);
    }
}
