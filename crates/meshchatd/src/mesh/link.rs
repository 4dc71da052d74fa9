//! Per-link reader and writer tasks.
//!
//! The writer drains the link's frame queue onto the socket. The reader
//! splits the byte stream on `\n` and hands each line to the node. A single
//! malformed line is dropped; EOF, a socket error, an oversized frame, a
//! missed hello deadline or shutdown ends the link and removes its entry.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use meshchat_core::{FrameBuffer, ProtocolError};
use meshchat_services::{FrameEffect, LinkHandle, PeerNode};

#[derive(Debug, thiserror::Error)]
pub enum LinkClosed {
    #[error("remote closed the connection")]
    Eof,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Protocol(ProtocolError),
    #[error("no hello before deadline")]
    HelloTimeout,
    #[error("shutdown")]
    Shutdown,
}

pub struct LinkTask {
    pub node: Arc<PeerNode>,
    pub stream: TcpStream,
    pub handle: LinkHandle,
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
    /// Set for accepted links until the remote identifies itself.
    pub hello_deadline: Option<Instant>,
    pub shutdown: broadcast::Receiver<()>,
}

impl LinkTask {
    pub async fn run(self) {
        let LinkTask {
            node,
            stream,
            handle,
            mut outbound,
            hello_deadline,
            mut shutdown,
        } = self;

        let (mut reader, mut writer) = stream.into_split();
        let link_id = handle.id;

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!(link = link_id, error = %e, "link write failed");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let reason = read_frames(&node, &handle, &mut reader, hello_deadline, &mut shutdown).await;
        writer_task.abort();

        match node.links().remove_link(link_id) {
            Some(peer) => tracing::info!(
                peer = %peer,
                addr = %handle.remote_addr,
                reason = %reason,
                "link closed"
            ),
            None => tracing::debug!(
                addr = %handle.remote_addr,
                reason = %reason,
                "anonymous link closed"
            ),
        }
    }
}

async fn read_frames(
    node: &PeerNode,
    handle: &LinkHandle,
    reader: &mut OwnedReadHalf,
    hello_deadline: Option<Instant>,
    shutdown: &mut broadcast::Receiver<()>,
) -> LinkClosed {
    let mut frames = FrameBuffer::new();
    let mut identified = hello_deadline.is_none();

    'read: loop {
        let deadline = if identified { None } else { hello_deadline };

        let result = tokio::select! {
            _ = shutdown.recv() => break 'read LinkClosed::Shutdown,
            _ = sleep_until(deadline) => break 'read LinkClosed::HelloTimeout,
            r = reader.read_buf(frames.buffer_mut()) => r,
        };

        match result {
            Ok(0) => break 'read LinkClosed::Eof,
            Ok(_) => {}
            Err(e) => break 'read LinkClosed::Io(e),
        }

        loop {
            let line = match frames.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) if e.is_fatal() => break 'read LinkClosed::Protocol(e),
                Err(e) => {
                    tracing::debug!(link = handle.id, error = %e, "frame dropped");
                    continue;
                }
            };
            match node.on_line(&line, handle) {
                Ok(FrameEffect::Identified(_)) => identified = true,
                Ok(FrameEffect::Mirrored { channel, seq }) => {
                    tracing::debug!(link = handle.id, channel = %channel, seq, "message mirrored");
                }
                Ok(FrameEffect::Ignored) => {}
                Err(e) => {
                    tracing::debug!(link = handle.id, error = %e, "malformed frame dropped");
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
