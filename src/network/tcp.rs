// TCP Transport
//
// Deployment transport: length-prefixed bincode frames over TCP. One
// request per connection keeps the protocol trivial; every call carries
// its own deadline covering connect, write, and the reply read. Handler
// failures are shipped back as an Error frame so both transports surface
// identical error values.

use super::message::{self, ClusterMessage, Envelope, RemoteError};
use super::transport::{MessageHandler, Transport};
use crate::error::{Result, SearchError};
use crate::types::NodeId;
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Upper bound on a single frame; a document write dominates frame size.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

pub struct TcpTransport {
    node: NodeId,

    /// node id -> host:port
    addresses: HashMap<NodeId, String>,
}

impl TcpTransport {
    pub fn new(node: NodeId, addresses: HashMap<NodeId, String>) -> Self {
        Self { node, addresses }
    }

    /// Bind the listen address and serve inbound frames with `handler`
    /// until the process exits.
    pub async fn serve(
        listen_addr: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let listener = TcpListener::bind(listen_addr).await?;
        Ok(Self::serve_listener(listener, handler))
    }

    /// Serve inbound frames on an already-bound listener.
    pub fn serve_listener(
        listener: TcpListener,
        handler: Arc<dyn MessageHandler>,
    ) -> tokio::task::JoinHandle<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "transport listening");
        }

        tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = Self::serve_connection(stream, handler).await {
                        tracing::debug!(peer = %peer_addr, error = %e, "connection closed");
                    }
                });
            }
        })
    }

    async fn serve_connection(
        mut stream: TcpStream,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let envelope: Envelope = read_frame(&mut stream).await?;
        let from = envelope.from;
        let reply = match handler.handle(from, envelope.message).await {
            Ok(reply) => reply,
            Err(e) => ClusterMessage::Error(RemoteError::from(&e)),
        };
        write_frame(&mut stream, &reply).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn call(&self, addr: &str, message: ClusterMessage) -> Result<ClusterMessage> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SearchError::Transport(format!("connect {addr}: {e}")))?;
        let envelope = Envelope {
            from: self.node,
            message,
        };
        write_frame(&mut stream, &envelope).await?;
        let reply: ClusterMessage = read_frame(&mut stream).await?;
        match reply {
            ClusterMessage::Error(remote) => Err(remote.into()),
            reply => Ok(reply),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_node(&self) -> NodeId {
        self.node
    }

    async fn send(
        &self,
        target: NodeId,
        message: ClusterMessage,
        deadline: Duration,
    ) -> Result<ClusterMessage> {
        let addr = self
            .addresses
            .get(&target)
            .ok_or_else(|| SearchError::Transport(format!("unknown node {target}")))?
            .clone();
        match tokio::time::timeout(deadline, self.call(&addr, message)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout(format!(
                "node {target} did not reply within {deadline:?}"
            ))),
        }
    }
}

async fn write_frame<T: serde::Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let payload = message::encode(value)?;
    if payload.len() as u64 > MAX_FRAME_BYTES as u64 {
        return Err(SearchError::InvalidInput(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<T: for<'de> serde::Deserialize<'de>>(stream: &mut TcpStream) -> Result<T> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = (&header[..]).get_u32();
    if len > MAX_FRAME_BYTES {
        return Err(SearchError::InvalidInput(format!(
            "frame of {len} bytes exceeds limit"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    message::decode(&payload)
}
