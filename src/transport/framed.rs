//! Point-to-point transporter over a byte stream.
//!
//! Wraps one bidirectional connection to a single peer (a Unix socket, a TCP
//! stream, an in-memory duplex pipe) in [`FrameCodec`] framing. Each frame
//! carries the destination channel, so both ends can multiplex several
//! subscriptions over the one connection.
//!
//! When the connection reaches EOF or fails to decode, every subscriber gets
//! [`TransportEvent::NodeDisconnected`] for the peer and later sends fail with
//! `NodeUnreachable`.

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, trace, warn};

#[cfg(unix)]
use std::path::Path;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::core::frame::{Frame, FrameCodec};
use crate::core::ids::NodeId;
use crate::error::{BridgeError, Result};
use crate::transport::{TransportEvent, Transporter};

type Subscribers = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<TransportEvent>>>>;
type BoxedWriter = FramedWrite<WriteHalf<Box<dyn Io>>, FrameCodec>;

/// Object-safe alias for a bidirectional byte stream.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub struct FramedTransporter {
    peer: NodeId,
    writer: tokio::sync::Mutex<BoxedWriter>,
    subscribers: Subscribers,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl FramedTransporter {
    /// Take over `io`, a connection to `peer`. Must be called inside a runtime.
    pub fn new<T: Io>(io: T, peer: NodeId) -> Self {
        let boxed: Box<dyn Io> = Box::new(io);
        let (read_half, write_half) = tokio::io::split(boxed);

        let subscribers: Subscribers = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            FramedRead::new(read_half, FrameCodec),
            peer.clone(),
            subscribers.clone(),
            closed.clone(),
        ));

        Self {
            peer,
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, FrameCodec)),
            subscribers,
            closed,
            reader,
        }
    }

    /// Connect to a peer listening on a Unix domain socket.
    #[cfg(unix)]
    #[instrument(skip(path), fields(socket_path = %path.as_ref().display()))]
    pub async fn connect_unix<P: AsRef<Path>>(path: P, peer: NodeId) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        info!(peer = %peer, "Connected over unix socket");
        Ok(Self::new(stream, peer))
    }

    /// Bind a Unix domain socket, replacing a stale socket file.
    #[cfg(unix)]
    pub async fn bind_unix<P: AsRef<Path>>(path: P) -> Result<UnixListener> {
        if path.as_ref().exists() {
            tokio::fs::remove_file(&path).await.ok();
        }
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.as_ref().display(), "Listening on unix socket");
        Ok(listener)
    }

    /// Accept one connection from `peer` on `listener`.
    #[cfg(unix)]
    pub async fn accept_unix(listener: &UnixListener, peer: NodeId) -> Result<Self> {
        let (stream, _) = listener.accept().await?;
        info!(peer = %peer, "Accepted unix socket connection");
        Ok(Self::new(stream, peer))
    }

    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn write_frame(&self, target: &NodeId, channel: &str, payload: Bytes) -> Result<()> {
        if target != &self.peer || self.is_closed() {
            return Err(BridgeError::NodeUnreachable(target.to_string()));
        }
        let mut writer = self.writer.lock().await;
        writer
            .send(Frame::new(channel, payload))
            .await
            .map_err(|e| match e {
                BridgeError::Io(_) => BridgeError::NodeUnreachable(target.to_string()),
                other => other,
            })
    }
}

impl Drop for FramedTransporter {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Transporter for FramedTransporter {
    fn send<'a>(&'a self, target: &'a NodeId, channel: &'a str, payload: Bytes) -> BoxFuture<'a, Result<()>> {
        self.write_frame(target, channel, payload).boxed()
    }

    fn subscribe<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<mpsc::UnboundedReceiver<TransportEvent>>> {
        async move {
            let (tx, rx) = mpsc::unbounded_channel();
            if self.is_closed() {
                let _ = tx.send(TransportEvent::NodeDisconnected(self.peer.clone()));
            }
            self.subscribers
                .lock()
                .map_err(|_| BridgeError::LockPoisoned)?
                .insert(channel.to_string(), tx);
            debug!(channel = channel, peer = %self.peer, "Subscribed to framed channel");
            Ok(rx)
        }
        .boxed()
    }

    fn unsubscribe<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.subscribers
                .lock()
                .map_err(|_| BridgeError::LockPoisoned)?
                .remove(channel);
            Ok(())
        }
        .boxed()
    }
}

async fn read_loop(
    mut frames: FramedRead<tokio::io::ReadHalf<Box<dyn Io>>, FrameCodec>,
    peer: NodeId,
    subscribers: Subscribers,
    closed: Arc<AtomicBool>,
) {
    while let Some(result) = frames.next().await {
        match result {
            Ok(frame) => {
                let Ok(subs) = subscribers.lock() else { break };
                match subs.get(&frame.channel) {
                    Some(tx) => {
                        let _ = tx.send(TransportEvent::Message(frame.payload));
                    }
                    None => trace!(channel = %frame.channel, "Frame for unsubscribed channel dropped"),
                }
            }
            Err(e) => {
                warn!(error = %e, peer = %peer, "Framed connection failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    info!(peer = %peer, "Framed connection closed");
    if let Ok(subs) = subscribers.lock() {
        for tx in subs.values() {
            let _ = tx.send(TransportEvent::NodeDisconnected(peer.clone()));
        }
    }
}
