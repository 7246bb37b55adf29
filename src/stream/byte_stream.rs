//! Consumable byte streams.
//!
//! A [`ByteStream`] is what local code holds: a call parameter, a call result,
//! or a stream a handler builds from either. It yields chunks in order and
//! terminates exactly once, either cleanly or right after a single error.
//!
//! # Example
//!
//! ```ignore
//! let (writer, stream) = stream_bridge::stream::channel(16);
//! let reply = broker.call("file.save", Param::Streamed(stream), CallOptions::default());
//! writer.write("first chunk").await?;
//! writer.end();
//! ```

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{constants, StreamError};

/// One observation of a stream, in the order listeners see them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Bytes),
    Error(StreamError),
    End,
}

/// Callback interface for consuming a stream without polling it.
///
/// `on_end` is always the last call, also after `on_error`.
pub trait StreamListener: Send + 'static {
    fn on_data(&mut self, chunk: Bytes);

    fn on_error(&mut self, _err: StreamError) {}

    fn on_end(&mut self) {}
}

pub(crate) type ConsumeHook = Arc<dyn Fn() + Send + Sync>;

/// An ordered, single-consumer stream of byte chunks.
///
/// Implements [`Stream`] with `Result<Bytes, StreamError>` items. After an
/// `Err` item the stream is finished, whatever the underlying source does.
pub struct ByteStream {
    inner: BoxStream<'static, Result<Bytes, StreamError>>,
    on_consumed: Option<ConsumeHook>,
    errored: bool,
    finished: bool,
    end_reported: bool,
}

impl ByteStream {
    /// Wrap any stream of chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            on_consumed: None,
            errored: false,
            finished: false,
            end_reported: false,
        }
    }

    /// A finished stream over fixed chunks.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let items: Vec<Result<Bytes, StreamError>> =
            chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::from_stream(futures::stream::iter(items))
    }

    /// Run `hook` every time a chunk is handed to the consumer.
    pub(crate) fn with_consume_hook(mut self, hook: ConsumeHook) -> Self {
        self.on_consumed = Some(hook);
        self
    }

    /// Transform each chunk, keeping chunk boundaries, errors, and completion.
    pub fn map_chunks<F>(self, mut f: F) -> ByteStream
    where
        F: FnMut(Bytes) -> Bytes + Send + 'static,
    {
        ByteStream::from_stream(self.map(move |item| item.map(&mut f)))
    }

    /// Next event, ending with exactly one [`StreamEvent::End`] and then `None`.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.end_reported {
            return None;
        }
        match self.next().await {
            Some(Ok(chunk)) => Some(StreamEvent::Data(chunk)),
            Some(Err(err)) => Some(StreamEvent::Error(err)),
            None => {
                self.end_reported = true;
                Some(StreamEvent::End)
            }
        }
    }

    /// Drain the stream into its event sequence.
    pub async fn collect_events(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Concatenate every chunk, failing on the first error.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Drive the stream on a task, forwarding events to `listener`.
    pub fn listen<L: StreamListener>(mut self, mut listener: L) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = self.next_event().await {
                match event {
                    StreamEvent::Data(chunk) => listener.on_data(chunk),
                    StreamEvent::Error(err) => listener.on_error(err),
                    StreamEvent::End => listener.on_end(),
                }
            }
        })
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.errored || self.finished {
            return Poll::Ready(None);
        }
        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(hook) = &self.on_consumed {
                    hook();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                self.errored = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("errored", &self.errored)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Producer half of a local stream created by [`channel`].
#[derive(Debug)]
pub struct StreamWriter {
    tx: mpsc::Sender<Result<Bytes, StreamError>>,
}

impl StreamWriter {
    /// Push one chunk; waits while the consumer is `capacity` chunks behind.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), StreamError> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| StreamError::new(constants::ERR_STREAM_CLOSED))
    }

    /// Push one chunk without waiting.
    pub fn try_write(&self, chunk: impl Into<Bytes>) -> Result<(), StreamError> {
        self.tx
            .try_send(Ok(chunk.into()))
            .map_err(|_| StreamError::new(constants::ERR_STREAM_CLOSED))
    }

    /// Terminate the stream with an error.
    pub async fn fail(self, err: StreamError) -> Result<(), StreamError> {
        self.tx
            .send(Err(err))
            .await
            .map_err(|_| StreamError::new(constants::ERR_STREAM_CLOSED))
    }

    /// Terminate the stream cleanly.
    pub fn end(self) {}

    /// True once the consumer side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a local stream: a writer and the stream it feeds.
pub fn channel(capacity: usize) -> (StreamWriter, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StreamWriter { tx },
        ByteStream::from_stream(ReceiverStream::new(rx)),
    )
}
