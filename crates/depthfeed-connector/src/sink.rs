/*
[INPUT]:  Encoded event frames from the forwarder
[OUTPUT]: Length-prefixed frames on a local transport (Unix socket or in-process channel)
[POS]:    Delivery layer - downstream transport behind the EventSink seam
[UPDATE]: When adding transports or changing frame layout
*/

use std::fmt::Debug;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
#[cfg(unix)]
use futures_util::SinkExt;
#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
#[cfg(unix)]
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SinkWriteError {
    #[error("sink connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink write timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink closed")]
    Closed,

    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<SinkWriteError>,
    },
}

/// Downstream transport. One call delivers one whole frame.
#[async_trait]
pub trait EventSink: Send + Debug {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), SinkWriteError>;

    /// Drop any live connection so the next send starts clean.
    async fn reset(&mut self) {}
}

/// Unix domain socket sink with a 4-byte big-endian length prefix per frame.
///
/// Connects lazily and reconnects on the next send after any failure.
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixSocketSink {
    path: PathBuf,
    framed: Option<FramedWrite<UnixStream, LengthDelimitedCodec>>,
}

#[cfg(unix)]
impl UnixSocketSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            framed: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    async fn connection(&mut self) -> Result<&mut FramedWrite<UnixStream, LengthDelimitedCodec>, SinkWriteError> {
        if self.framed.is_none() {
            let stream = UnixStream::connect(&self.path)
                .await
                .map_err(SinkWriteError::Connect)?;
            info!(path = %self.path.display(), "sink connected");
            self.framed = Some(FramedWrite::new(stream, frame_codec()));
        }
        self.framed.as_mut().ok_or(SinkWriteError::Closed)
    }
}

#[cfg(unix)]
#[async_trait]
impl EventSink for UnixSocketSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), SinkWriteError> {
        let result = self.connection().await?.send(frame).await;
        if let Err(err) = result {
            self.framed = None;
            return Err(err.into());
        }
        Ok(())
    }

    async fn reset(&mut self) {
        // a half-written frame must not be followed by more bytes on the same stream
        if self.framed.take().is_some() {
            debug!(path = %self.path.display(), "sink connection dropped");
        }
    }
}

/// Codec shared by the socket sink and its readers.
#[cfg(unix)]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(64 * 1024 * 1024)
        .new_codec()
}

/// In-process sink delivering frames to a channel receiver.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), SinkWriteError> {
        self.tx.send(frame).map_err(|_| SinkWriteError::Closed)
    }
}
