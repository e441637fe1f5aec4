//! Change-event stream transports
//!
//! Wire framing: a 4-byte little-endian payload length, then a JSON body.
//! The first frame the client writes is the `SubscribeRequest`; every
//! frame read afterwards is an `EventFrame`.
//!
//! `EventSource` creates subscriptions; the reconciler reconnects through
//! it after a stream break, so the transport itself never retries.

use std::sync::Arc;

use async_trait::async_trait;
use shared::message::{EventFrame, SubscribeRequest};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, broadcast};

/// Upper bound for a single frame; anything larger is a corrupt stream
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(u32),

    /// The subscription fell behind and events were dropped; the stream
    /// itself is still alive
    #[error("Stream lagged, {0} events missed")]
    Lagged(u64),

    #[error("Connection closed")]
    Closed,
}

/// One live change-event subscription
#[async_trait]
pub trait EventTransport: Send + Sync + std::fmt::Debug {
    /// Next event frame, waiting as long as it takes
    async fn next_event(&self) -> Result<EventFrame, TransportError>;

    /// Tear the subscription down
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates subscriptions on demand
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventTransport>, TransportError>;
}

// ========== TCP ==========

/// TCP transport carrying length-prefixed JSON frames
#[derive(Debug, Clone)]
pub struct TcpEventTransport {
    reader: Arc<Mutex<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl TcpEventTransport {
    /// Connect and subscribe to a session's event feed
    pub async fn connect(addr: &str, session_id: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let transport = Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        };
        let subscribe = serde_json::to_vec(&SubscribeRequest::new(session_id))?;
        transport.write_frame(&subscribe).await?;
        tracing::debug!(addr, session_id, "Event subscription established");
        Ok(transport)
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_FRAME_LEN as usize {
            return Err(TransportError::FrameTooLarge(payload.len() as u32));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventTransport for TcpEventTransport {
    async fn next_event(&self) -> Result<EventFrame, TransportError> {
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;

        Ok(EventFrame::from_bytes(&payload)?)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

fn eof_as_closed(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(e)
    }
}

/// TCP source bound to a configured address and session
#[derive(Debug, Clone)]
pub struct TcpEventSource {
    addr: String,
    session_id: String,
}

impl TcpEventSource {
    pub fn new(addr: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl EventSource for TcpEventSource {
    async fn connect(&self) -> Result<Box<dyn EventTransport>, TransportError> {
        let transport = TcpEventTransport::connect(&self.addr, &self.session_id).await?;
        Ok(Box::new(transport))
    }
}

// ========== In-Memory ==========

/// In-process transport over a broadcast channel (tests, embedded servers)
///
/// Unlike the TCP transport it can observe `Lagged`: a slow consumer on a
/// bounded channel loses events, which the reconciler must treat as a gap.
#[derive(Debug)]
pub struct MemoryEventTransport {
    rx: Mutex<broadcast::Receiver<EventFrame>>,
}

impl MemoryEventTransport {
    pub fn new(rx: broadcast::Receiver<EventFrame>) -> Self {
        Self { rx: Mutex::new(rx) }
    }
}

#[async_trait]
impl EventTransport for MemoryEventTransport {
    async fn next_event(&self) -> Result<EventFrame, TransportError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Ok(frame) => Ok(frame),
            Err(broadcast::error::RecvError::Closed) => Err(TransportError::Closed),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Err(TransportError::Lagged(missed))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Source half of the in-memory transport; each `connect` opens a fresh
/// subscription on the shared channel
#[derive(Debug, Clone)]
pub struct MemoryEventSource {
    tx: broadcast::Sender<EventFrame>,
}

impl MemoryEventSource {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a frame to every live subscription
    pub fn publish(&self, frame: EventFrame) {
        let _ = self.tx.send(frame);
    }

    pub fn sender(&self) -> broadcast::Sender<EventFrame> {
        self.tx.clone()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn connect(&self) -> Result<Box<dyn EventTransport>, TransportError> {
        Ok(Box::new(MemoryEventTransport::new(self.tx.subscribe())))
    }
}
