use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{ControlMessage, MessageKind, MAX_FRAME_SIZE};

/// Size of every [`RawCodec`] frame.
pub const RAW_BUFFER_SIZE: usize = 1024;

/// Strategy for putting one [`ControlMessage`] on the wire and taking one off.
///
/// `decode` must consume exactly one frame and nothing more: whatever the
/// remote wrote after the frame belongs to the raw stream that follows it.
/// `encode` and `decode` of the same codec must agree, since both ends of a
/// connection are configured with the same strategy.
#[async_trait]
pub trait Codec: Send + Sync {
    fn encode(&self, msg: &ControlMessage) -> ProtocolResult<Vec<u8>>;

    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ControlMessage>;

    fn name(&self) -> &'static str;
}

/// Length-prefixed frames: `[4 bytes BE len][1 byte kind tag][payload]`.
///
/// `len` counts the tag byte plus the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct FramedCodec;

impl FramedCodec {
    fn check_len(len: usize) -> ProtocolResult<()> {
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len - 1,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Codec for FramedCodec {
    fn encode(&self, msg: &ControlMessage) -> ProtocolResult<Vec<u8>> {
        if msg.payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: msg.payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let len = (msg.payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + msg.payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.kind.type_tag());
        buf.extend_from_slice(&msg.payload);
        Ok(buf)
    }

    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ControlMessage> {
        let mut header = [0u8; 5];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        Self::check_len(len)?;
        let kind = MessageKind::from_tag(header[4])?;

        let mut payload = vec![0u8; len - 1];
        reader.read_exact(&mut payload).await?;
        Ok(ControlMessage::new(kind, payload))
    }

    fn name(&self) -> &'static str {
        "framed"
    }
}

/// Fixed-size frames: every frame is exactly [`RAW_BUFFER_SIZE`] bytes, the
/// announcement payload followed by zero padding.
///
/// The frame carries no length, so the payload decoder has to tolerate the
/// padding. Bincode-encoded announcements do.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

#[async_trait]
impl Codec for RawCodec {
    fn encode(&self, msg: &ControlMessage) -> ProtocolResult<Vec<u8>> {
        if msg.payload.len() > RAW_BUFFER_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: msg.payload.len(),
                max: RAW_BUFFER_SIZE,
            });
        }
        let mut frame = msg.payload.clone();
        frame.resize(RAW_BUFFER_SIZE, 0);
        Ok(frame)
    }

    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ControlMessage> {
        let mut frame = vec![0u8; RAW_BUFFER_SIZE];
        match reader.read_exact(&mut frame).await {
            Ok(_) => Ok(ControlMessage::new(MessageKind::StoreAnnouncement, frame)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ProtocolError::ConnectionClosed),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "raw"
    }
}

/// Configuration-level selector for the built-in codecs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Framed,
    Raw,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            Self::Framed => Arc::new(FramedCodec),
            Self::Raw => Arc::new(RawCodec),
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "framed" => Ok(Self::Framed),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown codec: {other}")),
        }
    }
}
