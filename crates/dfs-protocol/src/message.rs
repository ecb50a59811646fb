use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

pub const PROTOCOL_VERSION: u32 = 1;

/// Magic bytes opening the version handshake.
pub const HELLO_MAGIC: [u8; 4] = *b"DFS\x01";

/// Largest control frame accepted by [`FramedCodec`](crate::FramedCodec).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Kinds of control message carried on a peer connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A store announcement: the frame is followed by exactly `size` raw bytes.
    #[default]
    StoreAnnouncement,
}

impl MessageKind {
    pub fn type_tag(self) -> u8 {
        match self {
            Self::StoreAnnouncement => 1,
        }
    }

    pub fn from_tag(tag: u8) -> ProtocolResult<Self> {
        match tag {
            1 => Ok(Self::StoreAnnouncement),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Self::StoreAnnouncement => "StoreAnnouncement",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A framed message exchanged between peers, distinct from the raw stream
/// that follows it.
///
/// `origin` is filled in by the receiving transport with the identity of the
/// connection the frame arrived on; it never goes over the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: MessageKind,
    #[serde(skip)]
    pub origin: String,
    pub payload: Vec<u8>,
}

impl ControlMessage {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            origin: String::new(),
            payload,
        }
    }

    /// Wrap an encoded announcement.
    pub fn announce(announcement: &StoreAnnouncement) -> ProtocolResult<Self> {
        Ok(Self::new(MessageKind::StoreAnnouncement, announcement.encode()?))
    }

    /// Decode the embedded announcement.
    pub fn announcement(&self) -> ProtocolResult<StoreAnnouncement> {
        StoreAnnouncement::decode(&self.payload)
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

/// Declares a key and the exact number of raw bytes that follow the frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAnnouncement {
    pub key: String,
    pub size: i64,
}

impl StoreAnnouncement {
    pub fn new(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode and validate an announcement. Negative sizes are rejected.
    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        let announcement: Self = bincode::deserialize(data)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if announcement.size < 0 {
            return Err(ProtocolError::InvalidAnnouncement(format!(
                "negative size {} for key {:?}",
                announcement.size, announcement.key
            )));
        }
        Ok(announcement)
    }

    /// The announced size as an unsigned byte count.
    pub fn byte_len(&self) -> u64 {
        self.size.max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_roundtrip() {
        let a = StoreAnnouncement::new("photos/cat.png", 4096);
        let decoded = StoreAnnouncement::decode(&a.encode().unwrap()).unwrap();
        assert_eq!(decoded, a);
        assert_eq!(decoded.byte_len(), 4096);
    }

    #[test]
    fn negative_size_rejected() {
        let bytes = StoreAnnouncement::new("k", -1).encode().unwrap();
        let err = StoreAnnouncement::decode(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAnnouncement(_)));
    }

    #[test]
    fn garbage_payload_rejected() {
        let err = StoreAnnouncement::decode(&[0xff]).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn control_message_carries_announcement() {
        let a = StoreAnnouncement::new("key", 12);
        let msg = ControlMessage::announce(&a).unwrap().with_origin("127.0.0.1:4000");
        assert_eq!(msg.kind, MessageKind::StoreAnnouncement);
        assert_eq!(msg.origin, "127.0.0.1:4000");
        assert_eq!(msg.announcement().unwrap(), a);
    }

    #[test]
    fn origin_is_not_serialized() {
        let msg = ControlMessage::new(MessageKind::StoreAnnouncement, vec![1, 2, 3])
            .with_origin("somewhere");
        let bytes = bincode::serialize(&msg).unwrap();
        let back: ControlMessage = bincode::deserialize(&bytes).unwrap();
        assert!(back.origin.is_empty());
        assert_eq!(back.payload, vec![1, 2, 3]);
    }

    #[test]
    fn kind_tags() {
        let kind = MessageKind::StoreAnnouncement;
        assert_eq!(MessageKind::from_tag(kind.type_tag()).unwrap(), kind);
        assert!(matches!(
            MessageKind::from_tag(0),
            Err(ProtocolError::InvalidMessageType(0))
        ));
        assert_eq!(kind.to_string(), "StoreAnnouncement");
    }
}
