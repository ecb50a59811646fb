//! Wire protocol for DFS peer connections.
//!
//! After the handshake, a connection carries a repeating sequence of
//! `[control frame][exactly N raw bytes]`, where N is the size declared by the
//! [`StoreAnnouncement`] inside the frame. How a frame is delimited is up to
//! the configured [`Codec`].

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{Codec, CodecKind, FramedCodec, RawCodec, RAW_BUFFER_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    ControlMessage, MessageKind, StoreAnnouncement, HELLO_MAGIC, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
