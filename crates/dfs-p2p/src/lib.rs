//! Peer connections and transport for DFS nodes.
//!
//! A [`Transport`] listens, dials, and runs one task per connection. Each
//! task performs the configured [`Handshake`], reports the [`Peer`] through a
//! [`PeerHandler`], and then decodes control messages onto a shared intake
//! queue. After publishing a message the task parks on a drain gate until the
//! consumer has read the announced raw stream from the same peer, so a frame
//! and its stream are never confused on the wire.

pub mod config;
pub mod error;
pub mod gate;
pub mod handshake;
pub mod peer;
pub mod tcp;
pub mod transport;

pub use config::{TransportConfig, DEFAULT_DIAL_BACKOFF, DEFAULT_INTAKE_CAPACITY};
pub use error::{TransportError, TransportResult};
pub use gate::{Drained, StreamRelease};
pub use handshake::{Handshake, HandshakeKind, NopHandshake, VersionHandshake};
pub use peer::{BoxedReader, BoxedWriter, Peer, PeerReader};
pub use tcp::{TcpTransport, TcpTransportOpts};
pub use transport::{Delivery, NoopPeerHandler, PeerHandler, Transport};
