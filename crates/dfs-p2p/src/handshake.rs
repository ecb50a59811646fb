use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dfs_protocol::{ProtocolError, HELLO_MAGIC, PROTOCOL_VERSION};

use crate::error::{TransportError, TransportResult};
use crate::peer::Peer;

/// Runs on every new connection before any frame is decoded.
///
/// A failed handshake drops the connection without registering the peer.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn handshake(&self, peer: &Peer) -> TransportResult<()>;

    fn name(&self) -> &'static str;
}

/// Accepts every connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopHandshake;

#[async_trait]
impl Handshake for NopHandshake {
    async fn handshake(&self, _peer: &Peer) -> TransportResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "nop"
    }
}

/// Symmetric hello: each side writes `HELLO_MAGIC` followed by its protocol
/// version (u32 BE) and requires the same from the remote.
#[derive(Clone, Copy, Debug)]
pub struct VersionHandshake {
    version: u32,
}

impl VersionHandshake {
    pub const fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION,
        }
    }

    pub const fn with_version(version: u32) -> Self {
        Self { version }
    }

    fn hello(&self) -> [u8; 8] {
        let mut hello = [0u8; 8];
        hello[..4].copy_from_slice(&HELLO_MAGIC);
        hello[4..].copy_from_slice(&self.version.to_be_bytes());
        hello
    }
}

impl Default for VersionHandshake {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handshake for VersionHandshake {
    async fn handshake(&self, peer: &Peer) -> TransportResult<()> {
        peer.send(&self.hello()).await?;

        let mut remote = [0u8; 8];
        peer.read_exact(&mut remote)
            .await
            .map_err(|e| TransportError::Handshake {
                peer: peer.addr().to_string(),
                reason: format!("no hello received: {e}"),
            })?;

        if remote[..4] != HELLO_MAGIC {
            return Err(TransportError::Handshake {
                peer: peer.addr().to_string(),
                reason: "bad hello magic".into(),
            });
        }
        let remote_version = u32::from_be_bytes([remote[4], remote[5], remote[6], remote[7]]);
        if remote_version != self.version {
            return Err(TransportError::Handshake {
                peer: peer.addr().to_string(),
                reason: ProtocolError::VersionMismatch {
                    local: self.version,
                    remote: remote_version,
                }
                .to_string(),
            });
        }

        debug!(peer = %peer.addr(), version = remote_version, "handshake complete");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "version"
    }
}

/// Configuration-level selector for the built-in handshakes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeKind {
    #[default]
    Nop,
    Version,
}

impl HandshakeKind {
    pub fn build(self) -> Arc<dyn Handshake> {
        match self {
            Self::Nop => Arc::new(NopHandshake),
            Self::Version => Arc::new(VersionHandshake::new()),
        }
    }
}

impl std::str::FromStr for HandshakeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nop" => Ok(Self::Nop),
            "version" => Ok(Self::Version),
            other => Err(format!("unknown handshake: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_protocol::{Codec, FramedCodec};
    use tokio::io::duplex;

    fn pair() -> (Peer, Peer) {
        let (a, b) = duplex(1024);
        let codec: Arc<dyn Codec> = Arc::new(FramedCodec);
        (
            Peer::from_stream("a", true, a, Arc::clone(&codec)),
            Peer::from_stream("b", false, b, codec),
        )
    }

    #[tokio::test]
    async fn nop_always_succeeds() {
        let (a, _b) = pair();
        NopHandshake.handshake(&a).await.unwrap();
    }

    #[tokio::test]
    async fn matching_versions_agree() {
        let (a, b) = pair();
        let hs = VersionHandshake::new();
        let (ra, rb) = tokio::join!(hs.handshake(&a), hs.handshake(&b));
        ra.unwrap();
        rb.unwrap();
    }

    #[tokio::test]
    async fn version_mismatch_fails_both_sides() {
        let (a, b) = pair();
        let ha = VersionHandshake::with_version(1);
        let hb = VersionHandshake::with_version(2);
        let (ra, rb) = tokio::join!(ha.handshake(&a), hb.handshake(&b));
        assert!(matches!(ra, Err(TransportError::Handshake { .. })));
        assert!(matches!(rb, Err(TransportError::Handshake { .. })));
    }

    #[tokio::test]
    async fn garbage_hello_rejected() {
        let (a, b) = pair();
        b.send(b"NOTAHELLO").await.unwrap();
        let err = VersionHandshake::new().handshake(&a).await.unwrap_err();
        match err {
            TransportError::Handshake { reason, .. } => assert!(reason.contains("magic")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn closed_connection_fails_handshake() {
        let (a, b) = pair();
        b.shutdown().await.unwrap();
        let err = VersionHandshake::new().handshake(&a).await.unwrap_err();
        assert!(matches!(err, TransportError::Handshake { .. }));
    }

    #[test]
    fn kind_selection() {
        assert_eq!("version".parse::<HandshakeKind>().unwrap(), HandshakeKind::Version);
        assert!("tls".parse::<HandshakeKind>().is_err());
        assert_eq!(HandshakeKind::default().build().name(), "nop");
    }
}
