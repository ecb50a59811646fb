use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use dfs_protocol::ControlMessage;

use crate::error::TransportResult;
use crate::gate::StreamRelease;
use crate::peer::Peer;

/// A decoded control message waiting on the intake queue.
///
/// The consumer must read the announced stream from the originating peer and
/// then fire `release`; until then that peer's decode loop stays parked.
#[derive(Debug)]
pub struct Delivery {
    pub message: ControlMessage,
    pub release: StreamRelease,
}

/// Callbacks through which a transport reports connection lifecycle.
#[async_trait]
pub trait PeerHandler: Send + Sync {
    /// Called after a successful handshake. An error drops the connection.
    async fn on_peer_connected(&self, peer: Arc<Peer>) -> TransportResult<()>;

    /// Called once the connection's decode loop has ended, whatever the cause.
    async fn on_peer_disconnected(&self, peer: &Arc<Peer>);
}

/// Accepts every peer and keeps no record of it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPeerHandler;

#[async_trait]
impl PeerHandler for NoopPeerHandler {
    async fn on_peer_connected(&self, _peer: Arc<Peer>) -> TransportResult<()> {
        Ok(())
    }

    async fn on_peer_disconnected(&self, _peer: &Arc<Peer>) {}
}

/// Connection management for a node.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Configured listen address.
    fn listen_addr(&self) -> &str;

    /// Bind and start accepting in the background. Returns the bound address.
    async fn listen(&self) -> TransportResult<SocketAddr>;

    /// Connect to `addr`, retrying after the configured backoff until it
    /// succeeds. The connection is then handled in the background.
    async fn dial(&self, addr: &str) -> TransportResult<()>;

    /// Take the receiving end of the intake queue. Only one consumer exists.
    fn consume(&self) -> TransportResult<mpsc::Receiver<Delivery>>;

    /// Stop accepting new connections. Established connections keep running.
    async fn close(&self) -> TransportResult<()>;
}
