use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use dfs_protocol::{Codec, FramedCodec, ProtocolError};

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::handshake::{Handshake, NopHandshake};
use crate::peer::Peer;
use crate::transport::{Delivery, PeerHandler, Transport};

/// Strategies and callbacks injected into a [`TcpTransport`].
pub struct TcpTransportOpts {
    pub config: TransportConfig,
    pub handshake: Arc<dyn Handshake>,
    pub codec: Arc<dyn Codec>,
    pub handler: Arc<dyn PeerHandler>,
}

impl TcpTransportOpts {
    /// Framed codec and no-op handshake.
    pub fn new(config: TransportConfig, handler: Arc<dyn PeerHandler>) -> Self {
        Self {
            config,
            handshake: Arc::new(NopHandshake),
            codec: Arc::new(FramedCodec),
            handler,
        }
    }
}

/// TCP implementation of [`Transport`].
///
/// Every connection, accepted or dialed, gets its own task that performs the
/// handshake, reports the peer, and then runs the decode loop. Decoded
/// messages go onto one bounded intake queue shared by all connections.
pub struct TcpTransport {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransportConfig,
    handshake: Arc<dyn Handshake>,
    codec: Arc<dyn Codec>,
    handler: Arc<dyn PeerHandler>,
    intake_tx: mpsc::Sender<Delivery>,
    intake_rx: Mutex<Option<mpsc::Receiver<Delivery>>>,
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    pub fn new(opts: TcpTransportOpts) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(opts.config.intake_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config: opts.config,
                handshake: opts.handshake,
                codec: opts.codec,
                handler: opts.handler,
                intake_tx,
                intake_rx: Mutex::new(Some(intake_rx)),
                shutdown,
                local_addr: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Address actually bound by [`listen`](Transport::listen), if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn listen_addr(&self) -> &str {
        &self.shared.config.listen_addr
    }

    async fn listen(&self) -> TransportResult<SocketAddr> {
        let addr = &self.shared.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Listen {
                addr: addr.clone(),
                source,
            })?;
        let bound = listener.local_addr()?;
        *self.shared.local_addr.lock().expect("lock poisoned") = Some(bound);

        info!(addr = %bound, codec = self.shared.codec.name(), handshake = self.shared.handshake.name(), "listening");

        let shutdown = self.shared.shutdown.subscribe();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.accept_loop(listener, shutdown).await });
        Ok(bound)
    }

    async fn dial(&self, addr: &str) -> TransportResult<()> {
        let backoff = self.shared.config.dial_backoff;
        let mut attempt: u64 = 0;
        let stream = loop {
            attempt += 1;
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!(addr, attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "dial failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        };
        info!(addr, attempt, "dialed peer");
        self.shared.spawn_connection(stream, true);
        Ok(())
    }

    fn consume(&self) -> TransportResult<mpsc::Receiver<Delivery>> {
        self.shared
            .intake_rx
            .lock()
            .expect("lock poisoned")
            .take()
            .ok_or(TransportError::IntakeTaken)
    }

    async fn close(&self) -> TransportResult<()> {
        if self.local_addr().is_none() {
            return Err(TransportError::NotListening);
        }
        self.shared.shutdown.send_replace(true);
        info!(addr = %self.shared.config.listen_addr, "closing listener");
        Ok(())
    }
}

impl Shared {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("accept loop stopped");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(remote = %remote, "connection accepted");
                        self.spawn_connection(stream, false);
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                }
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, outbound: bool) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let peer = match Peer::from_tcp(stream, outbound, Arc::clone(&shared.codec)) {
                Ok(peer) => Arc::new(peer),
                Err(e) => {
                    warn!(error = %e, "failed to set up connection");
                    return;
                }
            };
            let addr = peer.addr().to_string();
            if let Err(err) = shared.handle_conn(peer).await {
                warn!(peer = %addr, error = %err, "connection closed with error");
            }
        });
    }

    async fn handle_conn(&self, peer: Arc<Peer>) -> TransportResult<()> {
        self.handshake.handshake(&peer).await?;
        self.handler.on_peer_connected(Arc::clone(&peer)).await?;
        debug!(peer = %peer.addr(), outbound = peer.is_outbound(), "peer registered");

        let result = self.read_loop(&peer).await;
        self.handler.on_peer_disconnected(&peer).await;
        result
    }

    /// Decode frames until the connection ends. After each frame the loop
    /// parks until the consumer has drained the announced stream.
    async fn read_loop(&self, peer: &Arc<Peer>) -> TransportResult<()> {
        loop {
            let message = match peer.decode_next().await {
                Ok(message) => message.with_origin(peer.addr()),
                Err(ProtocolError::ConnectionClosed) => {
                    debug!(peer = %peer.addr(), "connection closed by remote");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            debug!(peer = %peer.addr(), kind = %message.kind, len = message.payload.len(), "control message received");

            let (release, drained) = peer.open_gate();
            if self.intake_tx.send(Delivery { message, release }).await.is_err() {
                debug!(peer = %peer.addr(), "intake queue closed");
                return Ok(());
            }
            if !drained.wait().await {
                return Err(TransportError::StreamAbandoned(peer.addr().to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use dfs_protocol::{ControlMessage, StoreAnnouncement};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::handshake::VersionHandshake;

    /// Handler that forwards lifecycle events to the test.
    struct Recorder {
        connected: mpsc::UnboundedSender<Arc<Peer>>,
        disconnected: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl PeerHandler for Recorder {
        async fn on_peer_connected(&self, peer: Arc<Peer>) -> TransportResult<()> {
            let _ = self.connected.send(peer);
            Ok(())
        }

        async fn on_peer_disconnected(&self, peer: &Arc<Peer>) {
            let _ = self.disconnected.send(peer.addr().to_string());
        }
    }

    struct Harness {
        transport: TcpTransport,
        connected: mpsc::UnboundedReceiver<Arc<Peer>>,
        disconnected: mpsc::UnboundedReceiver<String>,
    }

    fn harness(handshake: Arc<dyn Handshake>) -> Harness {
        let (ctx, crx) = mpsc::unbounded_channel();
        let (dtx, drx) = mpsc::unbounded_channel();
        let handler = Arc::new(Recorder {
            connected: ctx,
            disconnected: dtx,
        });
        let mut config = TransportConfig::new("127.0.0.1:0");
        config.dial_backoff = Duration::from_millis(50);
        let mut opts = TcpTransportOpts::new(config, handler);
        opts.handshake = handshake;
        Harness {
            transport: TcpTransport::new(opts),
            connected: crx,
            disconnected: drx,
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn frame(key: &str, size: i64) -> Vec<u8> {
        let msg = ControlMessage::announce(&StoreAnnouncement::new(key, size)).unwrap();
        FramedCodec.encode(&msg).unwrap()
    }

    #[tokio::test]
    async fn listen_reports_bound_address() {
        let h = harness(Arc::new(NopHandshake));
        let addr = h.transport.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(h.transport.local_addr(), Some(addr));
        assert_eq!(h.transport.listen_addr(), "127.0.0.1:0");
    }

    #[tokio::test]
    async fn listen_on_taken_address_fails() {
        let first = harness(Arc::new(NopHandshake));
        let addr = first.transport.listen().await.unwrap();

        let (handler_tx, _) = mpsc::unbounded_channel();
        let (dtx, _) = mpsc::unbounded_channel();
        let second = TcpTransport::new(TcpTransportOpts::new(
            TransportConfig::new(addr.to_string()),
            Arc::new(Recorder {
                connected: handler_tx,
                disconnected: dtx,
            }),
        ));
        let err = second.listen().await.unwrap_err();
        assert!(matches!(err, TransportError::Listen { .. }));
    }

    #[tokio::test]
    async fn intake_can_only_be_taken_once() {
        let h = harness(Arc::new(NopHandshake));
        assert!(h.transport.consume().is_ok());
        assert!(matches!(h.transport.consume(), Err(TransportError::IntakeTaken)));
    }

    #[tokio::test]
    async fn decode_loop_waits_for_drain() {
        let mut h = harness(Arc::new(NopHandshake));
        let addr = h.transport.listen().await.unwrap();
        let mut intake = h.transport.consume().unwrap();

        // Two announcements with their streams, written back to back.
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut wire = frame("first", 5);
        wire.extend_from_slice(b"AAAAA");
        wire.extend(frame("second", 3));
        wire.extend_from_slice(b"BBB");
        client.write_all(&wire).await.unwrap();

        let peer = tokio::time::timeout(WAIT, h.connected.recv()).await.unwrap().unwrap();
        let first = tokio::time::timeout(WAIT, intake.recv()).await.unwrap().unwrap();
        assert_eq!(first.message.origin, peer.addr());
        assert_eq!(first.message.announcement().unwrap().key, "first");
        assert!(peer.is_draining());

        // Nothing else may be decoded while "first" is undrained.
        let early = tokio::time::timeout(Duration::from_millis(200), intake.recv()).await;
        assert!(early.is_err(), "second frame decoded before drain");

        let mut body = Vec::new();
        peer.stream(5).await.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"AAAAA");
        first.release.release();

        let second = tokio::time::timeout(WAIT, intake.recv()).await.unwrap().unwrap();
        assert_eq!(second.message.announcement().unwrap().key, "second");
        let mut body = Vec::new();
        peer.stream(3).await.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"BBB");
        second.release.release();
    }

    #[tokio::test]
    async fn abandoned_stream_closes_connection() {
        let mut h = harness(Arc::new(NopHandshake));
        let addr = h.transport.listen().await.unwrap();
        let mut intake = h.transport.consume().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame("k", 4)).await.unwrap();

        let peer = tokio::time::timeout(WAIT, h.connected.recv()).await.unwrap().unwrap();
        let delivery = tokio::time::timeout(WAIT, intake.recv()).await.unwrap().unwrap();
        drop(delivery);

        let gone = tokio::time::timeout(WAIT, h.disconnected.recv()).await.unwrap().unwrap();
        assert_eq!(gone, peer.addr());
    }

    #[tokio::test]
    async fn decode_error_ends_connection_only() {
        let mut h = harness(Arc::new(NopHandshake));
        let addr = h.transport.listen().await.unwrap();

        let mut bad = TcpStream::connect(addr).await.unwrap();
        let bad_peer = tokio::time::timeout(WAIT, h.connected.recv()).await.unwrap().unwrap();
        let good = TcpStream::connect(addr).await.unwrap();
        let good_peer = tokio::time::timeout(WAIT, h.connected.recv()).await.unwrap().unwrap();

        // Unknown kind tag.
        bad.write_all(&[0, 0, 0, 1, 42]).await.unwrap();
        let gone = tokio::time::timeout(WAIT, h.disconnected.recv()).await.unwrap().unwrap();
        assert_eq!(gone, bad_peer.addr());

        // The healthy connection is untouched.
        let quiet = tokio::time::timeout(Duration::from_millis(100), h.disconnected.recv()).await;
        assert!(quiet.is_err());
        assert_ne!(good_peer.addr(), bad_peer.addr());
        drop(good);
    }

    #[tokio::test]
    async fn remote_close_reports_disconnect() {
        let mut h = harness(Arc::new(NopHandshake));
        let addr = h.transport.listen().await.unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let peer = tokio::time::timeout(WAIT, h.connected.recv()).await.unwrap().unwrap();
        assert!(!peer.is_outbound());
        drop(client);

        let gone = tokio::time::timeout(WAIT, h.disconnected.recv()).await.unwrap().unwrap();
        assert_eq!(gone, peer.addr());
    }

    #[tokio::test]
    async fn failed_handshake_never_registers() {
        let mut h = harness(Arc::new(VersionHandshake::new()));
        let addr = h.transport.listen().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut hello = [0u8; 8];
        client.read_exact(&mut hello).await.unwrap();
        client.write_all(b"garbage!").await.unwrap();

        // The transport hangs up without reporting the peer.
        let mut rest = Vec::new();
        tokio::time::timeout(WAIT, client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(h.connected.try_recv().is_err());
    }

    #[tokio::test]
    async fn dial_retries_until_listener_appears() {
        // Reserve a port, then free it so the first attempts are refused.
        let vacant = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = vacant.local_addr().unwrap();
        drop(vacant);

        let mut dialer = harness(Arc::new(NopHandshake));
        let dial = tokio::spawn(async move {
            dialer.transport.dial(&target.to_string()).await.unwrap();
            let peer = tokio::time::timeout(WAIT, dialer.connected.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(peer.is_outbound());
            peer.addr().to_string()
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!dial.is_finished(), "dial gave up instead of retrying");

        let listener = TcpListener::bind(target).await.unwrap();
        let (_conn, _) = listener.accept().await.unwrap();
        let dialed = tokio::time::timeout(WAIT, dial).await.unwrap().unwrap();
        assert_eq!(dialed, target.to_string());
    }

    #[tokio::test]
    async fn close_stops_accepting() {
        let h = harness(Arc::new(NopHandshake));
        let addr = h.transport.listen().await.unwrap();
        h.transport.close().await.unwrap();

        let mut refused = false;
        for _ in 0..50 {
            if TcpStream::connect(addr).await.is_err() {
                refused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(refused, "listener still accepting after close");
    }

    #[tokio::test]
    async fn close_before_listen_is_an_error() {
        let h = harness(Arc::new(NopHandshake));
        assert!(matches!(h.transport.close().await, Err(TransportError::NotListening)));
    }
}
