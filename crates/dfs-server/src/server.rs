use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use dfs_p2p::{Delivery, StreamRelease, TcpTransport, TcpTransportOpts, Transport};
use dfs_protocol::{ControlMessage, MessageKind, StoreAnnouncement};
use dfs_store::{Store, StoreError};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::PeerRegistry;
use crate::tee::TeeReader;

/// How long [`FileServer::stop`] waits for an in-flight ingest to finish.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Outcome of [`FileServer::store_and_replicate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Replication {
    pub key: String,
    pub size: u64,
    /// Peers the object was written to.
    pub delivered: Vec<String>,
    /// Peers whose connection failed during the write.
    pub failed: Vec<String>,
}

/// A replication node: local store, peer registry, and transport.
///
/// Writes are persisted locally and then pushed to every registered peer as
/// an announcement frame followed by the raw bytes. Incoming announcements
/// are handled by a dispatch loop that reads exactly the announced number of
/// bytes from the originating connection into the local store.
pub struct FileServer {
    config: ServerConfig,
    store: Arc<Store>,
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn Transport>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl FileServer {
    /// Build a node over TCP with the strategies selected in `config`.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let registry = Arc::new(PeerRegistry::new());

        let mut opts = TcpTransportOpts::new(config.transport_config(), registry.clone());
        opts.codec = config.codec.build();
        opts.handshake = config.handshake.build();
        let transport = Arc::new(TcpTransport::new(opts));

        let store = Arc::new(Store::new(config.storage_root(), config.path_transform.build()));
        Ok(Self::with_parts(config, store, registry, transport))
    }

    /// Assemble a node from prebuilt parts. `registry` must be the handler
    /// the transport reports peers to.
    pub fn with_parts(
        config: ServerConfig,
        store: Arc<Store>,
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            store,
            registry,
            transport,
            started: AtomicBool::new(false),
            shutdown,
            dispatch: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Sorted identities of connected peers.
    pub fn peers(&self) -> Vec<String> {
        self.registry.addrs()
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Listen, dial every bootstrap peer, then start the dispatch loop.
    ///
    /// Dials retry until they succeed, so this does not return while a
    /// bootstrap peer is unreachable.
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = self.transport.listen().await?;
        let intake = self.transport.consume()?;
        self.bootstrap().await;

        let dispatcher = Dispatcher {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        };
        let handle = tokio::spawn(dispatch_loop(
            dispatcher,
            intake,
            self.shutdown.subscribe(),
            Arc::clone(&self.transport),
        ));
        *self.dispatch.lock().expect("lock poisoned") = Some(handle);

        info!(addr = %addr, root = %self.store.root().display(), peers = self.registry.len(), "file server started");
        Ok(addr)
    }

    async fn bootstrap(&self) {
        let mut dials = JoinSet::new();
        for addr in &self.config.bootstrap {
            let transport = Arc::clone(&self.transport);
            let addr = addr.clone();
            dials.spawn(async move {
                info!(addr = %addr, "dialing bootstrap node");
                let result = transport.dial(&addr).await;
                (addr, result)
            });
        }
        while let Some(joined) = dials.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((addr, Err(err))) => warn!(addr = %addr, error = %err, "bootstrap dial failed"),
                Err(err) => warn!(error = %err, "bootstrap dial task failed"),
            }
        }
    }

    /// Persist `reader` under `key` and push it to every registered peer.
    ///
    /// A peer that fails mid-write is reported in [`Replication::failed`]
    /// and does not fail the call; local storage errors do.
    pub async fn store_and_replicate<R>(&self, key: &str, reader: R) -> ServerResult<Replication>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut tee = TeeReader::new(reader);
        let size = self.store.write(key, &mut tee).await?;
        let data = tee.into_copy().freeze();

        let announced = i64::try_from(size).map_err(|_| ServerError::ObjectTooLarge(size))?;
        let message = ControlMessage::announce(&StoreAnnouncement::new(key, announced))?;

        let mut replication = Replication {
            key: key.to_string(),
            size,
            delivered: Vec::new(),
            failed: Vec::new(),
        };
        for peer in self.registry.snapshot() {
            match peer.send_object(&message, &data).await {
                Ok(()) => replication.delivered.push(peer.addr().to_string()),
                Err(err) => {
                    warn!(peer = %peer.addr(), key, error = %err, "replication to peer failed");
                    replication.failed.push(peer.addr().to_string());
                }
            }
        }

        info!(
            key,
            size,
            delivered = replication.delivered.len(),
            failed = replication.failed.len(),
            "object stored and replicated"
        );
        Ok(replication)
    }

    /// Open the locally stored object. Peers are never consulted.
    pub async fn get(&self, key: &str) -> ServerResult<File> {
        Ok(self.store.read(key).await?)
    }

    pub async fn has(&self, key: &str) -> bool {
        self.store.has(key).await
    }

    /// Signal the dispatch loop to exit and wait up to [`STOP_GRACE`] for it.
    /// The loop closes the transport on its way out.
    pub async fn stop(&self) {
        self.stop_within(STOP_GRACE).await
    }

    /// Like [`stop`](Self::stop) with an explicit grace period.
    ///
    /// Shutdown is only observed between messages, so an ingest blocked on a
    /// stalled peer stream holds the loop. Once `grace` runs out the loop is
    /// aborted and the transport is closed here instead. The dropped ingest
    /// commits nothing; its staging file stays behind but is never visible
    /// as an object.
    pub async fn stop_within(&self, grace: Duration) {
        self.shutdown.send_replace(true);
        let handle = self.dispatch.lock().expect("lock poisoned").take();
        let Some(mut handle) = handle else {
            return;
        };
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "dispatch loop ended abnormally"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "dispatch loop still busy; aborting");
                handle.abort();
                if let Err(err) = self.transport.close().await {
                    warn!(error = %err, "failed to close transport");
                }
            }
        }
    }
}

impl std::fmt::Debug for FileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileServer")
            .field("listen_addr", &self.config.listen_addr)
            .field("store", &self.store)
            .field("registry", &self.registry)
            .finish()
    }
}

async fn dispatch_loop(
    dispatcher: Dispatcher,
    mut intake: mpsc::Receiver<Delivery>,
    mut shutdown: watch::Receiver<bool>,
    transport: Arc<dyn Transport>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = intake.recv() => match next {
                Some(delivery) => {
                    if let Err(err) = dispatcher.handle(delivery).await {
                        warn!(error = %err, "failed to handle message");
                    }
                }
                None => {
                    debug!("intake queue closed");
                    break;
                }
            },
        }
    }
    info!(addr = %transport.listen_addr(), "file server stopped");
    if let Err(err) = transport.close().await {
        warn!(error = %err, "failed to close transport");
    }
}

/// Receive side of the protocol.
struct Dispatcher {
    store: Arc<Store>,
    registry: Arc<PeerRegistry>,
}

impl Dispatcher {
    async fn handle(&self, delivery: Delivery) -> ServerResult<()> {
        let Delivery { message, release } = delivery;
        match message.kind {
            MessageKind::StoreAnnouncement => self.ingest(&message, release).await,
        }
    }

    /// Read the announced stream from the originating peer into the store,
    /// then let that peer's decode loop continue.
    ///
    /// If the store rejects the object the stream is still drained so the
    /// connection stays aligned. If the stream ends early nothing is stored,
    /// any previous copy of the key survives, and the gate is left unreleased
    /// so the transport drops the connection.
    async fn ingest(&self, message: &ControlMessage, release: StreamRelease) -> ServerResult<()> {
        let peer = self
            .registry
            .get(&message.origin)
            .ok_or_else(|| ServerError::UnknownPeer(message.origin.clone()))?;
        let announcement = message.announcement()?;
        let expected = announcement.byte_len();
        debug!(peer = %peer.addr(), key = %announcement.key, size = expected, "ingesting stream");

        let mut stream = peer.stream(expected).await;
        let outcome = self
            .store
            .write_exact(&announcement.key, &mut stream, expected)
            .await;
        if outcome.is_err() {
            let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
        }
        let undrained = stream.limit();
        drop(stream);

        match outcome {
            Ok(received) => {
                release.release();
                info!(peer = %peer.addr(), key = %announcement.key, size = received, "stream ingested");
                Ok(())
            }
            Err(StoreError::Truncated { received, .. }) => Err(ServerError::ShortStream {
                key: announcement.key,
                expected,
                received,
            }),
            Err(err) => {
                if undrained == 0 {
                    release.release();
                }
                Err(err.into())
            }
        }
    }
}
