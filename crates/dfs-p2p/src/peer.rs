use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf, Take};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};

use dfs_protocol::{Codec, ControlMessage, ProtocolResult};

use crate::error::TransportResult;
use crate::gate::{self, Drained, StreamRelease};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One established connection to a remote node.
///
/// The read half is shared between the transport's decode loop, which reads
/// control frames, and the consumer that drains the raw stream following each
/// frame. The [drain gate](crate::gate) keeps the two from overlapping. Both
/// sides go through the same buffered reader, so bytes read ahead while
/// decoding a frame are still seen by the consumer.
pub struct Peer {
    addr: String,
    outbound: bool,
    reader: Mutex<BufReader<BoxedReader>>,
    writer: Mutex<BoxedWriter>,
    codec: Arc<dyn Codec>,
    draining: Arc<AtomicBool>,
}

impl Peer {
    pub fn new(
        addr: impl Into<String>,
        outbound: bool,
        reader: BoxedReader,
        writer: BoxedWriter,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            addr: addr.into(),
            outbound,
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            codec,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wrap a TCP connection; the remote socket address is the peer's identity.
    pub fn from_tcp(stream: TcpStream, outbound: bool, codec: Arc<dyn Codec>) -> io::Result<Self> {
        let addr = stream.peer_addr()?.to_string();
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(addr, outbound, Box::new(reader), Box::new(writer), codec))
    }

    /// Wrap any bidirectional byte stream.
    pub fn from_stream<S>(addr: impl Into<String>, outbound: bool, stream: S, codec: Arc<dyn Codec>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(addr, outbound, Box::new(reader), Box::new(writer), codec)
    }

    /// Remote identity, used as the registry key.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// `true` if this node dialed the connection.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// `true` while a decoded message's stream has not been drained yet.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Write raw bytes to the connection.
    pub async fn send(&self, bytes: &[u8]) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Encode a control message with this peer's codec and write it.
    pub async fn send_message(&self, msg: &ControlMessage) -> TransportResult<()> {
        let frame = self.codec.encode(msg)?;
        self.send(&frame).await
    }

    /// Write a control message immediately followed by its raw stream.
    ///
    /// The writer stays locked across both writes, so concurrent senders on
    /// the same connection cannot interleave their frames and streams.
    pub async fn send_object(&self, msg: &ControlMessage, data: &[u8]) -> TransportResult<()> {
        let frame = self.codec.encode(msg)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Decode the next control frame. Used by the transport's decode loop.
    pub async fn decode_next(&self) -> ProtocolResult<ControlMessage> {
        let mut reader = self.reader.lock().await;
        self.codec.decode(&mut *reader).await
    }

    /// Fill `buf` exactly from the connection, bypassing the codec.
    pub async fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut reader = self.reader.lock().await;
        reader.read_exact(buf).await.map(|_| ())
    }

    /// Exclusive reader over the next `size` raw bytes of the connection.
    pub async fn stream(&self, size: u64) -> Take<PeerReader<'_>> {
        PeerReader {
            inner: self.reader.lock().await,
        }
        .take(size)
    }

    /// Open the drain gate for a message that is about to be published.
    pub fn open_gate(&self) -> (StreamRelease, Drained) {
        gate::channel(self.addr.clone(), Arc::clone(&self.draining))
    }

    /// Shut down the write half, signalling EOF to the remote.
    pub async fn shutdown(&self) -> TransportResult<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.addr)
            .field("outbound", &self.outbound)
            .field("codec", &self.codec.name())
            .field("draining", &self.is_draining())
            .finish()
    }
}

/// Locked view of a peer's read half.
pub struct PeerReader<'a> {
    inner: MutexGuard<'a, BufReader<BoxedReader>>,
}

impl AsyncRead for PeerReader<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_protocol::{FramedCodec, StoreAnnouncement};
    use tokio::io::duplex;

    fn pair() -> (Peer, Peer) {
        let (a, b) = duplex(64 * 1024);
        let codec: Arc<dyn Codec> = Arc::new(FramedCodec);
        (
            Peer::from_stream("a", true, a, Arc::clone(&codec)),
            Peer::from_stream("b", false, b, codec),
        )
    }

    #[tokio::test]
    async fn object_arrives_as_frame_then_stream() {
        let (a, b) = pair();
        let msg = ControlMessage::announce(&StoreAnnouncement::new("k", 5)).unwrap();
        a.send_object(&msg, b"hello").await.unwrap();

        let received = b.decode_next().await.unwrap();
        let announcement = received.announcement().unwrap();
        assert_eq!(announcement.key, "k");

        let mut body = Vec::new();
        b.stream(announcement.byte_len())
            .await
            .read_to_end(&mut body)
            .await
            .unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn stream_stops_at_announced_size() {
        let (a, b) = pair();
        a.send(b"abcdefgh").await.unwrap();

        let mut first = Vec::new();
        b.stream(3).await.read_to_end(&mut first).await.unwrap();
        assert_eq!(first, b"abc");

        let mut rest = [0u8; 5];
        b.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"defgh");
    }

    #[tokio::test]
    async fn gate_tracks_draining_state() {
        let (a, _b) = pair();
        assert!(!a.is_draining());
        let (release, drained) = a.open_gate();
        assert!(a.is_draining());
        release.release();
        assert!(drained.wait().await);
        assert!(!a.is_draining());
    }

    #[tokio::test]
    async fn shutdown_signals_eof() {
        let (a, b) = pair();
        a.shutdown().await.unwrap();
        let err = b.decode_next().await.unwrap_err();
        assert!(matches!(err, dfs_protocol::ProtocolError::ConnectionClosed));
    }

    #[test]
    fn identity_and_direction() {
        let (a, b) = pair();
        assert_eq!(a.addr(), "a");
        assert!(a.is_outbound());
        assert!(!b.is_outbound());
        assert_eq!(a.codec().name(), "framed");
    }
}
