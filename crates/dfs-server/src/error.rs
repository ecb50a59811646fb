use thiserror::Error;

use dfs_p2p::TransportError;
use dfs_protocol::ProtocolError;
use dfs_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("message from unknown peer: {0}")]
    UnknownPeer(String),

    #[error("short stream for {key}: expected {expected} bytes, received {received}")]
    ShortStream {
        key: String,
        expected: u64,
        received: u64,
    },

    #[error("object too large to announce: {0} bytes")]
    ObjectTooLarge(u64),

    #[error("server already started")]
    AlreadyStarted,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// `true` for a local miss on [`get`](crate::FileServer::get).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound(_)))
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
