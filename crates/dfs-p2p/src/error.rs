use std::io;

use thiserror::Error;

use dfs_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake with {peer} failed: {reason}")]
    Handshake { peer: String, reason: String },

    #[error("stream from {0} was abandoned before it was drained")]
    StreamAbandoned(String),

    #[error("intake queue already taken")]
    IntakeTaken,

    #[error("transport is not listening")]
    NotListening,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
