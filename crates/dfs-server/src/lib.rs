//! Replication node for DFS.
//!
//! A [`FileServer`] ties together a content-addressable [`Store`](dfs_store::Store),
//! a [`PeerRegistry`] fed by the transport, and a dispatch loop that ingests
//! objects announced by peers. Writing through
//! [`store_and_replicate`](FileServer::store_and_replicate) persists an object
//! locally and pushes it to every connected peer.

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod tee;

pub use config::{default_storage_root, ServerConfig, STORAGE_ROOT_SUFFIX};
pub use error::{ServerError, ServerResult};
pub use registry::PeerRegistry;
pub use server::{FileServer, Replication, STOP_GRACE};
pub use tee::TeeReader;
