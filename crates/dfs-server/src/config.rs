use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dfs_p2p::{HandshakeKind, TransportConfig, DEFAULT_DIAL_BACKOFF, DEFAULT_INTAKE_CAPACITY};
use dfs_protocol::CodecKind;
use dfs_store::TransformKind;

use crate::error::{ServerError, ServerResult};

/// Suffix appended to the listen address to derive a default storage root.
pub const STORAGE_ROOT_SUFFIX: &str = "_network";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Peers dialed on start.
    pub bootstrap: Vec<String>,
    /// Store root. Derived from `listen_addr` when unset.
    pub storage_root: Option<PathBuf>,
    pub path_transform: TransformKind,
    pub codec: CodecKind,
    pub handshake: HandshakeKind,
    pub dial_backoff_ms: u64,
    pub intake_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".into(),
            bootstrap: Vec::new(),
            storage_root: None,
            path_transform: TransformKind::default(),
            codec: CodecKind::default(),
            handshake: HandshakeKind::default(),
            dial_backoff_ms: DEFAULT_DIAL_BACKOFF.as_millis() as u64,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_bootstrap<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    /// Effective store root.
    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(|| default_storage_root(&self.listen_addr))
    }

    pub fn dial_backoff(&self) -> Duration {
        Duration::from_millis(self.dial_backoff_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            listen_addr: self.listen_addr.clone(),
            dial_backoff: self.dial_backoff(),
            intake_capacity: self.intake_capacity,
        }
    }

    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.listen_addr.is_empty() {
            return Err(ServerError::Config("listen_addr must not be empty".into()));
        }
        if self.intake_capacity == 0 {
            return Err(ServerError::Config("intake_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// `<listen_addr>_network`, with characters that are awkward in paths replaced.
pub fn default_storage_root(listen_addr: &str) -> PathBuf {
    let name: String = listen_addr
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '[' | ']' => '_',
            other => other,
        })
        .collect();
    PathBuf::from(format!("{name}{STORAGE_ROOT_SUFFIX}"))
}
