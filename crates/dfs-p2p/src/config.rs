use std::time::Duration;

/// Delay between failed dial attempts.
pub const DEFAULT_DIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Bound of the intake queue shared by all connections of one transport.
///
/// Large enough that ordinary traffic never blocks a decode loop on the
/// queue itself: each connection has at most one undrained message in
/// flight, so the queue only fills with more than this many live peers.
pub const DEFAULT_INTAKE_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Address to bind, e.g. `127.0.0.1:3000`. Port 0 picks a free port.
    pub listen_addr: String,
    pub dial_backoff: Duration,
    pub intake_capacity: usize,
}

impl TransportConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".into(),
            dial_backoff: DEFAULT_DIAL_BACKOFF,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}
