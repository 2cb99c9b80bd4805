use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`TlsContext`](crate::TlsContext).
///
/// Certificate paths are required; everything else has a default. Use the
/// builder pattern:
///
/// ```rust
/// use vigil_transport::TransportConfig;
///
/// let config = TransportConfig::new("node.crt", "node.key", "ca.crt")
///     .max_frame_size(4 * 1024 * 1024)
///     .send_buffer(512);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// PEM certificate chain presented to peers.
    pub(crate) cert_path: PathBuf,
    /// PEM private key matching `cert_path`.
    pub(crate) key_path: PathBuf,
    /// PEM CA bundle used to verify peers in both directions.
    pub(crate) ca_path: PathBuf,
    /// Maximum incoming frame size in bytes.
    pub(crate) max_frame_size: usize,
    /// Channel buffer size for outgoing frames per link.
    pub(crate) send_buffer: usize,
    /// Channel buffer size for incoming frames per link.
    pub(crate) recv_buffer: usize,
    /// Upper bound for TCP connect plus TLS handshake on outbound sessions.
    pub(crate) connect_timeout: Duration,
}

impl TransportConfig {
    /// Create a config with default limits for the given TLS material.
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: ca_path.into(),
            max_frame_size: crate::frame::DEFAULT_MAX_FRAME_SIZE,
            send_buffer: 1024,
            recv_buffer: 256,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set maximum incoming frame size (default: 16 MiB).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Set the outgoing frame buffer per link (default: 1024).
    pub fn send_buffer(mut self, capacity: usize) -> Self {
        self.send_buffer = capacity;
        self
    }

    /// Set the incoming frame buffer per link (default: 256).
    pub fn recv_buffer(mut self, capacity: usize) -> Self {
        self.recv_buffer = capacity;
        self
    }

    /// Set the outbound connect timeout (default: 10 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn cert_path(&self) -> &std::path::Path {
        &self.cert_path
    }
}
