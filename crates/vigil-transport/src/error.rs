/// Errors returned by the Vigil transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to load {what} from {path}: {source}")]
    Material {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no {what} found in {path}")]
    MissingMaterial { what: &'static str, path: String },

    #[error("invalid TLS configuration: {0}")]
    Tls(#[source] rustls::Error),

    #[error("invalid client verifier: {0}")]
    Verifier(String),

    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {peer} presented no certificate")]
    NoPeerCertificate { peer: String },

    #[error("certificate has no usable common name: {0}")]
    InvalidCertificate(String),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("peer identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("invalid server name {0}")]
    InvalidServerName(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_frame_too_large() {
        let err = TransportError::FrameTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "frame too large: 20 bytes (max 10)");
    }

    #[test]
    fn display_no_peer_certificate() {
        let err = TransportError::NoPeerCertificate {
            peer: "10.0.0.1:5665".into(),
        };
        assert_eq!(err.to_string(), "peer 10.0.0.1:5665 presented no certificate");
    }

    #[test]
    fn display_identity_mismatch() {
        let err = TransportError::IdentityMismatch {
            expected: "node-b".into(),
            actual: "node-x".into(),
        };
        assert_eq!(
            err.to_string(),
            "peer identity mismatch: expected node-b, got node-x"
        );
    }

    #[test]
    fn display_closed() {
        assert_eq!(TransportError::Closed.to_string(), "link is closed");
    }
}
