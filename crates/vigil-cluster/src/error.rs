/// Cluster-level errors.
///
/// Wraps transport errors and adds the configuration, log and config-sync
/// failures of the replication layer.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("transport error: {0}")]
    Transport(#[from] vigil_transport::TransportError),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] vigil_transport::TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no endpoint configured for local identity '{identity}'")]
    MissingLocalEndpoint { identity: String },

    #[error("no endpoint configured for identity '{identity}'")]
    UnknownPeer { identity: String },

    #[error("cannot resolve security object '{name}' of type '{kind}'")]
    UnresolvedSecurityRef { kind: String, name: String },

    #[error("replay log I/O on {path} failed: {source}")]
    Log {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config sync to {path} failed: {source}")]
    ConfigSync {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cluster is shut down")]
    Shutdown,
}
