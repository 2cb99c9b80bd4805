/// TLS listener and outbound dialing.
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::{lock, ClusterError};

use super::Shared;

/// Back-off after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Accept TCP connections and run each handshake on its own task.
///
/// At most [`super::MAX_CONCURRENT_HANDSHAKES`] handshakes run at once;
/// further connections wait in the kernel backlog.
pub(super) async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let Some(tls) = shared.tls.clone() else {
        return;
    };

    loop {
        let accepted = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY).await;
                continue;
            }
        };

        let permit = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            permit = Arc::clone(&shared.handshakes).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let shared = Arc::clone(&shared);
        let tls = tls.clone();
        tokio::spawn(async move {
            let session = tls.accept(stream).await;
            drop(permit);
            match session {
                Ok(session) => {
                    if let Err(e) = shared.register_session(session).await {
                        tracing::warn!(%addr, error = %e, "inbound session failed");
                    }
                }
                Err(e) => tracing::warn!(%addr, error = %e, "TLS handshake failed"),
            }
        });
    }
    tracing::debug!("listener stopped");
}

impl Shared {
    /// Dial `host:port` expecting `expected` on the other end, then attach
    /// and sync the session.
    pub(super) async fn connect(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        expected: &str,
    ) -> Result<usize, ClusterError> {
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| ClusterError::Config("outbound connections need TLS material".into()))?;

        let session = tls.connect(host, port, expected).await;
        lock(&self.connecting).remove(expected);
        self.register_session(session?).await
    }
}
