use std::fmt;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::frame::NetstringCodec;
use crate::{Link, TransportConfig};

/// Which side of the TLS handshake we were on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We accepted the connection.
    Server,
    /// We initiated the connection.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// An authenticated, framed connection to one peer.
///
/// Owns a reader task (frames → `inbound`) and a writer task
/// (`link` → socket). Either task ending closes the link.
pub struct Session {
    identity: String,
    peer: String,
    role: Role,
    link: Link,
    inbound: mpsc::Receiver<String>,
}

impl Session {
    /// Wrap an already-authenticated byte stream.
    ///
    /// `identity` is the peer's verified endpoint name; `peer` is only used
    /// for logging. Must be called inside a tokio runtime.
    pub fn from_stream<S>(
        stream: S,
        identity: impl Into<String>,
        peer: impl Into<String>,
        role: Role,
        config: &TransportConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let identity = identity.into();
        let peer = peer.into();
        let (read_half, write_half) = tokio::io::split(stream);

        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(config.send_buffer);
        let (in_tx, in_rx) = mpsc::channel(config.recv_buffer);
        let link = Link::new(out_tx, cancel.clone());

        let reader = FramedRead::new(read_half, NetstringCodec::new(config.max_frame_size));
        tokio::spawn(read_loop(reader, in_tx, cancel.clone(), identity.clone()));

        let writer = FramedWrite::new(write_half, NetstringCodec::new(config.max_frame_size));
        tokio::spawn(write_loop(writer, out_rx, cancel, identity.clone()));

        tracing::debug!(identity = %identity, peer = %peer, %role, link = link.id(), "session started");

        Self {
            identity,
            peer,
            role,
            link,
            inbound: in_rx,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Receive the next inbound frame. `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Split into the sending link and the inbound frame stream.
    pub fn into_parts(self) -> (Link, mpsc::Receiver<String>) {
        (self.link, self.inbound)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("link", &self.link)
            .finish()
    }
}

async fn read_loop<R>(
    mut reader: FramedRead<R, NetstringCodec>,
    inbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    identity: String,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(frame)) => {
                    if inbound.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(identity = %identity, error = %e, "read failed, closing session");
                    break;
                }
                None => {
                    tracing::debug!(identity = %identity, "peer closed connection");
                    break;
                }
            }
        }
    }
    cancel.cancel();
}

async fn write_loop<W>(
    mut writer: FramedWrite<W, NetstringCodec>,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
    identity: String,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = writer.send(frame).await {
                        tracing::warn!(identity = %identity, error = %e, "write failed, closing session");
                        break;
                    }
                }
                None => break,
            }
        }
    }
    cancel.cancel();
    let _ = writer.get_mut().shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> TransportConfig {
        TransportConfig::new("unused.crt", "unused.key", "unused-ca.crt")
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let left = Session::from_stream(a, "node-b", "pipe", Role::Client, &config());
        let mut right = Session::from_stream(b, "node-a", "pipe", Role::Server, &config());

        left.link().send("{\"method\":\"x\"}".into()).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), right.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("{\"method\":\"x\"}"));
        assert_eq!(right.identity(), "node-a");
        assert_eq!(left.role(), Role::Client);
    }

    #[tokio::test]
    async fn closing_one_side_ends_the_other() {
        let (a, b) = tokio::io::duplex(1024);
        let left = Session::from_stream(a, "node-b", "pipe", Role::Client, &config());
        let mut right = Session::from_stream(b, "node-a", "pipe", Role::Server, &config());

        left.link().close();
        let end = tokio::time::timeout(Duration::from_secs(5), right.recv())
            .await
            .unwrap();
        assert!(end.is_none());
        assert!(right.link().is_closed());
    }

    #[tokio::test]
    async fn oversized_frame_closes_session() {
        let (a, b) = tokio::io::duplex(1024);
        let left = Session::from_stream(a, "node-b", "pipe", Role::Client, &config());
        let small = config().max_frame_size(4);
        let mut right = Session::from_stream(b, "node-a", "pipe", Role::Server, &small);

        left.link().send("too long for the limit".into()).await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(5), right.recv())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
