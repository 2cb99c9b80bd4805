use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::TransportError;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Sending half of a session.
///
/// Cheap to clone. Frames pushed here are written by the session's writer
/// task in order. Closing a link cancels both the reader and the writer.
#[derive(Clone)]
pub struct Link {
    id: u64,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Link {
    pub(crate) fn new(tx: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            cancel,
        }
    }

    /// A detached link whose frames land in the returned receiver.
    ///
    /// Used by session writers internally and by tests that want to observe
    /// outgoing traffic without a socket.
    pub fn pair(capacity: usize) -> (Link, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Link::new(tx, CancellationToken::new()), rx)
    }

    /// Process-unique link id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue one frame for writing.
    pub async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Close the link. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the link has been closed from either side.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Link {}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_in_order() {
        let (link, mut rx) = Link::pair(4);
        link.send("a".into()).await.unwrap();
        link.send("b".into()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (link, _rx) = Link::pair(4);
        link.close();
        assert!(link.is_closed());
        assert!(matches!(
            link.send("x".into()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropped_receiver_closes_link() {
        let (link, rx) = Link::pair(4);
        drop(rx);
        assert!(link.is_closed());
        assert!(link.send("x".into()).await.is_err());
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ra) = Link::pair(1);
        let (b, _rb) = Link::pair(1);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
