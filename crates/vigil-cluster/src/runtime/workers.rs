/// Queue workers.
///
/// Each queue has exactly one consumer, so messages from one source are
/// logged and relayed in the order they were received.
use std::sync::Arc;

use tokio::sync::mpsc;
use vigil_transport::Link;

use crate::events::LocalEvent;
use crate::log::LogEntry;
use crate::relay;
use crate::types::now;
use crate::{lock, ClusterError};

use super::{Fanout, Inbound, LogJob, RelayJob, Shared};

/// Receive the next item, or `None` once the runtime is cancelled.
async fn next<T>(shared: &Shared, rx: &mut mpsc::Receiver<T>) -> Option<T> {
    tokio::select! {
        _ = shared.cancel.cancelled() => None,
        item = rx.recv() => item,
    }
}

pub(super) async fn relay_worker(shared: Arc<Shared>, mut rx: mpsc::Receiver<RelayJob>) {
    while let Some(job) = next(&shared, &mut rx).await {
        if let Err(e) = shared.relay_now(job).await {
            tracing::warn!(error = %e, "relay failed");
        }
    }
    tracing::debug!("relay worker stopped");
}

pub(super) async fn log_worker(shared: Arc<Shared>, mut rx: mpsc::Receiver<LogJob>) {
    while let Some(job) = next(&shared, &mut rx).await {
        shared.persist(job).await;
    }
    // Whatever is already queued still reaches disk.
    while let Ok(job) = rx.try_recv() {
        shared.persist(job).await;
    }
    tracing::debug!("log worker stopped");
}

pub(super) async fn message_worker(shared: Arc<Shared>, mut rx: mpsc::Receiver<Inbound>) {
    while let Some(inbound) = next(&shared, &mut rx).await {
        shared.handle_frame(&inbound.sender, &inbound.frame).await;
    }
    tracing::debug!("message worker stopped");
}

pub(super) async fn event_worker(shared: Arc<Shared>, mut rx: mpsc::Receiver<LocalEvent>) {
    while let Some(event) = next(&shared, &mut rx).await {
        if !event.is_local_to(&shared.identity) {
            tracing::debug!(
                method = event.change.method(),
                authority = event.authority.as_deref().unwrap_or_default(),
                "not relaying change applied on behalf of a peer"
            );
            continue;
        }
        let message = event.change.to_message().with_origin(shared.next_origin());
        shared.remember(message.fingerprint());
        if shared.enqueue_relay(None, message, true).await.is_err() {
            break;
        }
    }
    tracing::debug!("event worker stopped");
}

impl Shared {
    /// Stamp one message and hand it on.
    ///
    /// Persistent messages go through the log worker, which picks their live
    /// recipients only after the append and before releasing the log. Replay
    /// passes hold the same lock, so a syncing peer gets every entry exactly
    /// once: from a replay pass, or live once it has finished syncing.
    ///
    /// A message whose security object cannot be resolved is logged but not
    /// sent.
    async fn relay_now(&self, job: RelayJob) -> Result<(), ClusterError> {
        let RelayJob {
            source,
            mut message,
            persistent,
        } = job;

        let ts = now();
        message.ts = Some(ts);
        let frame = message.encode()?;

        let secured = match &message.security {
            None => Ok(None),
            Some(security) => self
                .directory
                .resolve(&security.kind, &security.name)
                .map(|object| Some((object, security.privs))),
        };
        let fanout = match secured {
            Ok(secured) => Some(Fanout {
                source: source.clone(),
                frame: frame.clone(),
                secured,
            }),
            Err(e) => {
                tracing::warn!(method = %message.method, error = %e, "not relaying message");
                None
            }
        };

        if !persistent {
            if let Some(fanout) = fanout {
                let targets = self.recipients(&fanout, false);
                send_all(targets, &fanout.frame).await;
            }
            return Ok(());
        }

        let entry = LogEntry {
            timestamp: ts,
            source,
            message: frame,
            security: message.security,
        };
        self.log_tx
            .send(LogJob { entry, fanout })
            .await
            .map_err(|_| ClusterError::Shutdown)
    }

    fn recipients(&self, fanout: &Fanout, persistent: bool) -> Vec<(String, Link)> {
        let registry = lock(&self.registry);
        relay::recipients(&registry, fanout.source.as_deref(), persistent, |name| {
            fanout
                .secured
                .as_ref()
                .map_or(true, |(object, privs)| object.has_privileges(name, *privs))
        })
    }

    /// Append one entry and fan it out.
    ///
    /// Reopens the log if a failed replay left it closed. An entry that
    /// cannot be written is still sent live.
    async fn persist(&self, job: LogJob) {
        let LogJob { entry, fanout } = job;
        let targets = {
            let mut log = self.log.lock().await;
            let opened = if log.is_open() { Ok(()) } else { log.open() };
            match opened.and_then(|()| log.append(&entry)) {
                Ok(true) => tracing::info!("replay log segment rotated"),
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "replay log append failed"),
            }
            fanout.map(|fanout| (self.recipients(&fanout, true), fanout.frame))
        };

        if let Some((targets, frame)) = targets {
            send_all(targets, &frame).await;
        }
    }
}

async fn send_all(targets: Vec<(String, Link)>, frame: &str) {
    for (name, link) in targets {
        if let Err(e) = link.send(frame.to_string()).await {
            tracing::debug!(endpoint = %name, error = %e, "relay send failed");
        }
    }
}
