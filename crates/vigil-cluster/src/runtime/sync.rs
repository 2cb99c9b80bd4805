/// Session attach and initial sync: config push, then log replay.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use vigil_transport::{Link, Session};

use crate::config_sync;
use crate::log::{list_segments, LogEntry, Segment, SegmentReader, MAX_SEGMENT_ENTRIES};
use crate::message::{methods, Message};
use crate::types::{now, Timestamp};
use crate::{lock, ClusterError};

use super::{Inbound, Shared};

/// Entries buffered between the segment reader thread and the sender.
const REPLAY_BUFFER: usize = 256;

impl Shared {
    /// Attach `session` to its endpoint and bring the peer up to date.
    pub(super) async fn register_session(
        self: &Arc<Self>,
        session: Session,
    ) -> Result<usize, ClusterError> {
        let identity = session.identity().to_string();
        let role = session.role();
        let (link, inbound) = session.into_parts();

        let attached = lock(&self.registry).attach(&identity, link.clone(), now());
        match attached {
            Ok(Some(previous)) => previous.close(),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Closing endpoint '{identity}': No configuration available.");
                link.close();
                return Err(e);
            }
        }
        tracing::info!(endpoint = %identity, %role, "endpoint connected");

        tokio::spawn(forward_inbound(Arc::clone(self), identity.clone(), link.clone(), inbound));

        let synced = self.sync_endpoint(&identity, &link).await;
        if let Err(e) = &synced {
            tracing::warn!(endpoint = %identity, error = %e, "initial sync failed");
            link.close();
        }
        synced
    }

    async fn sync_endpoint(&self, identity: &str, link: &Link) -> Result<usize, ClusterError> {
        self.send_config(identity, link).await?;
        self.replay(identity, link).await
    }

    /// Push the files matched by the peer endpoint's `config_files`.
    async fn send_config(&self, identity: &str, link: &Link) -> Result<(), ClusterError> {
        let patterns = lock(&self.registry)
            .get(identity)
            .map(|e| e.config_file_patterns().to_vec())
            .unwrap_or_default();

        let files = tokio::task::spawn_blocking(move || config_sync::collect_config_files(&patterns))
            .await
            .map_err(|e| ClusterError::Config(format!("config collection failed: {e}")))?;

        tracing::debug!(endpoint = %identity, files = files.len(), "sending config");
        let message = Message::new(
            methods::CONFIG,
            json!({ "identity": self.identity, "config_files": files }),
        );
        link.send(message.encode()?).await?;
        Ok(())
    }

    /// Replay the log to a newly connected peer.
    ///
    /// Passes run with the log writable until one replays at most a
    /// segment's worth of entries. The pass after that holds the log lock,
    /// so nothing is appended while the remaining tail is sent, and clears
    /// the syncing flag before the log reopens. Entries queued meanwhile
    /// are appended afterwards and reach the peer live.
    ///
    /// Closed segments never change, so each pass resumes a segment after
    /// the records an earlier pass already looked at.
    async fn replay(&self, identity: &str, link: &Link) -> Result<usize, ClusterError> {
        let mut watermark = lock(&self.registry)
            .get(identity)
            .map_or(0.0, |e| e.local_log_position());
        let mut consumed: HashMap<u64, usize> = HashMap::new();
        let mut previous: Option<usize> = None;
        let mut total = 0;

        loop {
            let mut log = Arc::clone(&self.log).lock_owned().await;
            log.close()?;
            log.rotate()?;

            let last_pass = previous.is_some_and(|count| count <= MAX_SEGMENT_ENTRIES);
            let held = if last_pass {
                Some(log)
            } else {
                log.open()?;
                drop(log);
                None
            };

            let passed = match list_segments(&self.log_dir) {
                Ok(segments) => {
                    self.replay_segments(identity, link, &segments, &mut watermark, &mut consumed)
                        .await
                }
                Err(e) => Err(e),
            };

            if let Some(mut log) = held {
                if passed.is_ok() {
                    self.finish_sync(identity, link);
                }
                log.open()?;
            }

            let count = passed?;
            tracing::info!("Replayed {count} messages.");
            total += count;

            if last_pass {
                return Ok(total);
            }
            previous = Some(count);
        }
    }

    async fn replay_segments(
        &self,
        identity: &str,
        link: &Link,
        segments: &[Segment],
        watermark: &mut Timestamp,
        consumed: &mut HashMap<u64, usize>,
    ) -> Result<usize, ClusterError> {
        let mut count = 0;
        for segment in segments {
            if (segment.timestamp as f64) < *watermark {
                continue;
            }
            tracing::info!("Replaying log: {}", segment.path.display());

            let seen = consumed.entry(segment.timestamp).or_insert(0);
            let mut entries = read_segment(segment.path.clone(), *seen);
            while let Some(entry) = entries.recv().await {
                *seen += 1;
                if entry.timestamp < *watermark || entry.source.as_deref() == Some(identity) {
                    continue;
                }
                if let Some(security) = &entry.security {
                    match self.directory.resolve(&security.kind, &security.name) {
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping log entry");
                            continue;
                        }
                        Ok(object) if !object.has_privileges(identity, security.privs) => {
                            tracing::debug!("Not replaying message to endpoint '{identity}': Insufficient privileges.");
                            continue;
                        }
                        Ok(_) => {}
                    }
                }
                link.send(entry.message).await?;
                count += 1;
                *watermark = entry.timestamp;
            }
        }
        Ok(count)
    }

    /// Clear the syncing flag if `link` is still the endpoint's session.
    fn finish_sync(&self, identity: &str, link: &Link) {
        let mut registry = lock(&self.registry);
        if let Some(endpoint) = registry.get_mut(identity) {
            if endpoint.link().is_some_and(|current| current == link) {
                endpoint.syncing = false;
                tracing::info!("Finished syncing endpoint '{identity}'.");
            }
        }
    }
}

/// Stream a segment's entries after the first `skip` from a blocking
/// reader thread.
fn read_segment(path: PathBuf, skip: usize) -> mpsc::Receiver<LogEntry> {
    let (tx, rx) = mpsc::channel(REPLAY_BUFFER);
    tokio::task::spawn_blocking(move || {
        let reader = match SegmentReader::open(&path) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::debug!(error = %e, "segment vanished before replay");
                return;
            }
        };
        for entry in reader.skip(skip) {
            if tx.blocking_send(entry).is_err() {
                break;
            }
        }
    });
    rx
}

/// Feed a session's frames into the message queue until it ends, then
/// detach the endpoint.
async fn forward_inbound(
    shared: Arc<Shared>,
    identity: String,
    link: Link,
    mut inbound: mpsc::Receiver<String>,
) {
    loop {
        let frame = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = inbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let item = Inbound {
            sender: identity.clone(),
            frame,
        };
        if shared.message_tx.send(item).await.is_err() {
            break;
        }
    }
    link.close();
    if lock(&shared.registry).detach(&identity, link.id()) {
        tracing::warn!("Endpoint '{identity}' disconnected.");
    }
}
