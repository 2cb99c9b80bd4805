/// Cluster runtime: wires the registry, replay log, relay and authority
/// election into live tokio tasks.
///
/// `Cluster::start` spawns one worker per queue (relay, log, inbound
/// messages, local events) plus the maintenance timer and, when a bind port
/// is configured, the TLS listener. The application talks to the running
/// cluster through a cheap-clone [`ClusterHandle`].
mod inbound;
mod maintenance;
mod net;
mod sync;
mod workers;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_transport::{Session, TlsContext};

use crate::authority::AuthorityTable;
use crate::config::ClusterConfig;
use crate::directory::{ClusterObject, ObjectDirectory};
use crate::events::LocalEvent;
use crate::log::{LogEntry, ReplayLog};
use crate::message::{Message, Origin};
use crate::registry::EndpointRegistry;
use crate::types::{now, AuthorityDomain, Features, Privileges, Timestamp};
use crate::{lock, state, ClusterError};

// ── Constants ─────────────────────────────────────────────────────────

/// Maintenance timer period.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// A connected peer silent for this many seconds is disconnected.
pub const PEER_TIMEOUT: f64 = 60.0;

/// Acknowledge a peer's log position once it moved this many seconds.
pub const LOG_POSITION_GRANULARITY: f64 = 10.0;

/// Concurrent inbound TLS handshakes.
pub const MAX_CONCURRENT_HANDSHAKES: usize = 64;

/// Recently seen message fingerprints kept for duplicate suppression.
const DEDUP_CAPACITY: usize = 4096;

const RELAY_QUEUE: usize = 1024;
const LOG_QUEUE: usize = 4096;
const MESSAGE_QUEUE: usize = 1024;
const EVENT_QUEUE: usize = 1024;

// ── Queue items ───────────────────────────────────────────────────────

pub(crate) struct RelayJob {
    source: Option<String>,
    message: Message,
    persistent: bool,
}

/// A persistent message on its way to the log.
pub(crate) struct LogJob {
    entry: LogEntry,
    /// Live delivery, decided once the entry is appended. `None` when the
    /// message is logged but must not be sent.
    fanout: Option<Fanout>,
}

pub(crate) struct Fanout {
    source: Option<String>,
    frame: String,
    secured: Option<(Arc<dyn ClusterObject>, Privileges)>,
}

pub(crate) struct Inbound {
    sender: String,
    frame: String,
}

// ── Shared state ──────────────────────────────────────────────────────

/// State shared by the handle and every runtime task.
pub(crate) struct Shared {
    identity: String,
    features: Features,
    cluster_dir: PathBuf,
    log_dir: PathBuf,
    peers: Vec<String>,
    local_addr: Option<SocketAddr>,

    registry: Mutex<EndpointRegistry>,
    authority: Mutex<AuthorityTable>,
    log: Arc<AsyncMutex<ReplayLog>>,
    directory: Arc<dyn ObjectDirectory>,
    tls: Option<TlsContext>,
    seen: Mutex<LruCache<[u8; 32], ()>>,
    epoch: Timestamp,
    next_seq: AtomicU64,
    connecting: Mutex<HashSet<String>>,

    relay_tx: mpsc::Sender<RelayJob>,
    log_tx: mpsc::Sender<LogJob>,
    message_tx: mpsc::Sender<Inbound>,
    event_tx: mpsc::Sender<LocalEvent>,

    restart: Notify,
    restart_requested: AtomicBool,
    cancel: CancellationToken,
    handshakes: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) async fn enqueue_relay(
        &self,
        source: Option<&str>,
        message: Message,
        persistent: bool,
    ) -> Result<(), ClusterError> {
        self.relay_tx
            .send(RelayJob {
                source: source.map(str::to_string),
                message,
                persistent,
            })
            .await
            .map_err(|_| ClusterError::Shutdown)
    }

    pub(crate) fn request_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
        self.restart.notify_one();
    }

    /// Number a change entering the cluster at this node.
    fn next_origin(&self) -> Origin {
        Origin {
            endpoint: self.identity.clone(),
            epoch: self.epoch,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn is_duplicate(&self, fingerprint: &[u8; 32]) -> bool {
        lock(&self.seen).contains(fingerprint)
    }

    fn remember(&self, fingerprint: [u8; 32]) {
        lock(&self.seen).put(fingerprint, ());
    }
}

// ── EndpointStatus ────────────────────────────────────────────────────

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointStatus {
    pub name: String,
    pub connected: bool,
    pub syncing: bool,
    pub last_seen: Timestamp,
    pub local_log_position: Timestamp,
    pub remote_log_position: Timestamp,
    pub features: Features,
}

// ── ClusterHandle (app-facing API) ────────────────────────────────────

/// Handle to a running cluster.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct ClusterHandle {
    shared: Arc<Shared>,
}

impl ClusterHandle {
    /// The local endpoint name.
    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    /// Address of the TLS listener, when one is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    /// Queue `message` for relay.
    ///
    /// `source` is the endpoint it came from (`None` for local messages).
    /// Persistent messages are written to the replay log before fan-out.
    pub async fn relay(
        &self,
        source: Option<&str>,
        message: Message,
        persistent: bool,
    ) -> Result<(), ClusterError> {
        self.shared.enqueue_relay(source, message, persistent).await
    }

    /// Whether this node owns `object` for `domain`, as of the last tick.
    pub fn is_authority(&self, object: &dyn ClusterObject, domain: AuthorityDomain) -> bool {
        lock(&self.shared.authority).get(object.kind(), object.name(), domain)
    }

    /// Sender for local state changes. Changes whose authority is another
    /// endpoint are dropped; the rest are relayed as persistent messages.
    pub fn events(&self) -> mpsc::Sender<LocalEvent> {
        self.shared.event_tx.clone()
    }

    /// Open a TLS session to `host:port`, requiring the peer to present
    /// `expected` as its name, then sync it.
    ///
    /// Returns the number of replayed messages.
    pub async fn connect(&self, host: &str, port: u16, expected: &str) -> Result<usize, ClusterError> {
        self.shared.connect(host, port, expected).await
    }

    /// Attach an authenticated session, push config and replay the log.
    ///
    /// Resolves once the endpoint is synced. Returns the number of replayed
    /// messages.
    pub async fn register_session(&self, session: Session) -> Result<usize, ClusterError> {
        self.shared.register_session(session).await
    }

    /// Run one maintenance pass now.
    pub async fn tick(&self) -> Result<(), ClusterError> {
        self.shared.tick().await
    }

    /// Run one maintenance pass as if the clock read `at`.
    ///
    /// Peers last heard from more than [`PEER_TIMEOUT`] seconds before `at`
    /// are disconnected.
    pub async fn tick_at(&self, at: Timestamp) -> Result<(), ClusterError> {
        self.shared.tick_at(at).await
    }

    pub fn endpoint(&self, name: &str) -> Option<EndpointStatus> {
        let registry = lock(&self.shared.registry);
        registry.get(name).map(|e| EndpointStatus {
            name: e.name().to_string(),
            connected: e.is_connected(),
            syncing: e.is_syncing(),
            last_seen: e.last_seen(),
            local_log_position: e.local_log_position(),
            remote_log_position: e.remote_log_position(),
            features: e.features(),
        })
    }

    pub fn is_restart_requested(&self) -> bool {
        self.shared.restart_requested.load(Ordering::SeqCst)
    }

    /// Resolves once a config update asked for a restart.
    pub async fn restart_requested(&self) {
        if self.is_restart_requested() {
            return;
        }
        self.shared.restart.notified().await;
    }

    /// Stop every task, close all sessions and rotate the log.
    pub async fn shutdown(&self) -> Result<(), ClusterError> {
        let shared = &self.shared;
        shared.cancel.cancel();

        let links: Vec<_> = lock(&shared.registry)
            .iter_mut()
            .filter_map(|e| e.link.take())
            .collect();
        for link in links {
            link.close();
        }

        let tasks = std::mem::take(&mut *lock(&shared.tasks));
        for task in tasks {
            let _ = task.await;
        }

        {
            let mut log = shared.log.lock().await;
            log.rotate()?;
        }
        let snapshot = state::snapshot(&lock(&shared.registry));
        state::save(&shared.cluster_dir, &snapshot)?;
        tracing::info!(identity = %shared.identity, "cluster shut down");
        Ok(())
    }
}

// ── Cluster ───────────────────────────────────────────────────────────

/// The cluster runtime. Start it, then drive it through the handle.
pub struct Cluster;

impl Cluster {
    /// Start the cluster for `config`.
    ///
    /// Without a TLS context the node cannot listen or dial; sessions can
    /// still be attached with [`ClusterHandle::register_session`].
    pub async fn start(
        config: ClusterConfig,
        directory: Arc<dyn ObjectDirectory>,
        tls: Option<TlsContext>,
    ) -> Result<ClusterHandle, ClusterError> {
        let identity = match (&config.identity, &tls) {
            (Some(identity), _) => identity.clone(),
            (None, Some(tls)) => tls.identity().to_string(),
            (None, None) => {
                return Err(ClusterError::Config(
                    "no identity configured and no certificate to derive it from".into(),
                ))
            }
        };

        let mut registry = EndpointRegistry::new(&identity, config.build_endpoints())?;
        if let Some(local) = registry.local_mut() {
            local.features = config.features;
        }

        let cluster_dir = config.cluster_dir();
        state::restore(&mut registry, &state::load(&cluster_dir));

        let log_dir = cluster_dir.join("log");
        let mut log = ReplayLog::new(&log_dir)?;
        // Leftovers from an unclean exit become a closed segment.
        log.rotate()?;
        log.open()?;

        let listener = match config.bind_port {
            Some(_) if tls.is_none() => {
                return Err(ClusterError::Config(
                    "a listener needs certificate, key and CA".into(),
                ))
            }
            Some(port) => Some(TcpListener::bind((config.bind_host.as_str(), port)).await?),
            None => None,
        };
        let local_addr = listener.as_ref().and_then(|l| l.local_addr().ok());

        let (relay_tx, relay_rx) = mpsc::channel(RELAY_QUEUE);
        let (log_tx, log_rx) = mpsc::channel(LOG_QUEUE);
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        let capacity = NonZeroUsize::new(DEDUP_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        let shared = Arc::new(Shared {
            identity,
            features: config.features,
            cluster_dir,
            log_dir,
            peers: config.peers.clone(),
            local_addr,
            registry: Mutex::new(registry),
            authority: Mutex::new(AuthorityTable::new()),
            log: Arc::new(AsyncMutex::new(log)),
            directory,
            tls,
            seen: Mutex::new(LruCache::new(capacity)),
            epoch: now(),
            next_seq: AtomicU64::new(0),
            connecting: Mutex::new(HashSet::new()),
            relay_tx,
            log_tx,
            message_tx,
            event_tx,
            restart: Notify::new(),
            restart_requested: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handshakes: Arc::new(Semaphore::new(MAX_CONCURRENT_HANDSHAKES)),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = vec![
            tokio::spawn(workers::relay_worker(Arc::clone(&shared), relay_rx)),
            tokio::spawn(workers::log_worker(Arc::clone(&shared), log_rx)),
            tokio::spawn(workers::message_worker(Arc::clone(&shared), message_rx)),
            tokio::spawn(workers::event_worker(Arc::clone(&shared), event_rx)),
            tokio::spawn(maintenance::timer(Arc::clone(&shared))),
        ];
        if let Some(listener) = listener {
            if let Some(addr) = local_addr {
                tracing::info!(identity = %shared.identity, %addr, "cluster listener started");
            }
            tasks.push(tokio::spawn(net::accept_loop(Arc::clone(&shared), listener)));
        }
        lock(&shared.tasks).extend(tasks);

        tracing::info!(identity = %shared.identity, peers = shared.peers.len(), "cluster started");
        Ok(ClusterHandle { shared })
    }
}
