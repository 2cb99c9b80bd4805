//! Vigil cluster layer.
//!
//! Replicates monitoring state between cluster endpoints on top of
//! `vigil-transport` (mutual TLS, netstring-framed JSON-RPC).
//!
//! - Persistent messages go through a replay log so reconnecting peers
//!   catch up on what they missed.
//! - Fan-out is filtered by per-object privileges.
//! - Every node elects the same owner per object and domain without
//!   coordination.
//! - Config files are pushed to peers that accept them.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod authority;
pub mod config;
pub mod config_sync;
pub mod directory;
pub mod error;
pub mod events;
pub mod log;
pub mod message;
pub mod registry;
pub mod relay;
pub mod runtime;
pub mod state;
pub mod types;

pub use authority::{authority_key, elect, sdbm, AuthorityTable};
pub use config::{ClusterConfig, DomainConfig, EndpointConfig, ObjectConfig};
pub use directory::{ClusterObject, MemoryDirectory, MemoryObject, ObjectDirectory, Rejection};
pub use error::ClusterError;
pub use events::{LocalEvent, StateChange};
pub use log::{LogEntry, ReplayLog, SegmentReader, MAX_SEGMENT_ENTRIES};
pub use message::{methods, Message, Origin, Security};
pub use registry::{Endpoint, EndpointRegistry};
pub use runtime::{Cluster, ClusterHandle, EndpointStatus};
pub use types::{now, AuthorityDomain, Features, Privileges, Timestamp};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
