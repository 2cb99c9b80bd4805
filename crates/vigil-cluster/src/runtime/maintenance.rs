/// Periodic maintenance: heartbeat, stale peers, log pruning, authority
/// election, reconnection and watermark persistence.
use std::sync::Arc;

use serde_json::json;

use crate::authority::{authority_key, capable_endpoints, elect, eligible_for, AuthorityTable};
use crate::log::prune_segments;
use crate::message::{methods, Message};
use crate::types::{now, AuthorityDomain, Timestamp};
use crate::{lock, state, ClusterError};

use super::{Shared, PEER_TIMEOUT, TICK_INTERVAL};

/// Run [`Shared::tick`] every [`TICK_INTERVAL`] until cancelled.
pub(super) async fn timer(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    // Skip the immediate first tick
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = shared.tick().await {
                    tracing::warn!(error = %e, "maintenance pass failed");
                }
            }
        }
    }
}

impl Shared {
    pub(super) async fn tick(self: &Arc<Self>) -> Result<(), ClusterError> {
        self.tick_at(now()).await
    }

    /// One maintenance pass with the clock reading `at`.
    pub(super) async fn tick_at(self: &Arc<Self>, at: Timestamp) -> Result<(), ClusterError> {
        self.send_heartbeat(at).await?;
        self.close_stale(at);

        let registry = &self.registry;
        if let Err(e) = prune_segments(&self.log_dir, |ts| lock(registry).needs_segment(ts as f64)) {
            tracing::warn!(error = %e, "log pruning failed");
        }

        self.update_authority();
        self.reconnect_peers();

        let snapshot = state::snapshot(&lock(&self.registry));
        if let Err(e) = state::save(&self.cluster_dir, &snapshot) {
            tracing::warn!(error = %e, "could not persist endpoint state");
        }
        Ok(())
    }

    async fn send_heartbeat(&self, at: Timestamp) -> Result<(), ClusterError> {
        {
            let mut registry = lock(&self.registry);
            if let Some(local) = registry.local_mut() {
                local.features = self.features;
                local.last_seen = at;
            }
        }
        let heartbeat = Message::new(
            methods::HEARTBEAT,
            json!({ "identity": self.identity, "features": self.features.to_wire() }),
        );
        self.enqueue_relay(None, heartbeat, false).await
    }

    fn close_stale(&self, at: Timestamp) {
        let stale = lock(&self.registry).take_stale(at, PEER_TIMEOUT);
        for (name, link) in stale {
            tracing::warn!("Closing connection for endpoint '{name}' due to inactivity.");
            link.close();
        }
    }

    /// Elect an owner per object and domain and record whether it is us.
    pub(super) fn update_authority(&self) {
        let capable = {
            let registry = lock(&self.registry);
            AuthorityDomain::ALL.map(|domain| capable_endpoints(&registry, domain))
        };

        let mut table = AuthorityTable::new();
        self.directory.for_each_object(&mut |object| {
            let key = authority_key(object.kind(), object.name());
            for domain in AuthorityDomain::ALL {
                let eligible = eligible_for(&capable[domain.index()], object.authority_patterns());
                let owner = elect(&eligible, &key);
                let ours = owner == Some(self.identity.as_str());
                object.set_authority(domain, ours);
                table.set(object.kind(), object.name(), domain, ours);
            }
        });
        tracing::debug!(objects = table.len(), "authority updated");
        *lock(&self.authority) = table;
    }

    /// Dial every configured peer that is down and has an address.
    fn reconnect_peers(self: &Arc<Self>) {
        if self.tls.is_none() {
            return;
        }
        for peer in &self.peers {
            let target = {
                let registry = lock(&self.registry);
                match registry.get(peer) {
                    None => {
                        tracing::warn!("Attempted to reconnect to endpoint '{peer}': No configuration found.");
                        continue;
                    }
                    Some(endpoint) if endpoint.is_connected() => continue,
                    Some(endpoint) => match (endpoint.host(), endpoint.port()) {
                        (Some(host), Some(port)) => (host.to_string(), port),
                        _ => {
                            tracing::warn!("Can't reconnect to endpoint '{peer}': No host/port information.");
                            continue;
                        }
                    },
                }
            };

            if !lock(&self.connecting).insert(peer.clone()) {
                continue;
            }

            let (host, port) = target;
            tracing::info!("Attempting to reconnect to cluster endpoint '{peer}' via '{host}:{port}'.");
            let shared = Arc::clone(self);
            let name = peer.clone();
            tokio::spawn(async move {
                if let Err(e) = shared.connect(&host, port, &name).await {
                    tracing::warn!("Exception occurred while reconnecting to endpoint '{name}': {e}");
                }
            });
        }
    }
}
