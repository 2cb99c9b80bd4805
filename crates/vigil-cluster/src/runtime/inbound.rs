/// Inbound message handling: watermark bookkeeping, then dispatch by method.
use serde_json::{json, Value};

use crate::config_sync;
use crate::directory::Rejection;
use crate::lock;
use crate::message::{methods, Message};
use crate::types::{now, Features, Timestamp};

use super::{Shared, LOG_POSITION_GRANULARITY};

impl Shared {
    pub(super) async fn handle_frame(&self, sender: &str, frame: &str) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(endpoint = %sender, error = %e, "dropping malformed message");
                return;
            }
        };

        let received = now();
        let ack = {
            let mut registry = lock(&self.registry);
            let Some(endpoint) = registry.get_mut(sender) else {
                return;
            };
            endpoint.last_seen = received;
            match message.ts {
                Some(ts) if ts < endpoint.remote_log_position => {
                    tracing::debug!(endpoint = %sender, ts, "ignoring message older than the remote log position");
                    return;
                }
                Some(ts) if endpoint.remote_log_position + LOG_POSITION_GRANULARITY < ts => {
                    endpoint.remote_log_position = ts;
                    endpoint.link.clone().map(|link| (link, ts))
                }
                _ => None,
            }
        };

        if let Some((link, ts)) = ack {
            self.acknowledge(sender, &link, ts).await;
        }

        match message.method.as_str() {
            methods::HEARTBEAT => self.on_heartbeat(sender, message, received).await,
            methods::SET_LOG_POSITION => self.on_log_position(sender, &message),
            methods::CONFIG => self.on_config(sender, message).await,
            _ => self.on_domain(sender, message).await,
        }
    }

    async fn acknowledge(&self, sender: &str, link: &vigil_transport::Link, ts: Timestamp) {
        let reply = Message::new(methods::SET_LOG_POSITION, json!({ "log_position": ts }));
        let frame = match reply.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "cannot encode log position");
                return;
            }
        };
        match link.send(frame).await {
            Ok(()) => tracing::info!("Acknowledging log position for identity '{sender}': {ts}"),
            Err(e) => tracing::debug!(endpoint = %sender, error = %e, "log position not sent"),
        }
    }

    /// Heartbeats update the named endpoint and are forwarded one hop when
    /// the sender speaks for itself.
    async fn on_heartbeat(&self, sender: &str, message: Message, received: Timestamp) {
        let Some(identity) = message.param_str("identity").map(str::to_string) else {
            return;
        };
        let features = Features::from_wire(message.param("features"));
        {
            let mut registry = lock(&self.registry);
            if identity != self.identity {
                if let Some(endpoint) = registry.get_mut(&identity) {
                    endpoint.last_seen = received;
                    endpoint.features = features;
                }
            }
        }

        if identity == sender {
            if let Err(e) = self.enqueue_relay(Some(sender), message, false).await {
                tracing::debug!(error = %e, "heartbeat not forwarded");
            }
        }
    }

    fn on_log_position(&self, sender: &str, message: &Message) {
        let Some(position) = message.param_f64("log_position") else {
            return;
        };
        if let Some(endpoint) = lock(&self.registry).get_mut(sender) {
            endpoint.advance_local_log_position(position);
        }
    }

    async fn on_config(&self, sender: &str, message: Message) {
        let Some(files) = message.param("config_files").and_then(Value::as_object).cloned() else {
            return;
        };
        let identity = message.param_str("identity").unwrap_or(sender).to_string();

        let accepted = lock(&self.registry)
            .local()
            .is_some_and(|local| config_sync::accepts(local.accept_config_patterns(), sender));
        if !accepted {
            tracing::warn!("Ignoring config update from endpoint '{sender}' for identity '{identity}'.");
            return;
        }

        tracing::info!("Processing config update for identity '{identity}'.");
        let cluster_dir = self.cluster_dir.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            config_sync::apply_config_update(&cluster_dir, &identity, &files)
        })
        .await;
        match outcome {
            Ok(Ok(true)) => {
                tracing::info!("Restarting after configuration change.");
                self.request_restart();
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "config update failed");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "config update task failed");
                return;
            }
        }

        if let Err(e) = self.enqueue_relay(Some(sender), message, true).await {
            tracing::debug!(error = %e, "config update not relayed");
        }
    }

    /// Domain updates are applied through the directory and relayed on
    /// success. A change already seen on another path is dropped.
    ///
    /// Updates arriving without an origin are numbered here, so each one is
    /// a distinct change for every node downstream.
    async fn on_domain(&self, sender: &str, mut message: Message) {
        if message.origin.is_none() {
            message.origin = Some(self.next_origin());
        }
        let fingerprint = message.fingerprint();
        if self.is_duplicate(&fingerprint) {
            tracing::debug!(endpoint = %sender, method = %message.method, "dropping duplicate message");
            return;
        }

        match self.directory.apply_remote(sender, &message) {
            Ok(()) => {
                self.remember(fingerprint);
                if let Err(e) = self.enqueue_relay(Some(sender), message, true).await {
                    tracing::debug!(error = %e, "update not relayed");
                }
            }
            Err(Rejection::Forbidden { .. }) => {
                tracing::debug!(
                    "Not accepting message from endpoint '{sender}' for method '{}': Insufficient privileges.",
                    message.method
                );
            }
            Err(Rejection::UnsupportedMethod(method)) => {
                tracing::debug!(endpoint = %sender, %method, "ignoring unknown method");
            }
            Err(Rejection::UnknownObject(object)) => {
                tracing::debug!(endpoint = %sender, %object, "ignoring update for unknown object");
            }
            Err(e) => {
                tracing::warn!(endpoint = %sender, method = %message.method, error = %e, "rejected update");
            }
        }
    }
}
