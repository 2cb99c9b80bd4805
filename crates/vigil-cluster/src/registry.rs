/// Endpoint registry: configured peers and their live session state.
///
/// Pure state: attaching a link hands back the link it replaced so the
/// caller can close it. No I/O happens here.
use std::collections::BTreeMap;

use vigil_transport::Link;

use crate::types::{Features, Timestamp};
use crate::ClusterError;

/// One configured cluster peer, possibly ourselves.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub(crate) name: String,
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) link: Option<Link>,
    pub(crate) syncing: bool,
    pub(crate) last_seen: Timestamp,
    pub(crate) local_log_position: Timestamp,
    pub(crate) remote_log_position: Timestamp,
    pub(crate) features: Features,
    pub(crate) accept_config: Vec<String>,
    pub(crate) config_files: Vec<String>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            port: None,
            link: None,
            syncing: false,
            last_seen: 0.0,
            local_log_position: 0.0,
            remote_log_position: 0.0,
            features: Features::default(),
            accept_config: Vec::new(),
            config_files: Vec::new(),
        }
    }

    /// Set the address used for active reconnection.
    pub fn address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Initial features; heartbeats overwrite them.
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Glob patterns of peer names we accept config updates from.
    pub fn accept_config(mut self, patterns: Vec<String>) -> Self {
        self.accept_config = patterns;
        self
    }

    /// Glob patterns of local files pushed to this endpoint on connect.
    pub fn config_files(mut self, patterns: Vec<String>) -> Self {
        self.config_files = patterns;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    /// A live link is attached and has not been closed.
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.is_closed())
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn last_seen(&self) -> Timestamp {
        self.last_seen
    }

    pub fn local_log_position(&self) -> Timestamp {
        self.local_log_position
    }

    pub fn remote_log_position(&self) -> Timestamp {
        self.remote_log_position
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn accept_config_patterns(&self) -> &[String] {
        &self.accept_config
    }

    pub fn config_file_patterns(&self) -> &[String] {
        &self.config_files
    }

    /// Raise the local watermark; it never moves backwards.
    pub(crate) fn advance_local_log_position(&mut self, ts: Timestamp) {
        if ts > self.local_log_position {
            self.local_log_position = ts;
        }
    }
}

/// All configured endpoints, keyed by name.
#[derive(Debug)]
pub struct EndpointRegistry {
    identity: String,
    endpoints: BTreeMap<String, Endpoint>,
}

impl EndpointRegistry {
    /// Build the registry. Exactly one endpoint must carry `identity`.
    pub fn new(identity: impl Into<String>, endpoints: Vec<Endpoint>) -> Result<Self, ClusterError> {
        let identity = identity.into();
        let mut map = BTreeMap::new();
        for endpoint in endpoints {
            let name = endpoint.name.clone();
            if map.insert(name.clone(), endpoint).is_some() {
                return Err(ClusterError::Config(format!("duplicate endpoint '{name}'")));
            }
        }
        if !map.contains_key(&identity) {
            return Err(ClusterError::MissingLocalEndpoint { identity });
        }
        Ok(Self {
            identity,
            endpoints: map,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(name)
    }

    /// The endpoint describing this node.
    pub fn local(&self) -> Option<&Endpoint> {
        self.endpoints.get(&self.identity)
    }

    pub fn local_mut(&mut self) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&self.identity)
    }

    /// Endpoints in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.endpoints.values_mut()
    }

    /// Attach a freshly authenticated link to the endpoint `name`.
    ///
    /// Marks the endpoint syncing and seen. Returns the link it replaced,
    /// which the caller must close.
    pub fn attach(
        &mut self,
        name: &str,
        link: Link,
        now: Timestamp,
    ) -> Result<Option<Link>, ClusterError> {
        let endpoint = self
            .endpoints
            .get_mut(name)
            .ok_or_else(|| ClusterError::UnknownPeer {
                identity: name.to_string(),
            })?;
        endpoint.syncing = true;
        endpoint.last_seen = now;
        Ok(endpoint.link.replace(link))
    }

    /// Drop the link of `name` if it is still `link_id`.
    ///
    /// A session ending after it was superseded leaves the newer link alone.
    pub fn detach(&mut self, name: &str, link_id: u64) -> bool {
        match self.endpoints.get_mut(name) {
            Some(endpoint) if endpoint.link.as_ref().is_some_and(|l| l.id() == link_id) => {
                endpoint.link = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.endpoints.get(name).is_some_and(Endpoint::is_connected)
    }

    pub fn set_syncing(&mut self, name: &str, syncing: bool) {
        if let Some(endpoint) = self.endpoints.get_mut(name) {
            endpoint.syncing = syncing;
        }
    }

    /// Detach and return links of endpoints not seen for longer than `timeout`.
    pub fn take_stale(&mut self, now: Timestamp, timeout: f64) -> Vec<(String, Link)> {
        let mut stale = Vec::new();
        for endpoint in self.endpoints.values_mut() {
            if endpoint.last_seen > now - timeout {
                continue;
            }
            if let Some(link) = endpoint.link.take() {
                stale.push((endpoint.name.clone(), link));
            }
        }
        stale
    }

    /// Whether any non-self peer still needs log data newer than `position`.
    ///
    /// Peers that never acknowledged anything (position 0) do not count.
    pub fn needs_segment(&self, segment_ts: Timestamp) -> bool {
        self.endpoints.values().any(|e| {
            e.name != self.identity
                && e.local_log_position != 0.0
                && segment_ts > e.local_log_position
        })
    }
}
