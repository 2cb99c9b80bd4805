/// Cluster messages: JSON-RPC shaped objects carried one per frame.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{Privileges, Timestamp};
use crate::ClusterError;

/// Method names understood by the cluster layer.
pub mod methods {
    pub const HEARTBEAT: &str = "cluster::HeartBeat";
    pub const SET_LOG_POSITION: &str = "cluster::SetLogPosition";
    pub const CONFIG: &str = "cluster::Config";

    pub const CHECK_RESULT: &str = "cluster::CheckResult";
    pub const SET_NEXT_CHECK: &str = "cluster::SetNextCheck";
    pub const SET_NEXT_NOTIFICATION: &str = "cluster::SetNextNotification";
    pub const SET_FORCE_NEXT_CHECK: &str = "cluster::SetForceNextCheck";
    pub const SET_FORCE_NEXT_NOTIFICATION: &str = "cluster::SetForceNextNotification";
    pub const SET_ENABLE_ACTIVE_CHECKS: &str = "cluster::SetEnableActiveChecks";
    pub const SET_ENABLE_PASSIVE_CHECKS: &str = "cluster::SetEnablePassiveChecks";
    pub const SET_ENABLE_NOTIFICATIONS: &str = "cluster::SetEnableNotifications";
    pub const SET_ENABLE_FLAPPING: &str = "cluster::SetEnableFlapping";
    pub const ADD_COMMENT: &str = "cluster::AddComment";
    pub const REMOVE_COMMENT: &str = "cluster::RemoveComment";
    pub const ADD_DOWNTIME: &str = "cluster::AddDowntime";
    pub const REMOVE_DOWNTIME: &str = "cluster::RemoveDowntime";
    pub const SET_ACKNOWLEDGEMENT: &str = "cluster::SetAcknowledgement";
    pub const CLEAR_ACKNOWLEDGEMENT: &str = "cluster::ClearAcknowledgement";

    /// Domain-event methods, opaque to the cluster layer.
    pub const DOMAIN: [&str; 15] = [
        CHECK_RESULT,
        SET_NEXT_CHECK,
        SET_NEXT_NOTIFICATION,
        SET_FORCE_NEXT_CHECK,
        SET_FORCE_NEXT_NOTIFICATION,
        SET_ENABLE_ACTIVE_CHECKS,
        SET_ENABLE_PASSIVE_CHECKS,
        SET_ENABLE_NOTIFICATIONS,
        SET_ENABLE_FLAPPING,
        ADD_COMMENT,
        REMOVE_COMMENT,
        ADD_DOWNTIME,
        REMOVE_DOWNTIME,
        SET_ACKNOWLEDGEMENT,
        CLEAR_ACKNOWLEDGEMENT,
    ];
}

/// The object a message is about, and the privilege needed to receive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub privs: Privileges,
}

impl Security {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, privs: Privileges) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            privs,
        }
    }
}

/// Identity of one state change, assigned where it enters the cluster and
/// carried unchanged on every hop.
///
/// `epoch` is the start time of the process that numbered the change, so
/// sequence numbers restarting from zero never collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub endpoint: String,
    pub epoch: Timestamp,
    pub seq: u64,
}

/// `{jsonrpc: "2.0", method, params, security?, ts?, origin?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

impl Message {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            security: None,
            ts: None,
            origin: None,
        }
    }

    pub fn with_security(mut self, security: Security) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn encode(&self) -> Result<String, ClusterError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self, ClusterError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.method == methods::HEARTBEAT
    }

    /// SHA-256 identifying the change this message carries.
    ///
    /// Covers the origin when there is one, so equal payloads from distinct
    /// changes differ. Without an origin it falls back to method and params.
    /// `ts` and `security` never count: they change from hop to hop.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        match &self.origin {
            Some(origin) => {
                hasher.update(b"origin\0");
                hasher.update(origin.endpoint.as_bytes());
                hasher.update([0u8]);
                hasher.update(origin.epoch.to_bits().to_be_bytes());
                hasher.update(origin.seq.to_be_bytes());
            }
            None => {
                hasher.update(self.method.as_bytes());
                hasher.update([0u8]);
                hasher.update(self.params.to_string().as_bytes());
            }
        }
        hasher.finalize().into()
    }
}
