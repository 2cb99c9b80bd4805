//! Interfaces to the monitored-object domain, plus an in-memory implementation.
//!
//! The cluster layer never interprets domain payloads. It needs to resolve
//! the object named in a message's `security` block, ask it about
//! privileges, walk all objects for authority election, and hand remote
//! state changes over for application.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::message::{methods, Message};
use crate::types::{AuthorityDomain, Privileges};
use crate::{lock, ClusterError};

/// A domain object the cluster layer can reason about.
pub trait ClusterObject: Send + Sync {
    /// Type name, e.g. `"Service"`.
    fn kind(&self) -> &str;
    fn name(&self) -> &str;
    /// Whether `endpoint` holds every bit of `required` on this object.
    fn has_privileges(&self, endpoint: &str, required: Privileges) -> bool;
    /// Glob patterns restricting which endpoints may own this object.
    /// Empty means unrestricted.
    fn authority_patterns(&self) -> &[String];
    /// Store the local election result for `domain`.
    fn set_authority(&self, domain: AuthorityDomain, owner: bool);
}

/// Why a remote state change was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("unknown object '{0}'")]
    UnknownObject(String),

    #[error("endpoint '{endpoint}' lacks command privileges on '{object}'")]
    Forbidden { endpoint: String, object: String },

    #[error("malformed params: {0}")]
    MalformedParams(String),

    #[error("unsupported method '{0}'")]
    UnsupportedMethod(String),
}

/// The domain collaborator as seen by the cluster layer.
pub trait ObjectDirectory: Send + Sync {
    /// Look up an object by type and name.
    fn resolve(&self, kind: &str, name: &str) -> Result<Arc<dyn ClusterObject>, ClusterError>;

    /// Visit every object once.
    fn for_each_object(&self, visit: &mut dyn FnMut(&dyn ClusterObject));

    /// Apply a state change received from `sender`.
    fn apply_remote(&self, sender: &str, message: &Message) -> Result<(), Rejection>;
}

// ── MemoryObject ──────────────────────────────────────────────────────

/// An object held entirely in memory.
#[derive(Debug)]
pub struct MemoryObject {
    kind: String,
    name: String,
    /// `None`: the object belongs to no domain and grants everything.
    acl: Option<HashMap<String, Privileges>>,
    authorities: Vec<String>,
    owned: Mutex<[bool; 2]>,
    last_applied: Mutex<Option<Message>>,
}

impl MemoryObject {
    /// An unrestricted object.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            acl: None,
            authorities: Vec::new(),
            owned: Mutex::new([false; 2]),
            last_applied: Mutex::new(None),
        }
    }

    /// Restrict the object to explicit grants, OR-ing `privs` into `endpoint`'s.
    pub fn grant(mut self, endpoint: impl Into<String>, privs: Privileges) -> Self {
        *self
            .acl
            .get_or_insert_with(HashMap::new)
            .entry(endpoint.into())
            .or_default() |= privs;
        self
    }

    /// Restrict the object to explicit grants without adding any.
    pub fn restricted(mut self) -> Self {
        self.acl.get_or_insert_with(HashMap::new);
        self
    }

    pub fn authorities(mut self, patterns: Vec<String>) -> Self {
        self.authorities = patterns;
        self
    }

    /// Local election result for `domain` as of the last tick.
    pub fn is_authority(&self, domain: AuthorityDomain) -> bool {
        lock(&self.owned)[domain.index()]
    }

    /// The most recent remote change applied to this object.
    pub fn last_applied(&self) -> Option<Message> {
        lock(&self.last_applied).clone()
    }
}

impl ClusterObject for MemoryObject {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_privileges(&self, endpoint: &str, required: Privileges) -> bool {
        match &self.acl {
            None => true,
            Some(acl) => acl
                .get(endpoint)
                .copied()
                .unwrap_or_default()
                .contains(required),
        }
    }

    fn authority_patterns(&self) -> &[String] {
        &self.authorities
    }

    fn set_authority(&self, domain: AuthorityDomain, owner: bool) {
        lock(&self.owned)[domain.index()] = owner;
    }
}

// ── MemoryDirectory ───────────────────────────────────────────────────

/// A fixed set of [`MemoryObject`]s.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    objects: BTreeMap<(String, String), Arc<MemoryObject>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an object.
    pub fn insert(&mut self, object: MemoryObject) -> Arc<MemoryObject> {
        let object = Arc::new(object);
        self.objects.insert(
            (object.kind.clone(), object.name.clone()),
            Arc::clone(&object),
        );
        object
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<Arc<MemoryObject>> {
        self.objects
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// `"host!service!notification"` belongs to `"host!service"`.
fn owning_service(notification: &str) -> Option<&str> {
    notification.rsplit_once('!').map(|(service, _)| service)
}

fn require(message: &Message, key: &str, check: fn(&Value) -> bool) -> Result<(), Rejection> {
    match message.param(key) {
        Some(value) if check(value) => Ok(()),
        _ => Err(Rejection::MalformedParams(format!(
            "{} requires '{key}'",
            message.method
        ))),
    }
}

fn validate_params(message: &Message) -> Result<(), Rejection> {
    match message.method.as_str() {
        methods::CHECK_RESULT => require(message, "check_result", Value::is_object),
        methods::SET_NEXT_CHECK => require(message, "next_check", Value::is_number),
        methods::SET_NEXT_NOTIFICATION => require(message, "next_notification", Value::is_number),
        methods::SET_FORCE_NEXT_CHECK | methods::SET_FORCE_NEXT_NOTIFICATION => {
            require(message, "forced", Value::is_boolean)
        }
        methods::SET_ENABLE_ACTIVE_CHECKS
        | methods::SET_ENABLE_PASSIVE_CHECKS
        | methods::SET_ENABLE_NOTIFICATIONS
        | methods::SET_ENABLE_FLAPPING => require(message, "enabled", Value::is_boolean),
        methods::ADD_COMMENT => require(message, "comment", Value::is_object),
        methods::ADD_DOWNTIME => require(message, "downtime", Value::is_object),
        methods::REMOVE_COMMENT | methods::REMOVE_DOWNTIME => require(message, "id", |v| !v.is_null()),
        methods::SET_ACKNOWLEDGEMENT => require(message, "author", Value::is_string),
        methods::CLEAR_ACKNOWLEDGEMENT => Ok(()),
        other => Err(Rejection::UnsupportedMethod(other.to_string())),
    }
}

impl ObjectDirectory for MemoryDirectory {
    fn resolve(&self, kind: &str, name: &str) -> Result<Arc<dyn ClusterObject>, ClusterError> {
        self.get(kind, name)
            .map(|object| object as Arc<dyn ClusterObject>)
            .ok_or_else(|| ClusterError::UnresolvedSecurityRef {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }

    fn for_each_object(&self, visit: &mut dyn FnMut(&dyn ClusterObject)) {
        for object in self.objects.values() {
            visit(object.as_ref());
        }
    }

    fn apply_remote(&self, sender: &str, message: &Message) -> Result<(), Rejection> {
        if !methods::DOMAIN.contains(&message.method.as_str()) {
            return Err(Rejection::UnsupportedMethod(message.method.clone()));
        }

        let service = match (message.param_str("service"), message.param_str("notification")) {
            (Some(service), _) => service,
            (None, Some(notification)) => owning_service(notification).ok_or_else(|| {
                Rejection::MalformedParams(format!("notification '{notification}' has no service"))
            })?,
            (None, None) => {
                return Err(Rejection::MalformedParams("missing 'service'".into()));
            }
        };

        let object = self
            .get("Service", service)
            .ok_or_else(|| Rejection::UnknownObject(service.to_string()))?;

        if !object.has_privileges(sender, Privileges::COMMAND) {
            return Err(Rejection::Forbidden {
                endpoint: sender.to_string(),
                object: service.to_string(),
            });
        }

        validate_params(message)?;

        *lock(&object.last_applied) = Some(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn directory() -> MemoryDirectory {
        let mut dir = MemoryDirectory::new();
        dir.insert(MemoryObject::new("Service", "web!http"));
        dir.insert(
            MemoryObject::new("Service", "db!ping")
                .grant("master", Privileges::ALL)
                .grant("satellite", Privileges::READ),
        );
        dir
    }

    #[test]
    fn unrestricted_object_grants_everything() {
        let dir = directory();
        let web = dir.get("Service", "web!http").unwrap();
        assert!(web.has_privileges("anyone", Privileges::ALL));
    }

    #[test]
    fn restricted_object_checks_acl() {
        let dir = directory();
        let db = dir.get("Service", "db!ping").unwrap();
        assert!(db.has_privileges("master", Privileges::COMMAND));
        assert!(db.has_privileges("satellite", Privileges::READ));
        assert!(!db.has_privileges("satellite", Privileges::COMMAND));
        assert!(!db.has_privileges("stranger", Privileges::READ));

        let locked = MemoryObject::new("Service", "x").restricted();
        assert!(!locked.has_privileges("master", Privileges::READ));
    }

    #[test]
    fn resolve_unknown_is_typed_error() {
        let dir = directory();
        assert!(dir.resolve("Service", "web!http").is_ok());
        assert!(matches!(
            dir.resolve("Service", "nope").err().unwrap(),
            ClusterError::UnresolvedSecurityRef { .. }
        ));
        assert!(dir.resolve("Host", "web!http").is_err());
    }

    #[test]
    fn apply_remote_records_change() {
        let dir = directory();
        let msg = Message::new(
            methods::SET_NEXT_CHECK,
            json!({"service": "db!ping", "next_check": 1700000000.0}),
        );
        dir.apply_remote("master", &msg).unwrap();
        assert_eq!(dir.get("Service", "db!ping").unwrap().last_applied(), Some(msg));
    }

    #[test]
    fn apply_remote_requires_command_privilege() {
        let dir = directory();
        let msg = Message::new(
            methods::SET_ENABLE_FLAPPING,
            json!({"service": "db!ping", "enabled": true}),
        );
        assert_eq!(
            dir.apply_remote("satellite", &msg),
            Err(Rejection::Forbidden {
                endpoint: "satellite".into(),
                object: "db!ping".into()
            })
        );
    }

    #[test]
    fn apply_remote_rejects_bad_input() {
        let dir = directory();
        let unknown = Message::new(methods::CHECK_RESULT, json!({"service": "ghost", "check_result": {}}));
        assert!(matches!(dir.apply_remote("master", &unknown), Err(Rejection::UnknownObject(_))));

        let malformed = Message::new(methods::CHECK_RESULT, json!({"service": "web!http"}));
        assert!(matches!(dir.apply_remote("master", &malformed), Err(Rejection::MalformedParams(_))));

        let unsupported = Message::new("cluster::Bogus", json!({"service": "web!http"}));
        assert!(matches!(dir.apply_remote("master", &unsupported), Err(Rejection::UnsupportedMethod(_))));
    }

    #[test]
    fn notification_resolves_to_owning_service() {
        let dir = directory();
        let msg = Message::new(
            methods::SET_NEXT_NOTIFICATION,
            json!({"notification": "web!http!mail-admins", "next_notification": 5.0}),
        );
        dir.apply_remote("master", &msg).unwrap();
        assert!(dir.get("Service", "web!http").unwrap().last_applied().is_some());
    }

    #[test]
    fn set_authority_is_visible() {
        let dir = directory();
        let web = dir.get("Service", "web!http").unwrap();
        assert!(!web.is_authority(AuthorityDomain::Checker));
        web.set_authority(AuthorityDomain::Checker, true);
        assert!(web.is_authority(AuthorityDomain::Checker));
        assert!(!web.is_authority(AuthorityDomain::Notifications));
    }

    #[test]
    fn for_each_visits_all() {
        let dir = directory();
        let mut seen = Vec::new();
        dir.for_each_object(&mut |o| seen.push(o.name().to_string()));
        assert_eq!(seen.len(), 2);
    }
}
