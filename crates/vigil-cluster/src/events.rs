/// Local state-change events published by the domain collaborator.
///
/// Each change maps to one `cluster::*` method. The relay attaches a
/// `Service` security block requiring READ, so only endpoints allowed to see
/// the service receive the change.
use serde_json::{json, Value};

use crate::message::{methods, Message, Security};
use crate::types::{Privileges, Timestamp};

/// A change to a monitored service.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    CheckResult { service: String, check_result: Value },
    NextCheck { service: String, next_check: Timestamp },
    NextNotification {
        service: String,
        notification: String,
        next_notification: Timestamp,
    },
    ForceNextCheck { service: String, forced: bool },
    ForceNextNotification { service: String, forced: bool },
    EnableActiveChecks { service: String, enabled: bool },
    EnablePassiveChecks { service: String, enabled: bool },
    EnableNotifications { service: String, enabled: bool },
    EnableFlapping { service: String, enabled: bool },
    CommentAdded { service: String, comment: Value },
    CommentRemoved { service: String, id: Value },
    DowntimeAdded { service: String, downtime: Value },
    DowntimeRemoved { service: String, id: Value },
    AcknowledgementSet {
        service: String,
        author: String,
        comment: String,
        kind: i64,
        expiry: Timestamp,
    },
    AcknowledgementCleared { service: String },
}

impl StateChange {
    /// The service the change is about.
    pub fn service(&self) -> &str {
        match self {
            StateChange::CheckResult { service, .. }
            | StateChange::NextCheck { service, .. }
            | StateChange::NextNotification { service, .. }
            | StateChange::ForceNextCheck { service, .. }
            | StateChange::ForceNextNotification { service, .. }
            | StateChange::EnableActiveChecks { service, .. }
            | StateChange::EnablePassiveChecks { service, .. }
            | StateChange::EnableNotifications { service, .. }
            | StateChange::EnableFlapping { service, .. }
            | StateChange::CommentAdded { service, .. }
            | StateChange::CommentRemoved { service, .. }
            | StateChange::DowntimeAdded { service, .. }
            | StateChange::DowntimeRemoved { service, .. }
            | StateChange::AcknowledgementSet { service, .. }
            | StateChange::AcknowledgementCleared { service } => service,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            StateChange::CheckResult { .. } => methods::CHECK_RESULT,
            StateChange::NextCheck { .. } => methods::SET_NEXT_CHECK,
            StateChange::NextNotification { .. } => methods::SET_NEXT_NOTIFICATION,
            StateChange::ForceNextCheck { .. } => methods::SET_FORCE_NEXT_CHECK,
            StateChange::ForceNextNotification { .. } => methods::SET_FORCE_NEXT_NOTIFICATION,
            StateChange::EnableActiveChecks { .. } => methods::SET_ENABLE_ACTIVE_CHECKS,
            StateChange::EnablePassiveChecks { .. } => methods::SET_ENABLE_PASSIVE_CHECKS,
            StateChange::EnableNotifications { .. } => methods::SET_ENABLE_NOTIFICATIONS,
            StateChange::EnableFlapping { .. } => methods::SET_ENABLE_FLAPPING,
            StateChange::CommentAdded { .. } => methods::ADD_COMMENT,
            StateChange::CommentRemoved { .. } => methods::REMOVE_COMMENT,
            StateChange::DowntimeAdded { .. } => methods::ADD_DOWNTIME,
            StateChange::DowntimeRemoved { .. } => methods::REMOVE_DOWNTIME,
            StateChange::AcknowledgementSet { .. } => methods::SET_ACKNOWLEDGEMENT,
            StateChange::AcknowledgementCleared { .. } => methods::CLEAR_ACKNOWLEDGEMENT,
        }
    }

    fn params(&self) -> Value {
        match self {
            StateChange::CheckResult { service, check_result } => {
                json!({"service": service, "check_result": check_result})
            }
            StateChange::NextCheck { service, next_check } => {
                json!({"service": service, "next_check": next_check})
            }
            StateChange::NextNotification {
                notification,
                next_notification,
                ..
            } => json!({"notification": notification, "next_notification": next_notification}),
            StateChange::ForceNextCheck { service, forced }
            | StateChange::ForceNextNotification { service, forced } => {
                json!({"service": service, "forced": forced})
            }
            StateChange::EnableActiveChecks { service, enabled }
            | StateChange::EnablePassiveChecks { service, enabled }
            | StateChange::EnableNotifications { service, enabled }
            | StateChange::EnableFlapping { service, enabled } => {
                json!({"service": service, "enabled": enabled})
            }
            StateChange::CommentAdded { service, comment } => {
                json!({"service": service, "comment": comment})
            }
            StateChange::DowntimeAdded { service, downtime } => {
                json!({"service": service, "downtime": downtime})
            }
            StateChange::CommentRemoved { service, id }
            | StateChange::DowntimeRemoved { service, id } => json!({"service": service, "id": id}),
            StateChange::AcknowledgementSet {
                service,
                author,
                comment,
                kind,
                expiry,
            } => json!({
                "service": service,
                "author": author,
                "comment": comment,
                "type": kind,
                "expiry": expiry,
            }),
            StateChange::AcknowledgementCleared { service } => json!({"service": service}),
        }
    }

    /// Build the relay message, secured to READ on the service.
    pub fn to_message(&self) -> Message {
        Message::new(self.method(), self.params()).with_security(Security::new(
            "Service",
            self.service(),
            Privileges::READ,
        ))
    }
}

/// A change plus the endpoint that caused it.
///
/// `authority` names the endpoint the change originated from. Changes the
/// cluster itself applied on behalf of a peer carry that peer's name and are
/// not relayed again.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEvent {
    pub change: StateChange,
    pub authority: Option<String>,
}

impl LocalEvent {
    /// A change made by this node.
    pub fn local(change: StateChange) -> Self {
        Self {
            change,
            authority: None,
        }
    }

    /// A change attributed to `authority`.
    pub fn from_authority(change: StateChange, authority: impl Into<String>) -> Self {
        Self {
            change,
            authority: Some(authority.into()),
        }
    }

    /// Whether the event originated on the node named `identity`.
    pub fn is_local_to(&self, identity: &str) -> bool {
        self.authority.as_deref().map_or(true, |a| a == identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_result_message_shape() {
        let change = StateChange::CheckResult {
            service: "web!http".into(),
            check_result: json!({"state": 0}),
        };
        let msg = change.to_message();
        assert_eq!(msg.method, "cluster::CheckResult");
        assert_eq!(msg.param_str("service"), Some("web!http"));
        assert_eq!(msg.params["check_result"]["state"], 0);
        let sec = msg.security.unwrap();
        assert_eq!(sec.kind, "Service");
        assert_eq!(sec.name, "web!http");
        assert_eq!(sec.privs, Privileges::READ);
    }

    #[test]
    fn next_notification_secures_owning_service() {
        let change = StateChange::NextNotification {
            service: "web!http".into(),
            notification: "web!http!mail".into(),
            next_notification: 42.0,
        };
        let msg = change.to_message();
        assert_eq!(msg.param_str("notification"), Some("web!http!mail"));
        assert!(msg.param("service").is_none());
        assert_eq!(msg.security.unwrap().name, "web!http");
    }

    #[test]
    fn acknowledgement_uses_type_key() {
        let change = StateChange::AcknowledgementSet {
            service: "s".into(),
            author: "ops".into(),
            comment: "looking".into(),
            kind: 1,
            expiry: 0.0,
        };
        let msg = change.to_message();
        assert_eq!(msg.method, methods::SET_ACKNOWLEDGEMENT);
        assert_eq!(msg.params["type"], 1);
        assert_eq!(msg.param_str("author"), Some("ops"));
    }

    #[test]
    fn every_change_maps_to_a_domain_method() {
        let changes = vec![
            StateChange::ForceNextCheck { service: "s".into(), forced: true },
            StateChange::ForceNextNotification { service: "s".into(), forced: false },
            StateChange::EnableActiveChecks { service: "s".into(), enabled: true },
            StateChange::EnablePassiveChecks { service: "s".into(), enabled: true },
            StateChange::EnableNotifications { service: "s".into(), enabled: true },
            StateChange::EnableFlapping { service: "s".into(), enabled: true },
            StateChange::CommentAdded { service: "s".into(), comment: json!({"id": "c1"}) },
            StateChange::CommentRemoved { service: "s".into(), id: json!("c1") },
            StateChange::DowntimeAdded { service: "s".into(), downtime: json!({"id": "d1"}) },
            StateChange::DowntimeRemoved { service: "s".into(), id: json!("d1") },
            StateChange::AcknowledgementCleared { service: "s".into() },
        ];
        for change in changes {
            let msg = change.to_message();
            assert!(methods::DOMAIN.contains(&msg.method.as_str()), "{}", msg.method);
            assert_eq!(msg.param_str("service"), Some("s"));
        }
    }

    #[test]
    fn authority_decides_locality() {
        let change = StateChange::AcknowledgementCleared { service: "s".into() };
        assert!(LocalEvent::local(change.clone()).is_local_to("a"));
        assert!(LocalEvent::from_authority(change.clone(), "a").is_local_to("a"));
        assert!(!LocalEvent::from_authority(change, "b").is_local_to("a"));
    }
}
