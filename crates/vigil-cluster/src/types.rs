/// Core types shared across the cluster layer.
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unix time in (fractional) seconds, as carried on the wire and in the log.
pub type Timestamp = f64;

/// Current Unix time in seconds.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ── Features ──────────────────────────────────────────────────────────

/// Capabilities an endpoint advertises in its heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// The endpoint runs active checks.
    #[serde(default)]
    pub checker: bool,
    /// The endpoint sends notifications.
    #[serde(default)]
    pub notifications: bool,
}

impl Features {
    /// Wire form: `{"checker": 0|1, "notification": 0|1}`.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "checker": u8::from(self.checker),
            "notification": u8::from(self.notifications),
        })
    }

    /// Parse the wire form. Missing or malformed flags read as disabled.
    pub fn from_wire(value: Option<&Value>) -> Self {
        let flag = |key: &str| match value.and_then(|v| v.get(key)) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            _ => false,
        };
        Self {
            checker: flag("checker"),
            notifications: flag("notification"),
        }
    }
}

// ── Privileges ────────────────────────────────────────────────────────

/// Privilege bitmask an endpoint holds on a domain object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privileges(u32);

impl Privileges {
    pub const NONE: Self = Self(0);
    /// May receive messages about the object.
    pub const READ: Self = Self(1);
    /// May submit check results for the object.
    pub const CHECK_RESULT: Self = Self(2);
    /// May change the object's state remotely.
    pub const COMMAND: Self = Self(4);
    pub const ALL: Self = Self(1 | 2 | 4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `required` is set in `self`.
    pub const fn contains(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }
}

impl BitOr for Privileges {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Privileges {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ── AuthorityDomain ───────────────────────────────────────────────────

/// A capability class for which one endpoint is elected owner per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorityDomain {
    Checker,
    Notifications,
}

impl AuthorityDomain {
    pub const ALL: [AuthorityDomain; 2] = [AuthorityDomain::Checker, AuthorityDomain::Notifications];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorityDomain::Checker => "checker",
            AuthorityDomain::Notifications => "notifications",
        }
    }

    /// Whether an endpoint advertising `features` can hold this domain.
    pub fn supported_by(&self, features: &Features) -> bool {
        match self {
            AuthorityDomain::Checker => features.checker,
            AuthorityDomain::Notifications => features.notifications,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            AuthorityDomain::Checker => 0,
            AuthorityDomain::Notifications => 1,
        }
    }
}

impl fmt::Display for AuthorityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
