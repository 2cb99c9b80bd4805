/// Authority election: deterministic per-object owner selection.
///
/// Every node sorts the eligible endpoint names, hashes
/// `"<type>\t<name>"` with SDBM and picks `eligible[hash % len]`. Nodes that
/// see the same eligible set agree on the owner without exchanging messages.
use std::collections::HashMap;

use crate::registry::EndpointRegistry;
use crate::types::AuthorityDomain;

/// SDBM string hash over UTF-8 bytes with 32-bit wrapping arithmetic.
pub fn sdbm(input: &str) -> u32 {
    input.bytes().fold(0u32, |hash, byte| {
        u32::from(byte)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash)
    })
}

/// The election key for an object.
pub fn authority_key(kind: &str, name: &str) -> String {
    format!("{kind}\t{name}")
}

/// Pick the owner of `key` among `eligible`, which must be sorted.
pub fn elect<'a>(eligible: &'a [String], key: &str) -> Option<&'a str> {
    if eligible.is_empty() {
        return None;
    }
    let index = sdbm(key) as usize % eligible.len();
    Some(eligible[index].as_str())
}

/// Whether `name` matches any of the glob `patterns`.
///
/// Malformed patterns only match the identical string.
pub fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|pattern| match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(name),
        Err(_) => pattern == name,
    })
}

/// Sorted names of endpoints that may hold `domain`.
///
/// An endpoint qualifies when it is connected (or is us) and advertises the
/// matching feature.
pub fn capable_endpoints(registry: &EndpointRegistry, domain: AuthorityDomain) -> Vec<String> {
    let mut names: Vec<String> = registry
        .iter()
        .filter(|e| e.name() == registry.identity() || e.is_connected())
        .filter(|e| domain.supported_by(&e.features()))
        .map(|e| e.name().to_string())
        .collect();
    names.sort();
    names
}

/// Narrow `capable` to the object's allow-list; an empty list allows all.
pub fn eligible_for(capable: &[String], allow: &[String]) -> Vec<String> {
    if allow.is_empty() {
        return capable.to_vec();
    }
    capable
        .iter()
        .filter(|name| matches_any(allow, name))
        .cloned()
        .collect()
}

// ── AuthorityTable ────────────────────────────────────────────────────

/// Last election results for the local node, keyed by object.
#[derive(Debug, Default)]
pub struct AuthorityTable {
    owned: HashMap<String, [bool; 2]>,
}

impl AuthorityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: &str, name: &str, domain: AuthorityDomain, owner: bool) {
        let slot = self.owned.entry(authority_key(kind, name)).or_default();
        slot[domain.index()] = owner;
    }

    /// Unknown objects are not owned.
    pub fn get(&self, kind: &str, name: &str, domain: AuthorityDomain) -> bool {
        self.owned
            .get(&authority_key(kind, name))
            .is_some_and(|slot| slot[domain.index()])
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Endpoint;
    use crate::types::Features;
    use vigil_transport::Link;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sdbm_known_values() {
        assert_eq!(sdbm(""), 0);
        assert_eq!(sdbm("a"), 97);
        assert_eq!(sdbm("host1!svc1"), 13_899_593);
        assert_eq!(sdbm("Service\thost1!svc1"), 2_886_843_837);
        assert_eq!(sdbm("Host\thost1"), 2_048_297_352);
        assert_eq!(sdbm("Service\thost3!load"), 2_403_753_520);
    }

    #[test]
    fn elect_empty_set_has_no_owner() {
        assert_eq!(elect(&[], "Service\tx"), None);
    }

    #[test]
    fn elect_picks_hash_modulo_index() {
        let eligible = names(&["A", "B", "C"]);
        // 2_403_753_520 % 3 == 1
        assert_eq!(elect(&eligible, "Service\thost3!load"), Some("B"));
        // 2_886_843_837 % 3 == 0
        assert_eq!(elect(&eligible, "Service\thost1!svc1"), Some("A"));
        // 33_627_752 % 3 == 2
        assert_eq!(elect(&eligible, "Service\thost2!disk"), Some("C"));
    }

    #[test]
    fn allow_list_filters_by_glob() {
        let capable = names(&["master1", "master2", "sat-eu"]);
        assert_eq!(eligible_for(&capable, &[]), capable);
        assert_eq!(
            eligible_for(&capable, &names(&["master*"])),
            names(&["master1", "master2"])
        );
        assert!(eligible_for(&capable, &names(&["nobody"])).is_empty());
    }

    #[test]
    fn capable_requires_connection_and_feature() {
        let mut registry = EndpointRegistry::new(
            "a",
            vec![Endpoint::new("a"), Endpoint::new("b"), Endpoint::new("c")],
        )
        .unwrap();
        let checker = Features {
            checker: true,
            notifications: false,
        };
        registry.local_mut().unwrap().features = checker;
        registry.get_mut("b").unwrap().features = checker;
        registry.get_mut("c").unwrap().features = checker;

        // b and c are not connected yet.
        assert_eq!(capable_endpoints(&registry, AuthorityDomain::Checker), names(&["a"]));

        let (link_b, _rb) = Link::pair(1);
        registry.attach("b", link_b, 1.0).unwrap();
        assert_eq!(
            capable_endpoints(&registry, AuthorityDomain::Checker),
            names(&["a", "b"])
        );
        assert!(capable_endpoints(&registry, AuthorityDomain::Notifications).is_empty());
    }

    #[test]
    fn table_defaults_to_not_owned() {
        let mut table = AuthorityTable::new();
        assert!(!table.get("Service", "x", AuthorityDomain::Checker));
        table.set("Service", "x", AuthorityDomain::Checker, true);
        assert!(table.get("Service", "x", AuthorityDomain::Checker));
        assert!(!table.get("Service", "x", AuthorityDomain::Notifications));
        assert_eq!(table.len(), 1);
    }
}
