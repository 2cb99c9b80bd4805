/// Integration test: coordination-free authority election.
///
/// Every node computes the owner from the same inputs, so the result must
/// not depend on the order endpoints were configured or iterated in.
use proptest::prelude::*;
use tokio::sync::mpsc;
use vigil_cluster::authority::{authority_key, capable_endpoints, elect, eligible_for, sdbm};
use vigil_cluster::{AuthorityDomain, Endpoint, EndpointRegistry, Features};
use vigil_transport::Link;

/// Registry for `identity` where every other name is connected and each
/// endpoint advertises the features `features_of` returns.
fn connected(
    identity: &str,
    names: &[&str],
    features_of: impl Fn(&str) -> Features,
) -> (EndpointRegistry, Vec<mpsc::Receiver<String>>) {
    let endpoints = names
        .iter()
        .map(|n| Endpoint::new(*n).with_features(features_of(n)))
        .collect();
    let mut registry = EndpointRegistry::new(identity, endpoints).unwrap();
    let mut receivers = Vec::new();
    for name in names.iter().filter(|n| **n != identity) {
        let (link, rx) = Link::pair(1);
        registry.attach(name, link, 1.0).unwrap();
        receivers.push(rx);
    }
    (registry, receivers)
}

const CHECKER: Features = Features {
    checker: true,
    notifications: false,
};

#[test]
fn three_node_scenario_picks_the_same_owner_everywhere() {
    // sdbm("Service\thost3!load") % 3 == 1
    let key = authority_key("Service", "host3!load");
    assert_eq!(sdbm(&key) % 3, 1);

    for identity in ["A", "B", "C"] {
        let (registry, _rx) = connected(identity, &["A", "B", "C"], |_| CHECKER);
        let capable = capable_endpoints(&registry, AuthorityDomain::Checker);
        assert_eq!(capable, vec!["A", "B", "C"]);
        assert_eq!(elect(&capable, &key), Some("B"), "as seen from {identity}");
    }
}

#[test]
fn losing_a_node_moves_only_some_objects() {
    let all = vec!["A".to_string(), "B".to_string(), "C".to_string()];
    let without_c = vec!["A".to_string(), "B".to_string()];

    let host = authority_key("Host", "host1");
    let service = authority_key("Service", "host1!svc1");

    assert_eq!(elect(&all, &host), Some("A"));
    assert_eq!(elect(&without_c, &host), Some("A"));

    assert_eq!(elect(&all, &service), Some("A"));
    assert_eq!(elect(&without_c, &service), Some("B"));
}

#[test]
fn allow_list_narrows_candidates() {
    let capable = vec![
        "master1".to_string(),
        "master2".to_string(),
        "satellite".to_string(),
    ];
    let eligible = eligible_for(&capable, &["master*".to_string()]);
    assert_eq!(eligible, vec!["master1", "master2"]);

    let key = authority_key("Service", "web!http");
    let owner = elect(&eligible, &key).unwrap();
    assert!(owner.starts_with("master"));
}

#[test]
fn endpoint_without_feature_is_never_elected() {
    let (registry, _rx) = connected("A", &["A", "B", "C"], |name| {
        if name == "B" {
            Features::default()
        } else {
            CHECKER
        }
    });

    let capable = capable_endpoints(&registry, AuthorityDomain::Checker);
    assert_eq!(capable, vec!["A", "C"]);
    assert!(capable_endpoints(&registry, AuthorityDomain::Notifications).is_empty());
}

#[test]
fn disconnected_peer_is_not_capable_but_self_is() {
    let endpoints = ["A", "B"]
        .iter()
        .map(|n| Endpoint::new(*n).with_features(CHECKER))
        .collect();
    let registry = EndpointRegistry::new("A", endpoints).unwrap();

    let capable = capable_endpoints(&registry, AuthorityDomain::Checker);
    assert_eq!(capable, vec!["A"]);
}

fn arb_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z][a-z0-9-]{0,11}", 1..8)
        .prop_map(|set| set.into_iter().collect())
}

proptest! {
    /// Any ordering of the same endpoint set elects the same owner.
    #[test]
    fn election_ignores_configuration_order(
        names in arb_names(),
        kind in "(Host|Service)",
        object in "[a-z0-9!._-]{1,24}",
        seed in any::<u64>(),
    ) {
        let key = authority_key(&kind, &object);

        let mut sorted = names.clone();
        sorted.sort();
        let expected = elect(&sorted, &key).map(str::to_string);

        // Deterministic shuffle, then go through the registry's own sort.
        let mut shuffled = names.clone();
        let len = shuffled.len();
        for i in 0..len {
            let j = (seed.rotate_left(i as u32) as usize) % len;
            shuffled.swap(i, j);
        }
        let refs: Vec<&str> = shuffled.iter().map(String::as_str).collect();
        let (registry, _rx) = connected(refs[0], &refs, |_| CHECKER);
        let capable = capable_endpoints(&registry, AuthorityDomain::Checker);

        prop_assert_eq!(elect(&capable, &key).map(str::to_string), expected);
    }

    /// The owner is always one of the eligible endpoints.
    #[test]
    fn owner_is_eligible(names in arb_names(), object in "[a-z0-9!]{1,24}") {
        let key = authority_key("Service", &object);
        let owner = elect(&names, &key).unwrap();
        prop_assert!(names.iter().any(|n| n == owner));
    }
}
