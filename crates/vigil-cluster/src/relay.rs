/// Relay fan-out filter.
///
/// Decides which endpoints receive a relayed message live. Pure function
/// over the registry; the runtime does the sending.
use vigil_transport::Link;

use crate::registry::EndpointRegistry;

/// Live recipients for a message.
///
/// Skips self and `source`, disconnected peers for non-persistent traffic,
/// peers that `allowed` rejects (privilege check), peers still syncing, and
/// peers without a live link.
pub fn recipients(
    registry: &EndpointRegistry,
    source: Option<&str>,
    persistent: bool,
    allowed: impl Fn(&str) -> bool,
) -> Vec<(String, Link)> {
    let mut out = Vec::new();
    for endpoint in registry.iter() {
        let name = endpoint.name();
        if name == registry.identity() || Some(name) == source {
            continue;
        }
        if !persistent && !endpoint.is_connected() {
            continue;
        }
        if !allowed(name) {
            tracing::debug!("Not sending message to endpoint '{name}': Insufficient privileges.");
            continue;
        }
        if endpoint.is_syncing() {
            continue;
        }
        match endpoint.link() {
            Some(link) if !link.is_closed() => out.push((name.to_string(), link.clone())),
            _ => {}
        }
    }
    out
}
