/// Endpoint watermark persistence (`cluster/endpoints.json`).
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::registry::EndpointRegistry;
use crate::types::Timestamp;
use crate::ClusterError;

const STATE_FILE: &str = "endpoints.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Watermarks {
    pub local_log_position: Timestamp,
    pub remote_log_position: Timestamp,
}

/// Capture the watermarks of every endpoint.
pub fn snapshot(registry: &EndpointRegistry) -> BTreeMap<String, Watermarks> {
    registry
        .iter()
        .map(|e| {
            (
                e.name().to_string(),
                Watermarks {
                    local_log_position: e.local_log_position(),
                    remote_log_position: e.remote_log_position(),
                },
            )
        })
        .collect()
}

/// Write watermarks atomically (temp file, then rename).
pub fn save(cluster_dir: &Path, state: &BTreeMap<String, Watermarks>) -> Result<(), ClusterError> {
    fs::create_dir_all(cluster_dir)?;
    let path = cluster_dir.join(STATE_FILE);
    let tmp = cluster_dir.join(format!("{STATE_FILE}.tmp"));

    let json = serde_json::to_vec_pretty(state)?;
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&json)?;
    file.sync_all()?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Read saved watermarks. Missing or unreadable state yields an empty map.
pub fn load(cluster_dir: &Path) -> BTreeMap<String, Watermarks> {
    let path = cluster_dir.join(STATE_FILE);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(_) => return BTreeMap::new(),
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable endpoint state");
        BTreeMap::new()
    })
}

/// Apply saved watermarks to matching endpoints; unknown names are ignored.
pub fn restore(registry: &mut EndpointRegistry, state: &BTreeMap<String, Watermarks>) {
    for (name, marks) in state {
        if let Some(endpoint) = registry.get_mut(name) {
            endpoint.advance_local_log_position(marks.local_log_position);
            endpoint.remote_log_position = marks.remote_log_position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Endpoint;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new("a", vec![Endpoint::new("a"), Endpoint::new("b")]).unwrap()
    }

    #[test]
    fn save_then_load_restores_watermarks() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry();
        {
            let b = reg.get_mut("b").unwrap();
            b.advance_local_log_position(1234.5);
            b.remote_log_position = 999.0;
        }
        save(dir.path(), &snapshot(&reg)).unwrap();
        assert!(!dir.path().join("endpoints.json.tmp").exists());

        let mut fresh = registry();
        restore(&mut fresh, &load(dir.path()));
        let b = fresh.get("b").unwrap();
        assert_eq!(b.local_log_position(), 1234.5);
        assert_eq!(b.remote_log_position(), 999.0);
    }

    #[test]
    fn missing_or_corrupt_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).is_empty());
        fs::write(dir.path().join(STATE_FILE), b"{not json").unwrap();
        assert!(load(dir.path()).is_empty());
    }

    #[test]
    fn unknown_endpoints_are_ignored() {
        let mut state = BTreeMap::new();
        state.insert(
            "gone".to_string(),
            Watermarks {
                local_log_position: 5.0,
                remote_log_position: 5.0,
            },
        );
        let mut reg = registry();
        restore(&mut reg, &state);
        assert_eq!(reg.get("b").unwrap().local_log_position(), 0.0);
    }
}
