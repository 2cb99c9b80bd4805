/// Config distribution.
///
/// On connect a node pushes the files matched by the peer's `config_files`
/// patterns. The receiver mirrors them under
/// `<state>/cluster/config/<sha256(identity)>/<sha256(filename)>` and reports
/// whether anything changed so the daemon can restart.
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::authority::matches_any;
use crate::ClusterError;

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Whether a config update from `sender` is accepted under `patterns`.
pub fn accepts(patterns: &[String], sender: &str) -> bool {
    matches_any(patterns, sender)
}

/// Read every file matched by `patterns` into `{path: {"content": ...}}`.
///
/// Unreadable files and malformed patterns are logged and skipped.
pub fn collect_config_files(patterns: &[String]) -> Map<String, Value> {
    let mut files = Map::new();
    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "invalid config file pattern");
                continue;
            }
        };
        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => {
                    files.insert(path.display().to_string(), json!({ "content": content }));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not read config file");
                }
            }
        }
    }
    files
}

/// Cache directory for config pushed on behalf of `identity`.
pub fn config_dir(cluster_dir: &Path, identity: &str) -> PathBuf {
    cluster_dir.join("config").join(sha256_hex(identity))
}

fn sync_error(path: &Path) -> impl FnOnce(std::io::Error) -> ClusterError + '_ {
    move |source| ClusterError::ConfigSync {
        path: path.display().to_string(),
        source,
    }
}

fn create_private_dir(dir: &Path) -> Result<(), ClusterError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(sync_error(dir))
}

/// Mirror `remote` into the cache for `identity`. Returns whether anything
/// was written or removed.
pub fn apply_config_update(
    cluster_dir: &Path,
    identity: &str,
    remote: &Map<String, Value>,
) -> Result<bool, ClusterError> {
    let dir = config_dir(cluster_dir, identity);
    create_private_dir(&dir)?;

    let mut local: Map<String, Value> = Map::new();
    for entry in fs::read_dir(&dir).map_err(sync_error(&dir))? {
        let entry = entry.map_err(sync_error(&dir))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let content = fs::read_to_string(entry.path()).unwrap_or_default();
        local.insert(name, Value::String(content));
    }

    let mut changed = local.len() != remote.len();

    for (filename, file) in remote {
        let hash = sha256_hex(filename);
        let content = file.get("content").and_then(Value::as_str).unwrap_or_default();
        let current = local.remove(&hash);
        if current.as_ref().and_then(Value::as_str) == Some(content) {
            continue;
        }
        let path = dir.join(&hash);
        tracing::info!("Updating configuration file: {}", path.display());
        fs::write(&path, content).map_err(sync_error(&path))?;
        changed = true;
    }

    for stale in local.keys() {
        let path = dir.join(stale);
        tracing::info!("Removing obsolete config file: {}", path.display());
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove config file");
        }
        changed = true;
    }

    Ok(changed)
}
