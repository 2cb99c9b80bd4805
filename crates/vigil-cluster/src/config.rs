use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use vigil_transport::{TlsContext, TransportConfig};

use crate::directory::{MemoryDirectory, MemoryObject};
use crate::registry::Endpoint;
use crate::types::{Features, Privileges};
use crate::ClusterError;

/// Node configuration, loaded from TOML.
///
/// ```toml
/// state_dir = "/var/lib/vigil"
/// bind_port = 5665
/// cert_path = "/etc/vigil/pki/master1.crt"
/// key_path = "/etc/vigil/pki/master1.key"
/// ca_path = "/etc/vigil/pki/ca.crt"
/// peers = ["master2"]
///
/// [features]
/// checker = true
///
/// [[endpoints]]
/// name = "master1"
///
/// [[endpoints]]
/// name = "master2"
/// host = "10.0.0.2"
/// port = 5665
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Local endpoint name. Defaults to the CN of the local certificate.
    #[serde(default)]
    pub identity: Option<String>,
    /// Root for `cluster/log`, `cluster/config` and `cluster/endpoints.json`.
    pub state_dir: PathBuf,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// No listener is started when absent.
    #[serde(default)]
    pub bind_port: Option<u16>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
    /// Endpoints this node keeps connected.
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Peer names (globs) whose config pushes this endpoint accepts.
    #[serde(default)]
    pub accept_config: Vec<String>,
    /// Local files (globs) pushed to this endpoint when it connects.
    #[serde(default)]
    pub config_files: Vec<String>,
}

/// A named privilege domain: endpoint name → bitmask.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainConfig {
    pub name: String,
    #[serde(default)]
    pub acl: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub authorities: Vec<String>,
}

impl ClusterConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ClusterError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ClusterError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ClusterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ClusterError> {
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name.as_str()) {
                return Err(ClusterError::Config(format!(
                    "duplicate endpoint '{}'",
                    endpoint.name
                )));
            }
            if endpoint.host.is_some() != endpoint.port.is_some() {
                return Err(ClusterError::Config(format!(
                    "endpoint '{}' needs both host and port, or neither",
                    endpoint.name
                )));
            }
        }
        for peer in &self.peers {
            if !names.contains(peer.as_str()) {
                return Err(ClusterError::Config(format!("unknown peer '{peer}'")));
            }
        }
        let domains: HashSet<&str> = self.domains.iter().map(|d| d.name.as_str()).collect();
        for object in &self.objects {
            if let Some(missing) = object.domains.iter().find(|d| !domains.contains(d.as_str())) {
                return Err(ClusterError::Config(format!(
                    "object '{}' references unknown domain '{missing}'",
                    object.name
                )));
            }
        }
        Ok(())
    }

    /// `<state_dir>/cluster`.
    pub fn cluster_dir(&self) -> PathBuf {
        self.state_dir.join("cluster")
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig::new(&self.cert_path, &self.key_path, &self.ca_path)
    }

    /// Load certificate, key and CA.
    pub fn load_tls(&self) -> Result<TlsContext, ClusterError> {
        TlsContext::load(&self.transport()).map_err(ClusterError::Tls)
    }

    pub(crate) fn build_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .map(|cfg| {
                let mut endpoint = Endpoint::new(&cfg.name)
                    .accept_config(cfg.accept_config.clone())
                    .config_files(cfg.config_files.clone());
                if let (Some(host), Some(port)) = (&cfg.host, cfg.port) {
                    endpoint = endpoint.address(host, port);
                }
                endpoint
            })
            .collect()
    }

    /// In-memory objects with privileges from their domains' ACLs.
    pub fn build_directory(&self) -> MemoryDirectory {
        let mut directory = MemoryDirectory::new();
        for object in &self.objects {
            let mut built = MemoryObject::new(&object.kind, &object.name)
                .authorities(object.authorities.clone());
            if !object.domains.is_empty() {
                built = built.restricted();
                for domain in self.domains.iter().filter(|d| object.domains.contains(&d.name)) {
                    for (endpoint, bits) in &domain.acl {
                        built = built.grant(endpoint, Privileges::from_bits(*bits));
                    }
                }
            }
            directory.insert(built);
        }
        directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ClusterObject;

    const SAMPLE: &str = r#"
        identity = "master1"
        state_dir = "/var/lib/vigil"
        bind_port = 5665
        cert_path = "master1.crt"
        key_path = "master1.key"
        ca_path = "ca.crt"
        peers = ["master2"]

        [features]
        checker = true
        notifications = false

        [[endpoints]]
        name = "master1"
        accept_config = ["master*"]

        [[endpoints]]
        name = "master2"
        host = "10.0.0.2"
        port = 5665
        config_files = ["/etc/vigil/zones.d/*.conf"]

        [[domains]]
        name = "eu"
        acl = { master1 = 7, satellite = 1 }

        [[domains]]
        name = "ops"
        acl = { satellite = 4 }

        [[objects]]
        type = "Service"
        name = "web!http"
        domains = ["eu", "ops"]
        authorities = ["master*"]

        [[objects]]
        type = "Host"
        name = "web"
    "#;

    #[test]
    fn parses_full_sample() {
        let config = ClusterConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.identity.as_deref(), Some("master1"));
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.bind_port, Some(5665));
        assert!(config.features.checker);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.cluster_dir(), PathBuf::from("/var/lib/vigil/cluster"));

        let endpoints = config.build_endpoints();
        assert_eq!(endpoints[1].host(), Some("10.0.0.2"));
        assert_eq!(endpoints[0].accept_config_patterns(), ["master*".to_string()]);
    }

    #[test]
    fn directory_ors_domain_acls() {
        let config = ClusterConfig::from_toml(SAMPLE).unwrap();
        let directory = config.build_directory();
        let web = directory.get("Service", "web!http").unwrap();
        assert!(web.has_privileges("master1", Privileges::ALL));
        assert!(web.has_privileges("satellite", Privileges::READ | Privileges::COMMAND));
        assert!(!web.has_privileges("satellite", Privileges::CHECK_RESULT));
        assert!(!web.has_privileges("master2", Privileges::READ));
        assert_eq!(web.authority_patterns(), ["master*".to_string()]);

        let host = directory.get("Host", "web").unwrap();
        assert!(host.has_privileges("anyone", Privileges::ALL));
    }

    #[test]
    fn rejects_unknown_peer() {
        let text = SAMPLE.replace(r#"peers = ["master2"]"#, r#"peers = ["ghost"]"#);
        let err = ClusterConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("unknown peer 'ghost'"));
    }

    #[test]
    fn rejects_unknown_domain() {
        let text = SAMPLE.replace(r#"domains = ["eu", "ops"]"#, r#"domains = ["nowhere"]"#);
        let err = ClusterConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("unknown domain 'nowhere'"));
    }

    #[test]
    fn rejects_duplicate_endpoint() {
        let text = format!("{SAMPLE}\n[[endpoints]]\nname = \"master1\"\n");
        assert!(matches!(
            ClusterConfig::from_toml(&text),
            Err(ClusterError::Config(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        let text = format!("bogus = 1\n{SAMPLE}");
        assert!(ClusterConfig::from_toml(&text).is_err());
    }
}
