//! Mutual TLS for cluster links.
//!
//! Every node presents a certificate signed by the shared cluster CA and
//! requires one from its peer. The peer's endpoint name is the common name
//! of the certificate it presented.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::session::{Role, Session};
use crate::{TransportConfig, TransportError};

/// Loaded TLS material plus the acceptor/connector built from it.
#[derive(Clone)]
pub struct TlsContext {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
    identity: String,
    config: TransportConfig,
}

impl TlsContext {
    /// Load certificate, key and CA from the paths in `config`.
    pub fn load(config: &TransportConfig) -> Result<Self, TransportError> {
        let certs = load_certs(&config.cert_path, "certificate")?;
        let key = load_key(&config.key_path)?;
        let ca = load_certs(&config.ca_path, "CA certificate")?;

        let identity = common_name(&certs[0])?;

        let mut roots = RootCertStore::empty();
        for cert in ca {
            roots.add(cert).map_err(TransportError::Tls)?;
        }
        let roots = Arc::new(roots);
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let verifier = WebPkiClientVerifier::builder_with_provider(roots.clone(), provider.clone())
            .build()
            .map_err(|e| TransportError::Verifier(e.to_string()))?;

        let server = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(TransportError::Tls)?
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs.clone(), key.clone_key())
            .map_err(TransportError::Tls)?;

        let client = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(TransportError::Tls)?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(TransportError::Tls)?;

        tracing::info!(identity = %identity, cert = %config.cert_path.display(), "loaded TLS identity");

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server)),
            connector: TlsConnector::from(Arc::new(client)),
            identity,
            config: config.clone(),
        })
    }

    /// Common name of our own certificate.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Run the server side of the handshake on an accepted socket.
    pub async fn accept(&self, stream: TcpStream) -> Result<Session, TransportError> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());

        let tls = tokio::time::timeout(self.config.connect_timeout, self.acceptor.accept(stream))
            .await
            .map_err(|_| TransportError::ConnectTimeout { addr: peer.clone() })?
            .map_err(|source| TransportError::Handshake {
                peer: peer.clone(),
                source,
            })?;

        let identity = peer_identity(tls.get_ref().1.peer_certificates(), &peer)?;
        tracing::info!(identity = %identity, peer = %peer, "accepted cluster connection");

        Ok(Session::from_stream(tls, identity, peer, Role::Server, &self.config))
    }

    /// Connect to `host:port` and require the server to be `expected`.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        expected: &str,
    ) -> Result<Session, TransportError> {
        let addr = format!("{host}:{port}");
        let name = ServerName::try_from(expected.to_string())
            .map_err(|_| TransportError::InvalidServerName(expected.to_string()))?;

        let handshake = async {
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|source| TransportError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            self.connector
                .connect(name, tcp)
                .await
                .map_err(|source| TransportError::Handshake {
                    peer: addr.clone(),
                    source,
                })
        };

        let tls = tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::ConnectTimeout { addr: addr.clone() })??;

        let identity = peer_identity(tls.get_ref().1.peer_certificates(), &addr)?;
        if identity != expected {
            return Err(TransportError::IdentityMismatch {
                expected: expected.to_string(),
                actual: identity,
            });
        }
        tracing::info!(identity = %identity, peer = %addr, "connected to cluster endpoint");

        Ok(Session::from_stream(tls, identity, addr, Role::Client, &self.config))
    }
}

/// Extract the subject common name from a DER certificate.
pub fn common_name(der: &[u8]) -> Result<String, TransportError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| TransportError::InvalidCertificate(e.to_string()))?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| TransportError::InvalidCertificate("subject has no CN".into()))?;
    Ok(cn.to_string())
}

fn peer_identity(
    certs: Option<&[CertificateDer<'static>]>,
    peer: &str,
) -> Result<String, TransportError> {
    let leaf = certs
        .and_then(|c| c.first())
        .ok_or_else(|| TransportError::NoPeerCertificate {
            peer: peer.to_string(),
        })?;
    common_name(leaf)
}

fn open(path: &Path, what: &'static str) -> Result<BufReader<File>, TransportError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TransportError::Material {
            what,
            path: path.display().to_string(),
            source,
        })
}

fn load_certs(
    path: &Path,
    what: &'static str,
) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut reader = open(path, what)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TransportError::Material {
            what,
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TransportError::MissingMaterial {
            what,
            path: path.display().to_string(),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let mut reader = open(path, "private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TransportError::Material {
            what: "private key",
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TransportError::MissingMaterial {
            what: "private key",
            path: path.display().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_reported() {
        let config = TransportConfig::new("/nonexistent/a.crt", "/nonexistent/a.key", "/nonexistent/ca.crt");
        let err = TlsContext::load(&config).err().unwrap();
        assert!(matches!(err, TransportError::Material { what: "certificate", .. }));
    }

    #[test]
    fn empty_pem_is_missing_material() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("empty.crt");
        std::fs::write(&cert, "").unwrap();
        let err = load_certs(&cert, "certificate").unwrap_err();
        assert!(matches!(err, TransportError::MissingMaterial { .. }));
    }

    #[test]
    fn common_name_of_generated_cert() {
        let mut params = rcgen::CertificateParams::new(vec!["node-a".to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "node-a");
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        assert_eq!(common_name(cert.der()).unwrap(), "node-a");
    }

    #[test]
    fn garbage_der_is_rejected() {
        assert!(matches!(
            common_name(b"not a certificate"),
            Err(TransportError::InvalidCertificate(_))
        ));
    }
}
