//! Immutable TLS credentials.

use crate::config::IdentityConfig;
use crate::identity::{IdentityError, Result, ServiceIdentity};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;

/// A client TLS configuration together with the identity it asserts.
///
/// Never mutated after construction; rotation replaces the whole value.
#[derive(Debug, Clone)]
pub struct Credential {
    client_config: Arc<ClientConfig>,
    identity: Option<ServiceIdentity>,
}

impl Credential {
    pub fn new(client_config: Arc<ClientConfig>, identity: Option<ServiceIdentity>) -> Self {
        Self {
            client_config,
            identity,
        }
    }

    /// Build a mutual-TLS credential from PEM: trusted CA bundle, client
    /// certificate chain (leaf first) and the client's private key.
    pub fn from_pem(
        ca_bundle: &[u8],
        certificate_chain: &[u8],
        private_key: &[u8],
        identity: Option<ServiceIdentity>,
    ) -> Result<Self> {
        let ca_certs = parse_certificates(ca_bundle)?;
        if ca_certs.is_empty() {
            return Err(IdentityError::Certificate("no CA certificates found".into()));
        }
        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots.add(cert).map_err(|e| {
                IdentityError::Certificate(format!("failed to add CA certificate: {}", e))
            })?;
        }

        let chain = parse_certificates(certificate_chain)?;
        if chain.is_empty() {
            return Err(IdentityError::Certificate("no client certificates found".into()));
        }
        let key = PrivateKeyDer::from_pem_slice(private_key)
            .map_err(|e| IdentityError::PrivateKey(e.to_string()))?;

        let client_config = ClientConfig::builder_with_provider(default_provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)?;

        Ok(Self::new(Arc::new(client_config), identity))
    }

    /// Read the PEM files named by `config`
    pub async fn load(config: &IdentityConfig) -> Result<Self> {
        let identity: ServiceIdentity = config.service.parse()?;
        let ca_bundle = read(&config.ca_bundle).await?;
        let certificate = read(&config.certificate).await?;
        let private_key = read(&config.private_key).await?;
        Self::from_pem(&ca_bundle, &certificate, &private_key, Some(identity))
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    pub fn identity(&self) -> Option<&ServiceIdentity> {
        self.identity.as_ref()
    }

    /// Cipher suites this credential negotiates, in preference order
    pub fn cipher_suites(&self) -> Vec<String> {
        self.client_config
            .crypto_provider()
            .cipher_suites
            .iter()
            .map(|suite| format!("{:?}", suite.suite()))
            .collect()
    }
}

pub(crate) fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| IdentityError::Certificate(format!("failed to parse certificates: {}", e)))
}

async fn read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| IdentityError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_utils::TestPki;
    use tempfile::TempDir;

    #[test]
    fn test_from_pem() {
        let pki = TestPki::generate("credential");
        let credential = pki.credential("domain.service");

        assert_eq!(credential.identity().unwrap().service(), "service");
        let suites = credential.cipher_suites();
        assert!(!suites.is_empty());
        assert!(suites.iter().any(|s| s.starts_with("TLS13_")));
    }

    #[test]
    fn test_invalid_pem_rejected() {
        let pki = TestPki::generate("credential");

        let no_ca = Credential::from_pem(b"", &pki.leaf_pem, &pki.leaf_key_pem, None);
        assert!(matches!(no_ca, Err(IdentityError::Certificate(_))));

        let no_chain = Credential::from_pem(&pki.ca_pem, b"", &pki.leaf_key_pem, None);
        assert!(matches!(no_chain, Err(IdentityError::Certificate(_))));

        let no_key = Credential::from_pem(&pki.ca_pem, &pki.leaf_pem, b"garbage", None);
        assert!(matches!(no_key, Err(IdentityError::PrivateKey(_))));
    }

    #[tokio::test]
    async fn test_load_from_files() {
        let pki = TestPki::generate("files");
        let temp_dir = TempDir::new().unwrap();
        let config = IdentityConfig {
            service: "domain.node-admin".to_string(),
            ca_bundle: temp_dir.path().join("ca.pem"),
            certificate: temp_dir.path().join("cert.pem"),
            private_key: temp_dir.path().join("key.pem"),
        };
        std::fs::write(&config.ca_bundle, &pki.ca_pem).unwrap();
        std::fs::write(&config.certificate, &pki.leaf_pem).unwrap();
        std::fs::write(&config.private_key, &pki.leaf_key_pem).unwrap();

        let credential = Credential::load(&config).await.unwrap();
        assert_eq!(credential.identity().unwrap().to_string(), "domain.node-admin");

        std::fs::remove_file(&config.private_key).unwrap();
        let err = Credential::load(&config).await.unwrap_err();
        assert!(matches!(err, IdentityError::Read { .. }));
        assert!(err.is_retryable());
    }
}
