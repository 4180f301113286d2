//! # Service Identity
//!
//! Mutual-TLS identity for outbound connections, rotated without
//! interrupting callers.
//!
//! An external identity provider renews the agent's certificate and pushes
//! each new [`Credential`] through the [`CredentialListener`] interface. The
//! [`IdentityTlsConnector`] keeps exactly one current credential in an
//! atomically swappable cell: every connection takes one snapshot of the
//! credential when it starts and uses it throughout, so no connection ever
//! mixes the TLS state of one credential with the identity of another.
//!
//! ```rust,no_run
//! use node_admin::identity::{Credential, CredentialListener, IdentityTlsConnector};
//!
//! # async fn example(initial: Credential, renewed: Credential) -> Result<(), node_admin::identity::IdentityError> {
//! let connector = IdentityTlsConnector::new(initial);
//! let stream = connector.connect("config.example.com", 4443).await?;
//!
//! // Pushed by the identity provider; the open stream keeps its credential.
//! connector.on_credentials_update(renewed);
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub mod connector;
pub mod credential;

pub use connector::IdentityTlsConnector;
pub use credential::Credential;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid service identity '{0}': expected <domain>.<service>")]
    InvalidIdentity(String),

    #[error("Invalid certificate: {0}")]
    Certificate(String),

    #[error("Invalid private key: {0}")]
    PrivateKey(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid server name '{0}'")]
    InvalidServerName(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection failed: {0}")]
    Io(#[from] std::io::Error),
}

impl IdentityError {
    /// Whether a new attempt may succeed without different input
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Read { .. })
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Identity asserted by a credential, `<domain>.<service>`.
///
/// The domain may itself contain dots; the service is the last label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceIdentity {
    domain: String,
    service: String,
}

impl ServiceIdentity {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        let service = service.into();
        if domain.is_empty() || service.is_empty() || service.contains('.') {
            return Err(IdentityError::InvalidIdentity(format!("{}.{}", domain, service)));
        }
        Ok(Self { domain, service })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

impl FromStr for ServiceIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit_once('.') {
            Some((domain, service)) => Self::new(domain, service),
            None => Err(IdentityError::InvalidIdentity(s.to_string())),
        }
    }
}

impl TryFrom<String> for ServiceIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ServiceIdentity> for String {
    fn from(identity: ServiceIdentity) -> Self {
        identity.to_string()
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.service)
    }
}

/// Receiver of renewed credentials.
pub trait CredentialListener: Send + Sync {
    fn on_credentials_update(&self, credential: Credential);
}

/// Fan-out of renewed credentials to every registered listener.
///
/// The identity provider calls [`publish`](Self::publish) from its own
/// delivery task whenever a certificate is renewed.
#[derive(Default)]
pub struct CredentialPublisher {
    listeners: RwLock<Vec<Arc<dyn CredentialListener>>>,
}

impl CredentialPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn CredentialListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn publish(&self, credential: Credential) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        debug!(
            "Publishing credential for {:?} to {} listeners",
            credential.identity().map(ToString::to_string),
            listeners.len()
        );
        for listener in listeners.iter() {
            listener.on_credentials_update(credential.clone());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::TestPki;
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_service_identity_parsing() {
        let identity: ServiceIdentity = "vespa.external.tenant-host".parse().unwrap();
        assert_eq!(identity.domain(), "vespa.external");
        assert_eq!(identity.service(), "tenant-host");
        assert_eq!(identity.to_string(), "vespa.external.tenant-host");

        for invalid in ["", "nodot", ".service", "domain."] {
            assert!(invalid.parse::<ServiceIdentity>().is_err(), "{}", invalid);
        }
    }

    #[test]
    fn test_service_identity_serde() {
        let identity = ServiceIdentity::new("athenz", "node-admin").unwrap();
        let json = serde_json::to_string(&identity).unwrap();
        assert_eq!(json, "\"athenz.node-admin\"");
        assert_eq!(serde_json::from_str::<ServiceIdentity>(&json).unwrap(), identity);
    }

    #[derive(Default)]
    struct Recorder {
        identities: Mutex<Vec<String>>,
    }

    impl CredentialListener for Recorder {
        fn on_credentials_update(&self, credential: Credential) {
            self.identities
                .lock()
                .unwrap()
                .push(credential.identity().unwrap().to_string());
        }
    }

    #[test]
    fn test_publisher_notifies_all_listeners() {
        let pki = TestPki::generate("publisher");
        let publisher = CredentialPublisher::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        publisher.subscribe(first.clone());
        publisher.subscribe(second.clone());

        publisher.publish(pki.credential("domain.one"));
        publisher.publish(pki.credential("domain.two"));

        for recorder in [first, second] {
            assert_eq!(
                *recorder.identities.lock().unwrap(),
                vec!["domain.one".to_string(), "domain.two".to_string()]
            );
        }
    }
}
