//! TLS socket factory over the current credential.

use crate::identity::{Credential, CredentialListener, IdentityError, Result};
use arc_swap::ArcSwap;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

/// Creates mutual-TLS connections with whichever credential is current.
///
/// Reads are lock-free. Each call snapshots the credential once before doing
/// any I/O; a rotation during the call affects only later calls.
pub struct IdentityTlsConnector {
    current: ArcSwap<Credential>,
}

impl IdentityTlsConnector {
    pub fn new(initial: Credential) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// The credential new connections use right now
    pub fn current(&self) -> Arc<Credential> {
        self.current.load_full()
    }

    /// A connector bound to the current credential
    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.current.load().client_config())
    }

    /// Connect to `host:port` and verify the peer as `host`
    pub async fn connect(&self, host: &str, port: u16) -> Result<TlsStream<TcpStream>> {
        let connector = self.connector();
        let server_name = server_name(host)?;
        let stream = TcpStream::connect((host, port)).await?;
        handshake(connector, server_name, stream).await
    }

    /// Connect to `addr` and verify the peer as `server_name`
    pub async fn connect_addr(&self, addr: SocketAddr, server_name: &str) -> Result<TlsStream<TcpStream>> {
        let connector = self.connector();
        let server_name = self::server_name(server_name)?;
        let stream = TcpStream::connect(addr).await?;
        handshake(connector, server_name, stream).await
    }

    /// Connect to `host:port` from the local address `local`
    pub async fn connect_with_local(
        &self,
        host: &str,
        port: u16,
        local: SocketAddr,
    ) -> Result<TlsStream<TcpStream>> {
        let connector = self.connector();
        let server_name = server_name(host)?;

        let remote = tokio::net::lookup_host((host, port))
            .await?
            .find(|addr| addr.is_ipv4() == local.is_ipv4())
            .ok_or_else(|| {
                IdentityError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no address of {} matches local address {}", host, local),
                ))
            })?;

        let socket = if local.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(local)?;
        let stream = socket.connect(remote).await?;
        handshake(connector, server_name, stream).await
    }

    /// Layer TLS over an already connected stream
    pub async fn wrap<S>(&self, stream: S, server_name: &str) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let connector = self.connector();
        handshake(connector, self::server_name(server_name)?, stream).await
    }

    /// Cipher suites enabled by the current credential
    pub fn default_cipher_suites(&self) -> Vec<String> {
        self.current.load().cipher_suites()
    }

    /// All cipher suites the TLS implementation supports
    pub fn supported_cipher_suites(&self) -> Vec<String> {
        rustls::crypto::ring::ALL_CIPHER_SUITES
            .iter()
            .map(|suite| format!("{:?}", suite.suite()))
            .collect()
    }
}

impl CredentialListener for IdentityTlsConnector {
    fn on_credentials_update(&self, credential: Credential) {
        let identity = credential.identity().map(ToString::to_string);
        self.current.store(Arc::new(credential));
        info!("Switched to renewed credential for {:?}", identity);
    }
}

fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|_| IdentityError::InvalidServerName(name.to_string()))
}

async fn handshake<S>(connector: TlsConnector, server_name: ServerName<'static>, stream: S) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Starting TLS handshake with {:?}", server_name);
    Ok(connector.connect(server_name, stream).await?)
}
