//! TLS over TCP between the two peers.
//!
//! The receiver terminates TLS with its ephemeral identity; the sender
//! connects under a [`TrustPolicy`]. Both ends pin TLS 1.3 and the same ALPN
//! so the keying material exporter runs on identical protocol state.

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, ServerName};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use super::constants::{ALPN, EXPORTED_SECRET_LEN};
use crate::error::{Result, TransferError};
use crate::identity::SessionIdentity;

/// How the sender decides to trust the receiver's certificate.
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// Accept any certificate. Trust comes from both operators comparing the
    /// verification phrase before any file data moves.
    OutOfBandVerified,
    /// Validate the certificate chain and name against these roots.
    PkiValidated(Arc<RootCertStore>),
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub fn server_config(identity: &SessionIdentity) -> Result<rustls::ServerConfig> {
    let mut config = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(vec![identity.certificate().clone()], identity.private_key())?;
    config.alpn_protocols = vec![ALPN.to_vec()];
    // sessions are never resumed; unread tickets would make the sender's close a reset
    config.send_tls13_tickets = 0;
    Ok(config)
}

pub fn client_config(trust: &TrustPolicy) -> Result<rustls::ClientConfig> {
    let builder = rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?;
    let mut config = match trust {
        TrustPolicy::OutOfBandVerified => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth(),
        TrustPolicy::PkiValidated(roots) => builder
            .with_root_certificates(roots.clone())
            .with_no_client_auth(),
    };
    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

/// An established TLS stream with the peer.
pub struct SecureSession {
    stream: TlsStream<TcpStream>,
    peer: SocketAddr,
}

impl SecureSession {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Export keying material bound to this session (RFC 8446 §7.5). Both
    /// ends of the same session derive identical bytes.
    pub fn export_secret(&self, label: &[u8]) -> Result<[u8; EXPORTED_SECRET_LEN]> {
        let out = [0u8; EXPORTED_SECRET_LEN];
        let exported = match &self.stream {
            TlsStream::Client(s) => s.get_ref().1.export_keying_material(out, label, None),
            TlsStream::Server(s) => s.get_ref().1.export_keying_material(out, label, None),
        };
        exported.map_err(|e| TransferError::Channel(format!("key export failed: {}", e)))
    }
}

impl AsyncRead for SecureSession {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureSession {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Receiver side listening socket. Serves a single connection.
pub struct SecureListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl SecureListener {
    pub async fn bind(addr: SocketAddr, identity: &SessionIdentity) -> Result<Self> {
        let acceptor = TlsAcceptor::from(Arc::new(server_config(identity)?));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransferError::Channel(format!("cannot listen on {}: {}", addr, e)))?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener, acceptor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept exactly one connection and finish its handshake. The listening
    /// socket is closed when this returns, whatever the outcome.
    pub async fn accept_one(self) -> Result<SecureSession> {
        let (tcp, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransferError::Channel(format!("accept failed: {}", e)))?;
        drop(self.listener);
        tracing::info!("Connection from {}", peer);

        let stream = self
            .acceptor
            .accept(tcp)
            .await
            .map_err(|e| TransferError::Channel(format!("TLS handshake with {} failed: {}", peer, e)))?;
        tracing::debug!("TLS handshake with {} complete", peer);

        Ok(SecureSession {
            stream: TlsStream::Server(stream),
            peer,
        })
    }
}

/// Connect to a receiver and complete the TLS handshake.
pub async fn connect(addr: SocketAddr, trust: &TrustPolicy) -> Result<SecureSession> {
    if matches!(trust, TrustPolicy::OutOfBandVerified) {
        tracing::debug!("Receiver certificate will not be validated, trust rests on the phrase");
    }
    let connector = TlsConnector::from(Arc::new(client_config(trust)?));
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| TransferError::Channel(format!("cannot connect to {}: {}", addr, e)))?;
    let server_name = ServerName::from(addr.ip());

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransferError::Channel(format!("TLS handshake with {} failed: {}", addr, e)))?;
    tracing::debug!("TLS handshake with {} complete", addr);

    Ok(SecureSession {
        stream: TlsStream::Client(stream),
        peer: addr,
    })
}

/// Certificate verifier that accepts any server certificate. Signatures are
/// still checked so the handshake proves possession of the presented key.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configs_pin_alpn() {
        let identity = SessionIdentity::for_hosts("localhost").unwrap();
        let server = server_config(&identity).unwrap();
        assert_eq!(server.alpn_protocols, vec![ALPN.to_vec()]);

        let client = client_config(&TrustPolicy::OutOfBandVerified).unwrap();
        assert_eq!(client.alpn_protocols, vec![ALPN.to_vec()]);
    }

    #[test]
    fn test_skip_verifier_offers_ed25519() {
        use rustls::client::danger::ServerCertVerifier;
        let schemes = SkipServerVerification.supported_verify_schemes();
        assert!(schemes.contains(&rustls::SignatureScheme::ED25519));
    }
}
