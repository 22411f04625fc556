//! TLS configuration for node sessions.
//!
//! Both sides present their self-signed node certificate. Neither side
//! validates a chain: a peer is identified by the public key of its leaf
//! certificate, and callers compare that against the node id they expect.

use crate::error::FabricError;
use crate::identity::{node_id_of, NodeCredentials, NodeId};
use crate::transport::TransportError;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::sync::Arc;

/// ALPN protocol id of node sessions.
pub const ALPN: &[u8] = b"pan";

/// Server name sent when dialing; never verified.
pub const SERVER_NAME: &str = "pan";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Reject certificates no node id can be derived from.
fn check_leaf(end_entity: &CertificateDer<'_>) -> Result<(), rustls::Error> {
    node_id_of(end_entity.as_ref())
        .map(|_| ())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))
}

/// Requires a client certificate and accepts any that parses.
#[derive(Debug)]
struct AcceptAnyClientCert {
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        check_leaf(end_entity)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any server certificate that parses; handshake signatures are
/// still checked.
#[derive(Debug)]
struct SkipServerVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        check_leaf(end_entity)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Listener configuration: TLS 1.3 only, client certificate required.
pub fn server_config(credentials: &NodeCredentials) -> Result<quinn::ServerConfig, TransportError> {
    let provider = provider();
    let mut tls = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_client_cert_verifier(Arc::new(AcceptAnyClientCert { provider }))
        .with_single_cert(credentials.cert_chain().to_vec(), credentials.private_key())?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = QuicServerConfig::try_from(tls)?;
    Ok(quinn::ServerConfig::with_crypto(Arc::new(crypto)))
}

/// Dialer configuration: TLS 1.3 only, presenting the node certificate.
pub fn client_config(credentials: &NodeCredentials) -> Result<quinn::ClientConfig, TransportError> {
    let provider = provider();
    let mut tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification { provider }))
        .with_client_auth_cert(credentials.cert_chain().to_vec(), credentials.private_key())?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = QuicClientConfig::try_from(tls)?;
    Ok(quinn::ClientConfig::new(Arc::new(crypto)))
}

/// Node id of the certificate the peer presented on `conn`.
pub fn peer_node_id(conn: &quinn::Connection) -> Result<NodeId, FabricError> {
    let identity = conn.peer_identity().ok_or(FabricError::InvalidNode)?;
    let certs = identity
        .downcast::<Vec<CertificateDer<'static>>>()
        .map_err(|_| FabricError::InvalidNode)?;
    let leaf = certs.first().ok_or(FabricError::InvalidNode)?;
    node_id_of(leaf.as_ref()).map_err(|_| FabricError::InvalidNode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{generate, parse};

    fn credentials() -> NodeCredentials {
        let pem = generate().unwrap();
        parse(pem.cert_pem.as_bytes(), pem.key_pem.as_bytes()).unwrap()
    }

    #[test]
    fn test_configs_build_from_node_credentials() {
        let creds = credentials();
        assert!(server_config(&creds).is_ok());
        assert!(client_config(&creds).is_ok());
    }

    #[test]
    fn test_leaf_must_parse() {
        let creds = credentials();
        assert!(check_leaf(&creds.cert_chain()[0]).is_ok());
        let garbage = CertificateDer::from(vec![0x30, 0x03, 0x01, 0x02, 0x03]);
        assert!(check_leaf(&garbage).is_err());
    }
}
