//! Server certificate trust.
//!
//! # Security
//!
//! [`ServerTrust::InsecureSkipVerify`] accepts any certificate, which is the
//! only way to reach a server using a generated self-signed certificate.
//! Anyone on the network path can impersonate such a server. Use
//! [`ServerTrust::PemRoots`] outside local development.

use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use rustls::{
    DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tickframe_proto::ALPN_PROTOCOL;

use crate::error::TransportError;

/// How the client authenticates the server certificate.
#[derive(Debug, Clone, Default)]
pub enum ServerTrust {
    /// Accept any certificate. Development only.
    #[default]
    InsecureSkipVerify,
    /// Trust the PEM-encoded root certificates given here.
    PemRoots(Vec<u8>),
}

impl ServerTrust {
    pub(crate) fn quic_client_config(&self) -> Result<QuicClientConfig, TransportError> {
        let builder = rustls::ClientConfig::builder();

        let mut crypto = match self {
            Self::InsecureSkipVerify => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
                .with_no_client_auth(),
            Self::PemRoots(pem) => {
                builder.with_root_certificates(root_store(pem)?).with_no_client_auth()
            },
        };

        // Must match server's ALPN protocol
        crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::Config(format!("QUIC config error: {e}")))
    }
}

fn root_store(pem: &[u8]) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        let cert = cert
            .map_err(|e| TransportError::Config(format!("failed to parse root certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| TransportError::Config(format!("invalid root certificate: {e}")))?;
    }

    if roots.is_empty() {
        return Err(TransportError::Config("no root certificates found".to_string()));
    }

    Ok(roots)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
