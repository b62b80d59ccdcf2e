//! TLS material for the QUIC endpoint.
//!
//! Certificates are configuration input. The server accepts a PEM blob in
//! memory or a pair of PEM files. A self-signed certificate can be generated
//! for local development only: clients cannot authenticate it, so anyone on
//! the path can impersonate the server.

use std::{fmt, fs};

use quinn::crypto::rustls::QuicServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tickframe_proto::ALPN_PROTOCOL;

use crate::error::ServerError;

/// Source of the server certificate chain and private key.
#[derive(Clone)]
pub enum TlsMaterial {
    /// Generate a throwaway self-signed certificate at startup.
    SelfSigned {
        /// DNS names the certificate is issued for
        subject_alt_names: Vec<String>,
    },
    /// PEM-encoded certificate chain and private key held in memory.
    Pem {
        /// One or more `CERTIFICATE` blocks, leaf first
        cert_chain: Vec<u8>,
        /// A PKCS#8, PKCS#1 or SEC1 private key block
        private_key: Vec<u8>,
    },
    /// PEM files read at startup.
    PemFiles {
        /// Path to the certificate chain
        cert_path: String,
        /// Path to the private key
        key_path: String,
    },
}

impl Default for TlsMaterial {
    fn default() -> Self {
        Self::SelfSigned { subject_alt_names: vec!["localhost".to_string()] }
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfSigned { subject_alt_names } => {
                f.debug_struct("SelfSigned").field("subject_alt_names", subject_alt_names).finish()
            },
            Self::Pem { cert_chain, .. } => f
                .debug_struct("Pem")
                .field("cert_chain", &format_args!("{} bytes", cert_chain.len()))
                .field("private_key", &"<redacted>")
                .finish(),
            Self::PemFiles { cert_path, key_path } => f
                .debug_struct("PemFiles")
                .field("cert_path", cert_path)
                .field("key_path", key_path)
                .finish(),
        }
    }
}

impl TlsMaterial {
    /// Use PEM files when both paths are given, otherwise a self-signed
    /// certificate for `localhost`.
    pub fn from_paths(cert_path: Option<String>, key_path: Option<String>) -> Self {
        match (cert_path, key_path) {
            (Some(cert_path), Some(key_path)) => Self::PemFiles { cert_path, key_path },
            _ => Self::default(),
        }
    }

    /// Whether this material is a development-only self-signed certificate.
    pub fn is_self_signed(&self) -> bool {
        matches!(self, Self::SelfSigned { .. })
    }

    /// Build the QUIC server crypto configuration.
    pub(crate) fn quic_server_config(&self) -> Result<QuicServerConfig, ServerError> {
        let (certs, key) = match self {
            Self::SelfSigned { subject_alt_names } => generate_self_signed(subject_alt_names)?,
            Self::Pem { cert_chain, private_key } => parse_pem(cert_chain, private_key)?,
            Self::PemFiles { cert_path, key_path } => {
                let cert_pem = fs::read(cert_path).map_err(|e| {
                    ServerError::Config(format!("failed to read cert '{cert_path}': {e}"))
                })?;
                let key_pem = fs::read(key_path).map_err(|e| {
                    ServerError::Config(format!("failed to read key '{key_path}': {e}"))
                })?;
                parse_pem(&cert_pem, &key_pem)?
            },
        };

        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

        tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        QuicServerConfig::try_from(tls_config)
            .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))
    }
}

type CertifiedKey = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn parse_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey, ServerError> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    if certs.is_empty() {
        return Err(ServerError::Config("no certificates found".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    Ok((certs, key))
}

fn generate_self_signed(subject_alt_names: &[String]) -> Result<CertifiedKey, ServerError> {
    let cert = rcgen::generate_simple_self_signed(subject_alt_names.to_vec())
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    tracing::warn!("Using self-signed certificate - not for production use!");

    Ok((vec![cert_der], key_der.into()))
}
