//! TLS client context for mutual TLS towards the autoscaler
//!
//! Builds a rustls client configuration from PEM material held in memory:
//! the client certificate chain and private key form the client identity,
//! the CA bundle forms the only trust store. Any failure aborts the whole
//! construction so partial trust or key material is never used.

use crate::credentials::MtlsMaterial;
use crate::keys::{self, KeyError};
use rustls::{Certificate, ClientConfig, RootCertStore};
use std::io::BufReader;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("invalid client certificate: {0}")]
    ClientCertificate(String),

    #[error("invalid client private key: {0}")]
    PrivateKey(#[from] KeyError),

    #[error("invalid CA certificate #{index}: {reason}")]
    CaCertificate { index: usize, reason: String },

    #[error("CA bundle contains no certificates")]
    EmptyCaBundle,

    #[error("failed to assemble client identity: {0}")]
    ClientAuth(#[from] rustls::Error),
}

/// Builds TLS client contexts from mTLS credential material
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsTransportFactory;

impl TlsTransportFactory {
    pub fn new() -> Self {
        Self
    }

    /// Build a client config that presents the client certificate and
    /// trusts only the CA bundle
    pub fn build_client_config(&self, material: &MtlsMaterial) -> Result<ClientConfig, TlsError> {
        let chain = parse_client_chain(&material.cert_pem)?;
        let key = keys::decode_private_key(&material.key_pem)?;
        let roots = parse_trust_store(&material.ca_pem)?;

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)?;

        info!("mTLS client context built");
        Ok(config)
    }
}

fn parse_client_chain(pem: &str) -> Result<Vec<Certificate>, TlsError> {
    let mut reader = BufReader::new(pem.as_bytes());
    let ders = rustls_pemfile::certs(&mut reader)
        .map_err(|e| TlsError::ClientCertificate(e.to_string()))?;
    if ders.is_empty() {
        return Err(TlsError::ClientCertificate(
            "no certificate found in PEM".into(),
        ));
    }
    debug!(certificates = ders.len(), "Parsed client certificate chain");
    Ok(ders.into_iter().map(Certificate).collect())
}

fn parse_trust_store(pem: &str) -> Result<RootCertStore, TlsError> {
    let mut reader = BufReader::new(pem.as_bytes());
    let ders = rustls_pemfile::certs(&mut reader).map_err(|e| TlsError::CaCertificate {
        index: 0,
        reason: e.to_string(),
    })?;
    if ders.is_empty() {
        return Err(TlsError::EmptyCaBundle);
    }

    let mut roots = RootCertStore::empty();
    for (index, der) in ders.into_iter().enumerate() {
        roots
            .add(&Certificate(der))
            .map_err(|e| TlsError::CaCertificate {
                index,
                reason: format!("{:?}", e),
            })?;
    }
    debug!(trust_anchors = roots.len(), "Assembled CA trust store");
    Ok(roots)
}
