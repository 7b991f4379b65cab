//! Autoscaler connection parameters and mTLS credential material
//!
//! Provides:
//! - The autoscaler endpoint with its derived authentication mode
//! - The mTLS credential (client certificate, key and CA bundle) and its
//!   loading from files and from the Cloud Foundry instance environment

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Transport used to reach the autoscaler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Basic,
    Mtls,
    None,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Basic => write!(f, "basic"),
            AuthMode::Mtls => write!(f, "mtls"),
            AuthMode::None => write!(f, "none"),
        }
    }
}

/// Autoscaler custom-metrics endpoint as published in the service binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerEndpoint {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub mtls_url: Option<String>,
}

impl AutoscalerEndpoint {
    pub fn basic(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            username: Some(username.into()),
            password: Some(password.into()),
            mtls_url: None,
        }
    }

    pub fn mtls(mtls_url: impl Into<String>) -> Self {
        Self {
            mtls_url: Some(mtls_url.into()),
            ..Default::default()
        }
    }

    /// Basic auth needs url, username and password
    pub fn is_basic_auth_configured(&self) -> bool {
        self.url.is_some() && self.username.is_some() && self.password.is_some()
    }

    pub fn is_mtls_configured(&self) -> bool {
        self.mtls_url.is_some()
    }

    /// Basic wins over mTLS when both are configured
    pub fn auth_mode(&self) -> AuthMode {
        if self.is_basic_auth_configured() {
            AuthMode::Basic
        } else if self.is_mtls_configured() {
            AuthMode::Mtls
        } else {
            AuthMode::None
        }
    }

    /// Base URL for the resolved auth mode
    pub fn base_url(&self) -> Option<&str> {
        match self.auth_mode() {
            AuthMode::Basic => self.url.as_deref(),
            AuthMode::Mtls => self.mtls_url.as_deref(),
            AuthMode::None => None,
        }
    }
}

/// PEM texts needed to authenticate with a client certificate
#[derive(Clone, PartialEq, Eq)]
pub struct MtlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: String,
}

impl std::fmt::Debug for MtlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtlsMaterial")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &format_args!("{} bytes", self.ca_pem.len()))
            .finish()
    }
}

/// Client certificate credential; either complete or the invalid marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtlsCredential {
    Valid(MtlsMaterial),
    Invalid,
}

impl MtlsCredential {
    /// Build a credential, collapsing to [`MtlsCredential::Invalid`] unless
    /// every part is present and non-blank
    pub fn new(cert_pem: Option<String>, key_pem: Option<String>, ca_pem: Option<String>) -> Self {
        match (cert_pem, key_pem, ca_pem) {
            (Some(cert_pem), Some(key_pem), Some(ca_pem))
                if !cert_pem.trim().is_empty()
                    && !key_pem.trim().is_empty()
                    && !ca_pem.trim().is_empty() =>
            {
                MtlsCredential::Valid(MtlsMaterial {
                    cert_pem,
                    key_pem,
                    ca_pem,
                })
            }
            _ => MtlsCredential::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, MtlsCredential::Valid(_))
    }

    pub fn material(&self) -> Option<&MtlsMaterial> {
        match self {
            MtlsCredential::Valid(material) => Some(material),
            MtlsCredential::Invalid => None,
        }
    }

    /// Read key, certificate and CA files once; CA files are concatenated
    /// in the given order. Unreadable files leave that part missing.
    pub fn from_files(key_file: &Path, cert_file: &Path, ca_files: &[PathBuf]) -> Self {
        let key = read_file(key_file);
        let cert = read_file(cert_file);

        let mut ca = String::new();
        for ca_file in ca_files {
            if let Some(content) = read_file(ca_file) {
                ca.push_str(&content);
                if !content.ends_with('\n') {
                    ca.push('\n');
                }
            }
        }
        let ca = if ca.is_empty() { None } else { Some(ca) };

        Self::new(cert, key, ca)
    }

    /// Load the credential from the Cloud Foundry instance identity:
    /// certificate and key file paths plus a directory of `*.crt` CA files
    pub fn from_instance_paths(
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
        ca_dir: Option<&Path>,
    ) -> Self {
        let Some(ca_dir) = ca_dir else {
            error!("CA certificate directory is not configured");
            return MtlsCredential::Invalid;
        };
        let Some(cert_path) = cert_path else {
            error!("Instance certificate path is not configured");
            return MtlsCredential::Invalid;
        };
        let Some(key_path) = key_path else {
            error!("Instance key path is not configured");
            return MtlsCredential::Invalid;
        };

        let ca_files = list_crt_files(ca_dir);
        if ca_files.is_empty() {
            error!(dir = %ca_dir.display(), "No CA certificates (*.crt files) found");
            return MtlsCredential::Invalid;
        }

        Self::from_files(key_path, cert_path, &ca_files)
    }
}

/// All `*.crt` files directly inside `dir`, sorted by name
pub fn list_crt_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        error!(dir = %dir.display(), "Certificate path is not a directory");
        return Vec::new();
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Cannot list certificate files");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "crt"))
        .collect();
    files.sort();
    debug!(dir = %dir.display(), count = files.len(), "Found CA certificate files");
    files
}

fn read_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read credential file");
            None
        }
    }
}
