//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load PEM certificate chains and private keys
//! - Translate configured version / cipher suite / curve names into a rustls provider
//! - Build the `ServerConfig` used by [`TlsListener`]
//!
//! # Design Decisions
//! - Server preference order is enforced (`ignore_client_order`)
//! - TLS 1.3 suites stay enabled whenever 1.3 is allowed; configured names only reorder them
//! - Go-style suite names are accepted as aliases of the rustls names

mod resolver;
mod stream;

pub use resolver::CertResolver;
pub use stream::{is_handshake_error, HandshakeError, LazyTlsStream, TlsListener};

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider, SupportedKxGroup};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{NamedGroup, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use thiserror::Error;

use crate::config::schema::TlsConfig;

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// TLS setup errors.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to load certificate from file
    #[error("Failed to load certificate from {path}: {reason}")]
    CertificateLoad { path: PathBuf, reason: String },

    /// Failed to load private key from file
    #[error("Failed to load private key from {path}: {reason}")]
    PrivateKeyLoad { path: PathBuf, reason: String },

    #[error("Unknown cipher suite: {0}")]
    UnknownCipherSuite(String),

    #[error("Unknown curve: {0}")]
    UnknownCurve(String),

    #[error("Unsupported minimum TLS version: {0} (expected \"1.2\" or \"1.3\")")]
    UnsupportedVersion(String),

    #[error("No certificates configured")]
    NoCertificates,

    /// rustls rejected the assembled configuration
    #[error("TLS configuration error: {0}")]
    Config(String),
}

impl TlsError {
    pub fn cert_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::CertificateLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn key_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::PrivateKeyLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Read every certificate in a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::cert_load(path, "no certificates found in file"));
    }
    Ok(certs)
}

/// Read the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}

/// Protocol versions allowed for a configured minimum.
pub fn protocol_versions(min_version: &str) -> Option<&'static [&'static SupportedProtocolVersion]> {
    match min_version.trim() {
        "1.2" => Some(rustls::ALL_VERSIONS),
        "1.3" => Some(TLS13_ONLY),
        _ => None,
    }
}

/// Look up a cipher suite by its IANA/rustls name or Go alias.
pub fn cipher_suite(name: &str) -> Option<SupportedCipherSuite> {
    let wanted = normalize_suite_name(name);
    ring::ALL_CIPHER_SUITES.iter().copied().find(|suite| {
        let known = format!("{:?}", suite.suite());
        known == wanted || known == format!("{}_SHA256", wanted)
    })
}

fn normalize_suite_name(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    // TLS 1.3 suites are spelled without the version by IANA and Go.
    match upper.strip_prefix("TLS_") {
        Some(rest) if rest.starts_with("AES_") || rest.starts_with("CHACHA20_") => {
            format!("TLS13_{}", rest)
        }
        _ => upper,
    }
}

/// Look up a key exchange group by curve name (`X25519`, `P-256`, `secp384r1`, `CurveP256`).
pub fn kx_group(name: &str) -> Option<&'static dyn SupportedKxGroup> {
    let normalized: String = name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect();
    let normalized = normalized.strip_prefix("curve").unwrap_or(&normalized);

    let group = match normalized {
        "x25519" => NamedGroup::X25519,
        "p256" | "secp256r1" | "prime256v1" => NamedGroup::secp256r1,
        "p384" | "secp384r1" => NamedGroup::secp384r1,
        _ => return None,
    };
    ring::ALL_KX_GROUPS.iter().copied().find(|g| g.name() == group)
}

/// Build the crypto provider honoring the configured preference lists.
pub fn build_provider(config: &TlsConfig) -> Result<CryptoProvider, TlsError> {
    let base = ring::default_provider();

    let cipher_suites = if config.cipher_suites.is_empty() {
        base.cipher_suites.clone()
    } else {
        let mut suites = Vec::with_capacity(config.cipher_suites.len());
        for name in &config.cipher_suites {
            let suite =
                cipher_suite(name).ok_or_else(|| TlsError::UnknownCipherSuite(name.clone()))?;
            if !suites.contains(&suite) {
                suites.push(suite);
            }
        }
        for suite in base.cipher_suites.iter().copied() {
            if matches!(suite, SupportedCipherSuite::Tls13(_)) && !suites.contains(&suite) {
                suites.push(suite);
            }
        }
        suites
    };

    let kx_groups = if config.curve_preferences.is_empty() {
        base.kx_groups.clone()
    } else {
        config
            .curve_preferences
            .iter()
            .map(|name| kx_group(name).ok_or_else(|| TlsError::UnknownCurve(name.clone())))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(CryptoProvider {
        cipher_suites,
        kx_groups,
        ..base
    })
}

/// Load every configured certificate/key pair into a resolver.
pub fn build_resolver(config: &TlsConfig, provider: &CryptoProvider) -> Result<CertResolver, TlsError> {
    if config.certificates.is_empty() {
        return Err(TlsError::NoCertificates);
    }

    let mut resolver = CertResolver::new();
    for entry in &config.certificates {
        let chain = load_certificates(&entry.cert_path)?;
        let key = load_private_key(&entry.key_path)?;
        let signing_key = provider
            .key_provider
            .load_private_key(key)
            .map_err(|e| TlsError::key_load(&entry.key_path, e.to_string()))?;

        tracing::debug!(
            cert_path = %entry.cert_path.display(),
            server_names = ?entry.server_names,
            "Certificate loaded"
        );
        resolver.add(
            entry.server_names.clone(),
            Arc::new(CertifiedKey::new(chain, signing_key)),
        );
    }
    Ok(resolver)
}

/// Assemble the rustls server configuration from the TLS section.
pub fn build_server_config(config: &TlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let versions = protocol_versions(&config.min_version)
        .ok_or_else(|| TlsError::UnsupportedVersion(config.min_version.clone()))?;
    let provider = build_provider(config)?;
    let resolver = build_resolver(config, &provider)?;

    let mut server_config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));

    server_config.ignore_client_order = true;
    server_config.alpn_protocols = config
        .alpn_protocols
        .iter()
        .map(|p| p.as_bytes().to_vec())
        .collect();

    tracing::info!(
        min_version = %config.min_version,
        certificates = config.certificates.len(),
        alpn = ?config.alpn_protocols,
        "TLS configuration ready"
    );

    Ok(Arc::new(server_config))
}
