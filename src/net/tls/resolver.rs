//! Certificate selection by SNI and signature scheme.

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;

#[derive(Debug)]
struct Entry {
    server_names: Vec<String>,
    key: Arc<CertifiedKey>,
}

impl Entry {
    /// 0 = named for this SNI, 1 = unnamed, 2 = named for something else.
    fn rank(&self, sni: Option<&str>) -> u8 {
        if self.server_names.is_empty() {
            return 1;
        }
        match sni {
            Some(sni) if self.server_names.iter().any(|n| name_matches(n, sni)) => 0,
            _ => 2,
        }
    }
}

fn name_matches(pattern: &str, sni: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let sni = sni.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => sni
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == sni,
    }
}

/// Holds every configured certificate and picks one per handshake.
#[derive(Debug, Default)]
pub struct CertResolver {
    entries: Vec<Entry>,
}

impl CertResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a certificate. Empty `server_names` means "any name".
    pub fn add(&mut self, server_names: Vec<String>, key: Arc<CertifiedKey>) {
        self.entries.push(Entry { server_names, key });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the best certificate for the offered SNI and signature schemes.
    ///
    /// Falls back to the first configured certificate when no key can sign with
    /// any offered scheme; the handshake then fails on the client side.
    pub fn select(&self, sni: Option<&str>, schemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        for tier in 0..=2 {
            let found = self
                .entries
                .iter()
                .filter(|entry| entry.rank(sni) == tier)
                .find(|entry| entry.key.key.choose_scheme(schemes).is_some());
            if let Some(entry) = found {
                return Some(Arc::clone(&entry.key));
            }
        }
        self.entries.first().map(|entry| Arc::clone(&entry.key))
    }
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let selected = self.select(client_hello.server_name(), client_hello.signature_schemes());
        if selected.is_none() {
            tracing::warn!(sni = ?client_hello.server_name(), "No certificate available");
        }
        selected
    }
}
