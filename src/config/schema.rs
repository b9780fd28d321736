//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the frontend.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the TLS frontend.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FrontendConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// TLS termination settings.
    pub tls: TlsConfig,

    /// Protocol matching settings.
    pub mux: MuxConfig,

    /// Settings shared by the demo protocol servers.
    pub servers: ServersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5555").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5555".to_string(),
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Lowest protocol version accepted ("1.2" or "1.3").
    pub min_version: String,

    /// TLS 1.2 cipher suites in server preference order.
    pub cipher_suites: Vec<String>,

    /// Key exchange groups in preference order.
    pub curve_preferences: Vec<String>,

    /// ALPN protocols offered to clients.
    pub alpn_protocols: Vec<String>,

    /// Certificate chains, first entry is the fallback.
    pub certificates: Vec<CertificateConfig>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: "1.2".to_string(),
            cipher_suites: [
                "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
                "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
                "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
                "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            curve_preferences: vec!["P-256".to_string(), "X25519".to_string()],
            alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
            certificates: vec![
                CertificateConfig {
                    cert_path: PathBuf::from("./certs/ecdsacert.pem"),
                    key_path: PathBuf::from("./certs/ecdsakey.pem"),
                    server_names: Vec::new(),
                },
                CertificateConfig {
                    cert_path: PathBuf::from("./certs/rsacert.pem"),
                    key_path: PathBuf::from("./certs/rsakey.pem"),
                    server_names: Vec::new(),
                },
            ],
        }
    }
}

/// One certificate chain and its private key.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// SNI names served by this chain. Empty means any name.
    #[serde(default)]
    pub server_names: Vec<String>,
}

/// Protocol matching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Most bytes inspected before a connection is declared unmatched.
    pub max_prefix_bytes: usize,

    /// Deadline for a connection to be classified, in milliseconds.
    pub match_timeout_ms: u64,

    /// Matched connections queued per sub-listener before matching blocks.
    pub queue_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_prefix_bytes: 4096,
            match_timeout_ms: 10_000,
            queue_capacity: 128,
        }
    }
}

/// Timeouts for the HTTP and gRPC servers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServersConfig {
    /// Time allowed for a client to send request headers, in seconds.
    pub header_read_timeout_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            header_read_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
