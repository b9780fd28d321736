//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Check TLS names against what the crypto provider supports
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FrontendConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Certificate files are not opened here; startup reports unreadable files

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::FrontendConfig;
use crate::mux::matcher::HTTP2_PREFACE;
use crate::net::tls;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic rule and collect all failures.
pub fn validate_config(config: &FrontendConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be positive"));
    }

    let mux = &config.mux;
    if mux.max_prefix_bytes < HTTP2_PREFACE.len() {
        errors.push(ValidationError::new(
            "mux.max_prefix_bytes",
            format!("must be at least {} bytes", HTTP2_PREFACE.len()),
        ));
    }
    if mux.match_timeout_ms == 0 {
        errors.push(ValidationError::new("mux.match_timeout_ms", "must be positive"));
    }
    if mux.queue_capacity == 0 {
        errors.push(ValidationError::new("mux.queue_capacity", "must be positive"));
    }

    let tls_config = &config.tls;
    if tls::protocol_versions(&tls_config.min_version).is_none() {
        errors.push(ValidationError::new(
            "tls.min_version",
            format!("unsupported version '{}', expected 1.2 or 1.3", tls_config.min_version),
        ));
    }
    for name in &tls_config.cipher_suites {
        if tls::cipher_suite(name).is_none() {
            errors.push(ValidationError::new(
                "tls.cipher_suites",
                format!("unknown cipher suite '{}'", name),
            ));
        }
    }
    for name in &tls_config.curve_preferences {
        if tls::kx_group(name).is_none() {
            errors.push(ValidationError::new(
                "tls.curve_preferences",
                format!("unknown curve '{}'", name),
            ));
        }
    }
    if tls_config.certificates.is_empty() {
        errors.push(ValidationError::new("tls.certificates", "at least one certificate is required"));
    }
    for (index, protocol) in tls_config.alpn_protocols.iter().enumerate() {
        if protocol.is_empty() || protocol.len() > 255 {
            errors.push(ValidationError::new(
                format!("tls.alpn_protocols[{}]", index),
                "must be 1 to 255 bytes",
            ));
        }
    }

    if config.servers.header_read_timeout_secs == 0 {
        errors.push(ValidationError::new("servers.header_read_timeout_secs", "must be positive"));
    }
    if config.servers.request_timeout_secs == 0 {
        errors.push(ValidationError::new("servers.request_timeout_secs", "must be positive"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
