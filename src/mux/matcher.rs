//! Protocol matchers.
//!
//! # Responsibilities
//! - Classify a connection prefix as matched, not matched, or undecided
//! - Provide the stock matchers: fixed prefix, HTTP/2 preface, HTTP/1 method,
//!   HTTP/1 request line, TLS record, catch-all
//!   (the HTTP/2 header field matcher lives in `header_field.rs`)
//!
//! # Design Decisions
//! - Matchers are pure functions of the prefix; no per-connection state
//! - A matcher may ask for a reply to the client; the classifier owns the once-only bookkeeping
//! - `NeedMore` is only returned while more bytes could still change the answer
//! - A line scan that runs past its limit is `NoMatch`, never an error

use std::fmt;

/// The HTTP/2 client connection preface.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default bound for line-based scans.
pub const DEFAULT_LINE_SCAN_LIMIT: usize = 4096;

const HTTP1_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

/// Verdict of one matcher on one prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Matched,
    NoMatch,
    /// The prefix is consistent with the protocol but too short to be sure.
    NeedMore,
}

/// Trait for classifying connections by their first bytes.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Inspect the bytes received so far.
    fn probe(&self, prefix: &[u8]) -> MatchResult;

    /// Bytes to send the client while this matcher is still undecided on `window`.
    ///
    /// For protocols where the client waits for the server before it sends what the
    /// matcher needs. Written at most once per connection.
    fn reply(&self, _window: &[u8]) -> Option<&[u8]> {
        None
    }
}

impl<M: Matcher + ?Sized> Matcher for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn probe(&self, prefix: &[u8]) -> MatchResult {
        (**self).probe(prefix)
    }

    fn reply(&self, window: &[u8]) -> Option<&[u8]> {
        (**self).reply(window)
    }
}

/// Matches connections starting with a fixed byte sequence.
#[derive(Debug, Clone)]
pub struct Prefix {
    name: String,
    expected: Vec<u8>,
}

impl Prefix {
    pub fn new(name: impl Into<String>, expected: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            expected: expected.into(),
        }
    }
}

impl Matcher for Prefix {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self, prefix: &[u8]) -> MatchResult {
        probe_literal(&self.expected, prefix)
    }
}

fn probe_literal(expected: &[u8], prefix: &[u8]) -> MatchResult {
    if prefix.len() >= expected.len() {
        if prefix.starts_with(expected) {
            MatchResult::Matched
        } else {
            MatchResult::NoMatch
        }
    } else if expected.starts_with(prefix) {
        MatchResult::NeedMore
    } else {
        MatchResult::NoMatch
    }
}

/// Matches the 24-byte HTTP/2 connection preface (gRPC, h2 prior knowledge).
pub fn http2() -> Prefix {
    Prefix::new("http2", HTTP2_PREFACE)
}

/// Matches an HTTP/1 request by its method token alone.
///
/// Only the first `METHOD ` bytes are needed, so this decides faster than [`Http1`].
#[derive(Debug, Clone, Default)]
pub struct Http1Fast;

impl Http1Fast {
    pub fn new() -> Self {
        Self
    }
}

impl Matcher for Http1Fast {
    fn name(&self) -> &str {
        "http1_fast"
    }

    fn probe(&self, prefix: &[u8]) -> MatchResult {
        let mut pending = false;
        for method in HTTP1_METHODS {
            match probe_method(method.as_bytes(), prefix) {
                MatchResult::Matched => return MatchResult::Matched,
                MatchResult::NeedMore => pending = true,
                MatchResult::NoMatch => {}
            }
        }
        if pending {
            MatchResult::NeedMore
        } else {
            MatchResult::NoMatch
        }
    }
}

fn probe_method(method: &[u8], prefix: &[u8]) -> MatchResult {
    let head = &prefix[..prefix.len().min(method.len())];
    if !method.starts_with(head) {
        return MatchResult::NoMatch;
    }
    match prefix.get(method.len()) {
        None => MatchResult::NeedMore,
        Some(b' ') => MatchResult::Matched,
        Some(_) => MatchResult::NoMatch,
    }
}

/// Matches a complete HTTP/1.x request line (`METHOD SP target SP HTTP/1.x`).
#[derive(Debug, Clone)]
pub struct Http1 {
    scan_limit: usize,
}

impl Http1 {
    pub fn new() -> Self {
        Self::with_scan_limit(DEFAULT_LINE_SCAN_LIMIT)
    }

    pub fn with_scan_limit(scan_limit: usize) -> Self {
        Self { scan_limit }
    }
}

impl Default for Http1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for Http1 {
    fn name(&self) -> &str {
        "http1"
    }

    fn probe(&self, prefix: &[u8]) -> MatchResult {
        // Request lines start with an uppercase token; bail out early otherwise.
        if let Some(first) = prefix.first() {
            if !first.is_ascii_uppercase() {
                return MatchResult::NoMatch;
            }
        }

        let window = &prefix[..prefix.len().min(self.scan_limit)];
        let Some(end) = window.iter().position(|b| *b == b'\n') else {
            return if prefix.len() >= self.scan_limit {
                MatchResult::NoMatch
            } else {
                MatchResult::NeedMore
            };
        };

        let line = &window[..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let mut parts = line.split(|b| *b == b' ');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version), None)
                if !method.is_empty() && !target.is_empty() && version.starts_with(b"HTTP/1.") =>
            {
                MatchResult::Matched
            }
            _ => MatchResult::NoMatch,
        }
    }
}

/// Matches a TLS handshake record header (SSL 3.0 through TLS 1.3 record versions).
#[derive(Debug, Clone, Default)]
pub struct Tls;

impl Matcher for Tls {
    fn name(&self) -> &str {
        "tls"
    }

    fn probe(&self, prefix: &[u8]) -> MatchResult {
        const HANDSHAKE: u8 = 0x16;
        match prefix {
            [] => MatchResult::NeedMore,
            [HANDSHAKE] | [HANDSHAKE, 0x03] => MatchResult::NeedMore,
            [HANDSHAKE, 0x03, minor, ..] if *minor <= 0x04 => MatchResult::Matched,
            _ => MatchResult::NoMatch,
        }
    }
}

/// Matches every connection, including ones that send nothing.
#[derive(Debug, Clone, Default)]
pub struct Any;

impl Matcher for Any {
    fn name(&self) -> &str {
        "any"
    }

    fn probe(&self, _prefix: &[u8]) -> MatchResult {
        MatchResult::Matched
    }
}

/// Matcher backed by a closure.
pub struct FnMatcher<F> {
    name: String,
    probe: F,
}

impl<F> fmt::Debug for FnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMatcher").field("name", &self.name).finish()
    }
}

impl<F> Matcher for FnMatcher<F>
where
    F: Fn(&[u8]) -> MatchResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self, prefix: &[u8]) -> MatchResult {
        (self.probe)(prefix)
    }
}

/// Build a matcher from a closure.
pub fn from_fn<F>(name: impl Into<String>, probe: F) -> FnMatcher<F>
where
    F: Fn(&[u8]) -> MatchResult + Send + Sync,
{
    FnMatcher {
        name: name.into(),
        probe,
    }
}
