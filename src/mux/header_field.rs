//! HTTP/2 matcher on a request header field.
//!
//! Walks the frames that follow the connection preface up to the first complete
//! header block, decodes it with HPACK and looks for one field. This is how gRPC
//! (`content-type: application/grpc`) is told apart from other HTTP/2 traffic.
//!
//! Some clients hold their HEADERS until the server's SETTINGS arrive. For those,
//! [`Http2HeaderField::send_settings`] makes the matcher answer the preface with an
//! empty SETTINGS frame. The downstream server's own SETTINGS follow later, so the
//! client sends two acknowledgements, which servers built on the `h2` crate reject.
//! Leave it off when the consumer is tonic or hyper.

use crate::mux::matcher::{MatchResult, Matcher, HTTP2_PREFACE};

/// A SETTINGS frame with no parameters on stream 0.
pub const EMPTY_SETTINGS: &[u8] = &[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];

const FRAME_HEADER_LEN: usize = 9;

const FRAME_HEADERS: u8 = 0x1;
const FRAME_GOAWAY: u8 = 0x7;
const FRAME_CONTINUATION: u8 = 0x9;

const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expected {
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
}

/// Matches HTTP/2 connections whose first request carries a given header field.
#[derive(Debug, Clone)]
pub struct Http2HeaderField {
    field: Vec<u8>,
    expected: Expected,
    send_settings: bool,
}

impl Http2HeaderField {
    /// Field `name` must equal `value`.
    pub fn new(name: &str, value: impl Into<Vec<u8>>) -> Self {
        Self::with_expected(name, Expected::Exact(value.into()))
    }

    /// Field `name` must start with `prefix`.
    pub fn prefix(name: &str, prefix: impl Into<Vec<u8>>) -> Self {
        Self::with_expected(name, Expected::Prefix(prefix.into()))
    }

    /// gRPC requests, including `application/grpc+proto` and similar subtypes.
    pub fn grpc() -> Self {
        Self::prefix("content-type", "application/grpc")
    }

    /// Answer the preface with [`EMPTY_SETTINGS`] while waiting for the headers.
    pub fn send_settings(mut self) -> Self {
        self.send_settings = true;
        self
    }

    fn with_expected(name: &str, expected: Expected) -> Self {
        Self {
            // HTTP/2 field names are always lowercase on the wire.
            field: name.to_ascii_lowercase().into_bytes(),
            expected,
            send_settings: false,
        }
    }

    fn value_matches(&self, value: &[u8]) -> bool {
        match &self.expected {
            Expected::Exact(expected) => value == expected.as_slice(),
            Expected::Prefix(prefix) => value.starts_with(prefix),
        }
    }
}

impl Matcher for Http2HeaderField {
    fn name(&self) -> &str {
        "http2_header"
    }

    fn probe(&self, prefix: &[u8]) -> MatchResult {
        if prefix.len() < HTTP2_PREFACE.len() {
            return if HTTP2_PREFACE.starts_with(prefix) {
                MatchResult::NeedMore
            } else {
                MatchResult::NoMatch
            };
        }
        if !prefix.starts_with(HTTP2_PREFACE) {
            return MatchResult::NoMatch;
        }

        let block = match first_header_block(&prefix[HTTP2_PREFACE.len()..]) {
            HeaderBlock::Incomplete => return MatchResult::NeedMore,
            HeaderBlock::Invalid => return MatchResult::NoMatch,
            HeaderBlock::Complete(block) => block,
        };

        let mut decoder = hpack::Decoder::new();
        match decoder.decode(&block) {
            Ok(headers) => {
                let found = headers
                    .iter()
                    .any(|(name, value)| *name == self.field && self.value_matches(value));
                if found {
                    MatchResult::Matched
                } else {
                    MatchResult::NoMatch
                }
            }
            Err(e) => {
                tracing::trace!(error = ?e, "HPACK decoding failed");
                MatchResult::NoMatch
            }
        }
    }

    fn reply(&self, window: &[u8]) -> Option<&[u8]> {
        (self.send_settings && window.starts_with(HTTP2_PREFACE)).then_some(EMPTY_SETTINGS)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HeaderBlock {
    /// The first header block has not fully arrived.
    Incomplete,
    /// The frames cannot start a request.
    Invalid,
    /// HPACK-encoded field block, padding and priority removed.
    Complete(Vec<u8>),
}

/// Collect the first header block from the frames after the preface.
///
/// Frames before it (SETTINGS, WINDOW_UPDATE, PRIORITY, PING) are skipped. Once a
/// HEADERS frame without END_HEADERS is seen, only CONTINUATION frames on the same
/// stream may follow.
fn first_header_block(mut frames: &[u8]) -> HeaderBlock {
    let mut pending: Option<(u32, Vec<u8>)> = None;

    loop {
        if frames.len() < FRAME_HEADER_LEN {
            return HeaderBlock::Incomplete;
        }
        let length = u32::from_be_bytes([0, frames[0], frames[1], frames[2]]) as usize;
        let kind = frames[3];
        let flags = frames[4];
        let stream_id = u32::from_be_bytes([frames[5], frames[6], frames[7], frames[8]]) & 0x7fff_ffff;

        let Some(payload) = frames.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + length) else {
            return HeaderBlock::Incomplete;
        };
        frames = &frames[FRAME_HEADER_LEN + length..];

        if let Some((id, block)) = pending.as_mut() {
            if kind != FRAME_CONTINUATION || *id != stream_id {
                return HeaderBlock::Invalid;
            }
            block.extend_from_slice(payload);
            if flags & FLAG_END_HEADERS != 0 {
                return HeaderBlock::Complete(std::mem::take(block));
            }
            continue;
        }

        match kind {
            FRAME_HEADERS => {
                let Some(fragment) = header_fragment(payload, flags) else {
                    return HeaderBlock::Invalid;
                };
                if flags & FLAG_END_HEADERS != 0 {
                    return HeaderBlock::Complete(fragment.to_vec());
                }
                pending = Some((stream_id, fragment.to_vec()));
            }
            FRAME_GOAWAY | FRAME_CONTINUATION => return HeaderBlock::Invalid,
            _ => {}
        }
    }
}

fn header_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut body = payload;
    let mut padding = 0;
    if flags & FLAG_PADDED != 0 {
        let (&pad, rest) = body.split_first()?;
        padding = usize::from(pad);
        body = rest;
    }
    if flags & FLAG_PRIORITY != 0 {
        // Stream dependency (4 bytes) and weight (1 byte).
        body = body.get(5..)?;
    }
    body.get(..body.len().checked_sub(padding)?)
}
