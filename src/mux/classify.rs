//! Match pipeline for a single connection.
//!
//! Matchers are evaluated in registration order against a growing window.
//! An earlier matcher that is still undecided blocks later ones from winning,
//! so priority never depends on how the bytes happened to be split into reads.
//! Replies requested by undecided matchers are written before waiting for more.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::mux::matcher::{MatchResult, Matcher};
use crate::mux::peek::PeekableStream;

/// Result of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Index of the winning registration.
    Route(usize),
    /// More bytes are needed before anything can win.
    Pending,
    /// Every candidate has been eliminated.
    Unmatched,
}

/// Candidate set for one connection.
pub struct Classifier<'a> {
    matchers: Vec<&'a dyn Matcher>,
    alive: Vec<bool>,
    replied: Vec<bool>,
}

impl<'a> Classifier<'a> {
    pub fn new(matchers: Vec<&'a dyn Matcher>) -> Self {
        let alive = vec![true; matchers.len()];
        let replied = vec![false; matchers.len()];
        Self {
            matchers,
            alive,
            replied,
        }
    }

    /// Evaluate the remaining candidates against `window`.
    ///
    /// With `final_pass` set no more bytes will arrive, so `NeedMore` counts as `NoMatch`.
    pub fn evaluate(&mut self, window: &[u8], final_pass: bool) -> Verdict {
        let mut blocked = false;
        for (index, matcher) in self.matchers.iter().enumerate() {
            if !self.alive[index] {
                continue;
            }
            match matcher.probe(window) {
                MatchResult::Matched if !blocked => return Verdict::Route(index),
                MatchResult::Matched => {}
                MatchResult::NoMatch => self.alive[index] = false,
                MatchResult::NeedMore if final_pass => self.alive[index] = false,
                MatchResult::NeedMore => blocked = true,
            }
        }

        if self.alive.iter().any(|alive| *alive) {
            Verdict::Pending
        } else {
            Verdict::Unmatched
        }
    }

    /// Replies the remaining candidates want sent for `window`. Each is handed out once.
    pub fn take_replies(&mut self, window: &[u8]) -> Vec<&'a [u8]> {
        let mut replies = Vec::new();
        for (index, &matcher) in self.matchers.iter().enumerate() {
            if !self.alive[index] || self.replied[index] {
                continue;
            }
            if let Some(reply) = matcher.reply(window) {
                self.replied[index] = true;
                replies.push(reply);
            }
        }
        replies
    }

    pub fn remaining(&self) -> usize {
        self.alive.iter().filter(|alive| **alive).count()
    }
}

/// Peek into `stream` until a registration wins, all are eliminated, EOF is
/// reached or `max_prefix` bytes have been inspected.
///
/// Returns the winning index, or `None` for an unmatched connection.
pub async fn classify<S>(
    stream: &mut PeekableStream<S>,
    classifier: &mut Classifier<'_>,
    max_prefix: usize,
) -> io::Result<Option<usize>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let at_limit = stream.peeked().len() >= max_prefix;
        match classifier.evaluate(stream.peeked(), at_limit) {
            Verdict::Route(index) => return Ok(Some(index)),
            Verdict::Unmatched => return Ok(None),
            Verdict::Pending => {}
        }

        let replies = classifier.take_replies(stream.peeked());
        if !replies.is_empty() {
            for reply in replies {
                stream.write_all(reply).await?;
            }
            stream.flush().await?;
        }

        if stream.fill(max_prefix).await? == 0 {
            let verdict = classifier.evaluate(stream.peeked(), true);
            return Ok(match verdict {
                Verdict::Route(index) => Some(index),
                _ => None,
            });
        }
    }
}
