//! The unit of work carried by the Relay Queue.
//!
//! A [`RelayMessage`] is the full RFC 822 text of an inbound email with its
//! sender already rewritten to the configured forwarding address. The only
//! public way to build one is [`RelayMessage::rewrite`], so nothing
//! downstream of ingestion ever sees an un-rewritten sender.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// First `From: ...` header line. CRLF mode keeps a trailing `\r` out of the
/// match so Windows line endings survive the rewrite.
static FROM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mR)^From: .*$").expect("From: pattern must compile"));

/// Raw email text ready for retransmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage(String);

impl RelayMessage {
    /// Replace the first `From:` line of `raw_email` with `From: <forward_from>`.
    ///
    /// Later `From:` lines and every other byte of the message are left
    /// untouched. A message without a `From:` line passes through unchanged.
    pub fn rewrite(raw_email: &str, forward_from: &str) -> Self {
        let replacement = format!("From: {}", forward_from);
        Self(
            FROM_LINE
                .replacen(raw_email, 1, NoExpand(&replacement))
                .into_owned(),
        )
    }

    /// Rebuild a message that was rewritten before it went on the wire.
    pub(crate) fn from_wire(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Size in bytes, for logging.
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}
