//! SparkPost wire types.
//!
//! Inbound relay webhooks, the transmission request, and the two
//! provisioning resources (relay webhooks, inbound domains). Only the fields
//! this service reads or writes are modelled.

use serde::{Deserialize, Serialize};

/// Name given to every relay webhook this service registers.
pub const WEBHOOK_NAME: &str = "Forwarding Service";

/// Protocol bound to every relay webhook this service registers.
pub const WEBHOOK_PROTOCOL: &str = "SMTP";

// =============================================================================
// Relay webhook payload (POST /message)
// =============================================================================

/// One record of a relay webhook batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    pub msys: Msys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msys {
    pub relay_message: RelayEnvelope,
}

/// Relay envelope; SparkPost also sends `rcpt_to`, `msg_from` and friends,
/// which are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub content: RelayContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayContent {
    /// Full RFC 822 text of the received message
    pub email_rfc822: String,
}

// =============================================================================
// Responses
// =============================================================================

/// Standard `{"results": ...}` wrapper around SparkPost responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResults<T> {
    pub results: T,
}

// =============================================================================
// Transmissions
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Transmission<'a> {
    pub recipients: Vec<Recipient<'a>>,
    pub content: TransmissionContent<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipient<'a> {
    pub address: Address<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Address<'a> {
    pub email: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransmissionContent<'a> {
    pub email_rfc822: &'a str,
}

impl<'a> Transmission<'a> {
    /// A single-recipient transmission of a raw RFC 822 message.
    pub fn rfc822(recipient: &'a str, email_rfc822: &'a str) -> Self {
        Self {
            recipients: vec![Recipient {
                address: Address { email: recipient },
            }],
            content: TransmissionContent { email_rfc822 },
        }
    }
}

/// Result block of an accepted transmission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransmissionResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_accepted_recipients: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rejected_recipients: Option<u64>,
}

// =============================================================================
// Relay webhooks and inbound domains
// =============================================================================

/// An existing relay webhook registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayWebhook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub target: String,
    #[serde(rename = "match")]
    pub match_: WebhookMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub domain: String,
}

/// Body of `POST relay-webhooks`.
#[derive(Debug, Clone, Serialize)]
pub struct NewRelayWebhook<'a> {
    pub name: &'a str,
    pub target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<&'a str>,
    #[serde(rename = "match")]
    pub match_: NewWebhookMatch<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewWebhookMatch<'a> {
    pub protocol: &'a str,
    pub domain: &'a str,
}

/// Body of `POST inbound-domains`.
#[derive(Debug, Clone, Serialize)]
pub struct NewInboundDomain<'a> {
    pub domain: &'a str,
}
