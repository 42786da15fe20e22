//! DNS plumbing for DNS-01 challenges
//!
//! Two seams are defined here:
//!
//! - [`DnsConfigurator`] publishes and removes `_acme-challenge` TXT records
//!   at the domain's DNS provider.
//! - [`DnsQuery`] / [`DnsQueryFactory`] look records up, either through the
//!   system resolver or directly against a domain's authoritative servers, so
//!   the engine can tell when a record has propagated.

pub mod resolver;
pub mod webhook;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use resolver::HickoryQueryFactory;
pub use webhook::WebhookConfigurator;

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsError>;

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// Recommended TTL for challenge records (60 seconds)
pub const CHALLENGE_TTL: u32 = 60;

/// Errors raised by DNS configurators and queries
#[derive(Debug, Error)]
pub enum DnsError {
    /// Authentication failed with the DNS provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Record creation failed
    #[error("Failed to create TXT record '{name}': {message}")]
    RecordCreation { name: String, message: String },

    /// Record deletion failed
    #[error("Failed to delete TXT record '{name}': {message}")]
    RecordDeletion { name: String, message: String },

    /// API request failed
    #[error("API request failed: {0}")]
    Request(String),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// A lookup failed for a reason other than "no such records"
    #[error("DNS lookup failed for '{name}': {message}")]
    Lookup { name: String, message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl DnsError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DnsError::Authentication(_) => "dns_authentication",
            DnsError::RecordCreation { .. } => "dns_record_creation",
            DnsError::RecordDeletion { .. } => "dns_record_deletion",
            DnsError::Request(_) => "dns_request",
            DnsError::Timeout => "dns_timeout",
            DnsError::Lookup { .. } => "dns_lookup",
            DnsError::Configuration(_) => "dns_configuration",
        }
    }
}

/// A TXT record as seen by a resolver
///
/// `value` is in presentation format: every character-string is quoted and
/// strings are separated by a single space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub name: String,
    pub value: String,
}

impl TxtRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Publishes TXT records at a DNS provider
///
/// Records are identified by their absolute name and value, so deleting a
/// record removes exactly the value that was created.
#[async_trait]
pub trait DnsConfigurator: Send + Sync + Debug {
    /// Provider name (e.g. "webhook")
    fn name(&self) -> &'static str;

    /// Create a TXT record `name` with `value`
    async fn create_txt_record(&self, name: &str, value: &str) -> DnsResult<()>;

    /// Delete the TXT record `name` with `value`
    ///
    /// Deleting a record that no longer exists is not an error.
    async fn delete_txt_record(&self, name: &str, value: &str) -> DnsResult<()>;
}

/// Looks up records needed to verify challenge propagation
///
/// Names are absolute (ending with `.`). An empty answer is an empty list,
/// never an error.
#[async_trait]
pub trait DnsQuery: Send + Sync + Debug {
    /// Host names of the servers authoritative for `domain`
    async fn find_authoritative_name_servers(&self, domain: &str) -> DnsResult<Vec<String>>;

    /// TXT records published at `domain`
    async fn find_txt_records(&self, domain: &str) -> DnsResult<Vec<TxtRecord>>;
}

/// Creates [`DnsQuery`] instances
#[async_trait]
pub trait DnsQueryFactory: Send + Sync + Debug {
    /// Create a query bound to `nameservers` (host names), or to the system
    /// resolver when the list is empty
    async fn create(&self, nameservers: &[String]) -> DnsResult<Arc<dyn DnsQuery>>;
}

/// Strip the wildcard label, if any
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// Absolute challenge record name for `domain`
///
/// `example.com` and `*.example.com` both map to
/// `_acme-challenge.example.com.`
pub fn challenge_record_name(domain: &str) -> String {
    let normalized = normalize_domain(domain).trim_end_matches('.');
    format!("{}.{}.", ACME_CHALLENGE_RECORD, normalized)
}

/// Render TXT character-strings in presentation format
pub fn txt_presentation<'a>(strings: impl IntoIterator<Item = &'a [u8]>) -> String {
    strings
        .into_iter()
        .map(|s| format!("\"{}\"", String::from_utf8_lossy(s)))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_record_name() {
        assert_eq!(
            challenge_record_name("example.com"),
            "_acme-challenge.example.com."
        );
        assert_eq!(
            challenge_record_name("*.example.com"),
            "_acme-challenge.example.com."
        );
        assert_eq!(
            challenge_record_name("sub.example.com."),
            "_acme-challenge.sub.example.com."
        );
    }

    #[test]
    fn test_txt_presentation() {
        assert_eq!(txt_presentation([b"abc".as_slice()]), "\"abc\"");
        assert_eq!(
            txt_presentation([b"part1".as_slice(), b"part2".as_slice()]),
            "\"part1\" \"part2\""
        );
        assert_eq!(txt_presentation(std::iter::empty::<&[u8]>()), "");
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(DnsError::Timeout.as_label(), "dns_timeout");
        assert_eq!(
            DnsError::RecordCreation {
                name: "x".into(),
                message: "y".into()
            }
            .as_label(),
            "dns_record_creation"
        );
    }
}
