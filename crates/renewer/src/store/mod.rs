//! Persistent storage of issued certificates
//!
//! A stored certificate is identified by `(domain, name)`. `put` upserts,
//! `delete` reports whether anything was removed.

pub mod filesystem;
pub mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by certificate stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data is present but unusable
    #[error("Corrupt store entry for {domain}/{name}: {message}")]
    Corrupt {
        domain: String,
        name: String,
        message: String,
    },
}

impl StoreError {
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "store_io",
            StoreError::Serialization(_) => "store_serialization",
            StoreError::Corrupt { .. } => "store_corrupt",
        }
    }
}

/// An issued certificate as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCertificate {
    pub domain: String,
    pub name: String,
    pub created_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
    /// PEM leaf certificate
    pub certificate: String,
    /// PEM full chain, leaf first
    pub chain: String,
}

impl StoredCertificate {
    /// Whether the certificate expires within `threshold` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.expires_on - now <= threshold
    }
}

/// Certificate persistence
#[async_trait]
pub trait CertificateStore: Send + Sync + Debug {
    /// Insert or replace the certificate identified by `(domain, name)`
    async fn put(&self, certificate: StoredCertificate) -> StoreResult<()>;

    /// Look up a certificate
    async fn find(&self, domain: &str, name: &str) -> StoreResult<Option<StoredCertificate>>;

    /// Remove a certificate, returning whether one existed
    async fn delete(&self, domain: &str, name: &str) -> StoreResult<bool>;

    /// Every stored certificate, ordered by domain then name
    async fn all(&self) -> StoreResult<Vec<StoredCertificate>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_within() {
        let now = Utc::now();
        let cert = StoredCertificate {
            domain: "example.com".into(),
            name: "www".into(),
            created_on: now,
            expires_on: now + chrono::Duration::days(30),
            certificate: String::new(),
            chain: String::new(),
        };

        assert!(cert.expires_within(now, chrono::Duration::days(30)));
        assert!(cert.expires_within(now, chrono::Duration::days(31)));
        assert!(!cert.expires_within(now, chrono::Duration::days(29)));
    }
}
