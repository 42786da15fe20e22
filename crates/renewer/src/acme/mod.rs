//! ACME protocol abstraction
//!
//! The renewal engine never talks HTTP or signs JWS itself. It drives opaque
//! account, order, authorization and challenge objects through the traits in
//! this module. [`instant`] provides the production implementation backed by
//! `instant-acme`; tests use the fakes in `crate::testing`.
//!
//! All objects use interior mutability: `update()` refreshes the cached
//! status from the CA, accessors return the last known value.

pub mod instant;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use instant::InstantAcmeAccount;

/// Result type for ACME operations
pub type AcmeResult<T> = Result<T, AcmeError>;

/// Errors raised by ACME protocol objects
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Failed to create or load the ACME account
    #[error("Failed to create ACME account: {0}")]
    AccountCreation(String),

    /// Failed to create a certificate order
    #[error("Failed to create certificate order: {0}")]
    OrderCreation(String),

    /// Protocol-level failure talking to the CA
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Credentials file could not be read or written
    #[error("ACME credentials error: {0}")]
    Credentials(String),
}

impl AcmeError {
    pub fn as_label(&self) -> &'static str {
        match self {
            AcmeError::AccountCreation(_) => "acme_account_creation",
            AcmeError::OrderCreation(_) => "acme_order_creation",
            AcmeError::Protocol(_) => "acme_protocol",
            AcmeError::Credentials(_) => "acme_credentials",
        }
    }
}

impl From<instant_acme::Error> for AcmeError {
    fn from(e: instant_acme::Error) -> Self {
        AcmeError::Protocol(e.to_string())
    }
}

/// Status of an ACME order, authorization or challenge
///
/// A superset of the per-object status sets defined by RFC 8555.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcmeStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Revoked,
    Expired,
    Canceled,
    Unknown,
}

impl AcmeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcmeStatus::Pending => "pending",
            AcmeStatus::Ready => "ready",
            AcmeStatus::Processing => "processing",
            AcmeStatus::Valid => "valid",
            AcmeStatus::Invalid => "invalid",
            AcmeStatus::Deactivated => "deactivated",
            AcmeStatus::Revoked => "revoked",
            AcmeStatus::Expired => "expired",
            AcmeStatus::Canceled => "canceled",
            AcmeStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AcmeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problem document reported by the CA (RFC 7807)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Problem {
    /// Problem type URI
    pub kind: Option<String>,
    /// Short summary
    pub title: Option<String>,
    /// Detailed explanation
    pub detail: Option<String>,
    /// Per-identifier problems
    pub subproblems: Vec<Problem>,
}

impl Problem {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_subproblem(mut self, problem: Problem) -> Self {
        self.subproblems.push(problem);
        self
    }
}

/// An ACME account able to open orders
#[async_trait]
pub trait AcmeAccount: Send + Sync + fmt::Debug {
    /// Open a new order for the given host names
    async fn new_order(&self, hosts: &[String]) -> AcmeResult<Arc<dyn AcmeOrder>>;
}

/// A certificate order
#[async_trait]
pub trait AcmeOrder: Send + Sync + fmt::Debug {
    /// Last known order status
    fn status(&self) -> AcmeStatus;

    /// Problem attached to the order, if any
    fn error(&self) -> Option<Problem>;

    /// Authorizations of the order, one per identifier
    fn authorizations(&self) -> Vec<Arc<dyn AcmeAuthorization>>;

    /// Refresh the order status from the CA
    async fn update(&self) -> AcmeResult<()>;

    /// Submit a DER-encoded CSR to finalize the order
    async fn execute(&self, csr_der: &[u8]) -> AcmeResult<()>;

    /// Download the issued PEM certificate chain, leaf first
    async fn certificate(&self) -> AcmeResult<Option<String>>;
}

/// An authorization for one identifier of an order
pub trait AcmeAuthorization: Send + Sync + fmt::Debug {
    /// Identifier (domain name) being authorized
    fn domain(&self) -> String;

    /// Last known authorization status
    fn status(&self) -> AcmeStatus;

    /// The DNS-01 challenge offered for this authorization, if any
    fn dns01_challenge(&self) -> Option<Arc<dyn Dns01Challenge>>;
}

/// A DNS-01 challenge
#[async_trait]
pub trait Dns01Challenge: Send + Sync + fmt::Debug {
    /// Last known challenge status
    fn status(&self) -> AcmeStatus;

    /// Value to publish in the `_acme-challenge` TXT record
    fn digest(&self) -> String;

    /// Problem attached to the challenge, if any
    fn error(&self) -> Option<Problem>;

    /// Ask the CA to validate the challenge
    async fn trigger(&self) -> AcmeResult<()>;

    /// Refresh the challenge status from the CA
    async fn update(&self) -> AcmeResult<()>;
}
