//! Task failure reasons

use thiserror::Error;

/// Why a task step failed
///
/// Carried inside [`TaskStatus`](super::TaskStatus); whether the failure is
/// retried is decided by the status variant, not by the error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Retry budget exhausted after {attempts} failed attempts")]
    RetriesExceeded { attempts: u32 },

    #[error("No DNS-01 challenge offered for '{domain}'")]
    MissingChallenge { domain: String },

    #[error("Failed to create TXT record '{name}': {message}")]
    DnsRecord { name: String, message: String },

    #[error("ACME request failed: {0}")]
    Acme(String),

    #[error("Challenge for '{domain}' is invalid: {problem}")]
    ChallengeInvalid { domain: String, problem: String },

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Certificate signing failed with order status {status}: {problem}")]
    SigningFailed { status: String, problem: String },

    #[error("Failed to build CSR: {0}")]
    Csr(String),

    #[error("Certificate store error: {0}")]
    Store(String),

    #[error("Issued certificate not yet available")]
    CertificateUnavailable,

    #[error("Issued certificate could not be parsed: {0}")]
    CertificateParse(String),

    #[error("No stored certificate to deliver")]
    MissingStoredCertificate,

    #[error("Failed to write outputs: {0}")]
    Output(String),
}

impl TaskError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::RetriesExceeded { .. } => "retries_exceeded",
            TaskError::MissingChallenge { .. } => "missing_challenge",
            TaskError::DnsRecord { .. } => "dns_record",
            TaskError::Acme(_) => "acme",
            TaskError::ChallengeInvalid { .. } => "challenge_invalid",
            TaskError::AuthorizationFailed(_) => "authorization_failed",
            TaskError::SigningFailed { .. } => "signing_failed",
            TaskError::Csr(_) => "csr",
            TaskError::Store(_) => "store",
            TaskError::CertificateUnavailable => "certificate_unavailable",
            TaskError::CertificateParse(_) => "certificate_parse",
            TaskError::MissingStoredCertificate => "missing_stored_certificate",
            TaskError::Output(_) => "output",
        }
    }
}
