//! Output sinks receiving freshly issued or still-valid certificates
//!
//! Every output of a domain receives the full key material and certificate
//! chain once per successful renewal run.

pub mod files;
pub mod webhook;

use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use files::FilesOutput;
pub use webhook::WebhookOutput;

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Errors raised by output sinks
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output request failed: {0}")]
    Request(String),

    #[error("Output endpoint returned HTTP {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Invalid output configuration: {0}")]
    Configuration(String),
}

impl OutputError {
    pub fn as_label(&self) -> &'static str {
        match self {
            OutputError::Io { .. } => "output_io",
            OutputError::Request(_) => "output_request",
            OutputError::Status { .. } => "output_status",
            OutputError::Configuration(_) => "output_configuration",
        }
    }
}

/// Everything an output needs to install a certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputData {
    pub domain: String,
    pub certificate_name: String,
    /// PEM public key
    pub public_key: String,
    /// PEM private key
    pub private_key: String,
    /// PEM leaf certificate
    pub certificate: String,
    /// PEM full chain, leaf first
    pub chain: String,
}

impl OutputData {
    /// The chain without its leading leaf certificate
    pub fn intermediates(&self) -> &str {
        self.chain
            .strip_prefix(self.certificate.as_str())
            .unwrap_or(&self.chain)
            .trim_start_matches('\n')
    }
}

/// Destination for issued certificates
#[async_trait]
pub trait OutputSink: Send + Sync + Debug {
    /// Provider name (e.g. "files")
    fn name(&self) -> &'static str;

    async fn write(&self, data: &OutputData) -> OutputResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(certificate: &str, chain: &str) -> OutputData {
        OutputData {
            domain: "example.com".into(),
            certificate_name: "www".into(),
            public_key: String::new(),
            private_key: String::new(),
            certificate: certificate.into(),
            chain: chain.into(),
        }
    }

    #[test]
    fn test_intermediates_strip_leaf() {
        assert_eq!(data("LEAF\n", "LEAF\nISSUER\n").intermediates(), "ISSUER\n");
        assert_eq!(data("LEAF\n", "LEAF\n").intermediates(), "");
    }

    #[test]
    fn test_intermediates_without_leading_leaf() {
        assert_eq!(data("LEAF\n", "ISSUER\n").intermediates(), "ISSUER\n");
    }
}
