//! Configuration loading and validation for certpilot.
//!
//! The configuration is a KDL document with one `renewal` block, one `store`
//! block and any number of `domain` blocks:
//!
//! ```kdl
//! renewal {
//!     dns-wait-secs 60
//!     renew-before-days 30
//!     retry-attempts-max 3
//! }
//!
//! store { path "/var/lib/certpilot" }
//!
//! domain "example.com" {
//!     account {
//!         directory "letsencrypt-staging"
//!         email "admin@example.com"
//!         credentials-file "/var/lib/certpilot/account.json"
//!     }
//!     dns "webhook" { url "https://dns.internal/api" }
//!     certificate "www" {
//!         hosts "example.com" "www.example.com"
//!         key-file "/etc/certpilot/www.key"
//!     }
//!     output "local" type="files" { directory "/etc/ssl/certpilot" }
//! }
//! ```

pub mod error;
pub mod kdl;
pub mod types;
pub mod validate;

use std::fs;
use std::path::Path;

use tracing::debug;

pub use error::ConfigError;
pub use types::{
    AccountConfig, CertificateConfig, Config, DomainConfig, OutputConfig, ProviderConfig,
    RenewalConfig, StoreConfig, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING,
};

impl Config {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_kdl(&text)
    }

    /// Parse and validate a KDL document
    pub fn from_kdl(text: &str) -> Result<Self, ConfigError> {
        let config = crate::kdl::parse_document(text)?;
        validate::validate_config(&config)?;
        Ok(config)
    }
}
