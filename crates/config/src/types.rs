//! Configuration types

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use validator::Validate;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Renewal engine settings shared by every domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct RenewalConfig {
    /// Time to wait after creating TXT records before checking them
    #[validate(range(max = 3600))]
    pub dns_wait_secs: u64,

    /// Renew when the stored certificate expires within this many days
    #[validate(range(min = 1, max = 365))]
    pub renew_before_days: u64,

    /// Maximum failed attempts per task stage
    #[validate(range(min = 1, max = 100))]
    pub retry_attempts_max: u64,

    /// Interval between renewal cycles in daemon mode
    #[validate(range(min = 1, max = 720))]
    pub check_interval_hours: u64,
}

impl RenewalConfig {
    pub fn dns_wait(&self) -> Duration {
        Duration::from_secs(self.dns_wait_secs)
    }

    pub fn expiration_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.renew_before_days as i64)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_hours * 3600)
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            dns_wait_secs: 60,
            renew_before_days: 30,
            retry_attempts_max: 3,
            check_interval_hours: 12,
        }
    }
}

/// Certificate store location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/certpilot"),
        }
    }
}

/// ACME account settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct AccountConfig {
    /// ACME directory URL
    #[validate(url)]
    pub directory: String,

    /// Contact email
    #[validate(email)]
    pub email: Option<String>,

    /// Where the account credentials JSON is kept
    pub credentials_file: PathBuf,
}

/// A pluggable provider reference: type name plus free-form options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct ProviderConfig {
    #[validate(length(min = 1))]
    pub provider: String,
    pub options: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// A certificate to keep issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct CertificateConfig {
    #[validate(length(min = 1))]
    pub name: String,

    /// Host names for the SAN set, in order
    #[validate(length(min = 1))]
    pub hosts: Vec<String>,

    /// PEM private key; generated when absent
    pub key_file: PathBuf,
}

/// A named output sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct OutputConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(nested)]
    pub provider: ProviderConfig,
}

/// One domain: account, DNS configurator, certificates and outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct DomainConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(nested)]
    pub account: AccountConfig,

    #[validate(nested)]
    pub dns: ProviderConfig,

    #[validate(nested)]
    pub certificates: Vec<CertificateConfig>,

    #[validate(nested)]
    pub outputs: Vec<OutputConfig>,
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate, Default)]
pub struct Config {
    #[validate(nested)]
    pub renewal: RenewalConfig,

    pub store: StoreConfig,

    #[validate(nested)]
    pub domains: Vec<DomainConfig>,
}

impl Config {
    pub fn domain(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.name == name)
    }
}
