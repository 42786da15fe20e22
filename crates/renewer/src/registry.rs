//! Provider registry
//!
//! Maps provider type names used in configuration (`dns "webhook"`,
//! `output "x" type="files"`) to factories building the adapter. The registry
//! is built once at startup and passed into domain construction; embedders can
//! register additional providers before building domains.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use certpilot_config::ProviderConfig;
use thiserror::Error;
use tracing::debug;

use crate::dns::{DnsConfigurator, WebhookConfigurator};
use crate::output::{FilesOutput, OutputSink, WebhookOutput};

/// Default HTTP timeout for webhook providers
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors raised while instantiating providers
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown DNS provider '{0}'")]
    UnknownDnsProvider(String),

    #[error("Unknown output provider '{0}'")]
    UnknownOutputProvider(String),

    #[error("Provider '{provider}' requires option '{option}'")]
    MissingOption { provider: String, option: String },

    #[error("Provider '{provider}' option '{option}': {message}")]
    InvalidOption {
        provider: String,
        option: String,
        message: String,
    },

    #[error("Provider '{provider}' failed to initialize: {message}")]
    Provider { provider: String, message: String },
}

impl RegistryError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::UnknownDnsProvider(_) => "registry_unknown_dns",
            RegistryError::UnknownOutputProvider(_) => "registry_unknown_output",
            RegistryError::MissingOption { .. } => "registry_missing_option",
            RegistryError::InvalidOption { .. } => "registry_invalid_option",
            RegistryError::Provider { .. } => "registry_provider",
        }
    }
}

/// Builds a DNS configurator from its configuration block
pub type DnsFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn DnsConfigurator>, RegistryError> + Send + Sync>;

/// Builds an output sink from its configuration block
pub type OutputFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn OutputSink>, RegistryError> + Send + Sync>;

/// Provider type name to factory maps
#[derive(Clone, Default)]
pub struct Registry {
    dns: BTreeMap<String, DnsFactory>,
    outputs: BTreeMap<String, OutputFactory>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every provider shipped with certpilot
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_dns("webhook", webhook_dns);
        registry.register_output("files", files_output);
        registry.register_output("webhook", webhook_output);
        registry
    }

    pub fn register_dns<F>(&mut self, provider: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn DnsConfigurator>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.dns.insert(provider.into(), Arc::new(factory));
    }

    pub fn register_output<F>(&mut self, provider: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn OutputSink>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.outputs.insert(provider.into(), Arc::new(factory));
    }

    pub fn create_dns(&self, config: &ProviderConfig) -> Result<Arc<dyn DnsConfigurator>, RegistryError> {
        let factory = self
            .dns
            .get(&config.provider)
            .ok_or_else(|| RegistryError::UnknownDnsProvider(config.provider.clone()))?;
        debug!(provider = %config.provider, "Creating DNS configurator");
        factory(config)
    }

    pub fn create_output(&self, config: &ProviderConfig) -> Result<Arc<dyn OutputSink>, RegistryError> {
        let factory = self
            .outputs
            .get(&config.provider)
            .ok_or_else(|| RegistryError::UnknownOutputProvider(config.provider.clone()))?;
        debug!(provider = %config.provider, "Creating output sink");
        factory(config)
    }

    pub fn dns_providers(&self) -> Vec<&str> {
        self.dns.keys().map(String::as_str).collect()
    }

    pub fn output_providers(&self) -> Vec<&str> {
        self.outputs.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("dns", &self.dns_providers())
            .field("outputs", &self.output_providers())
            .finish()
    }
}

/// A required string option
pub fn required_option<'a>(config: &'a ProviderConfig, option: &str) -> Result<&'a str, RegistryError> {
    config
        .option(option)
        .ok_or_else(|| RegistryError::MissingOption {
            provider: config.provider.clone(),
            option: option.to_string(),
        })
}

/// `timeout-secs`, defaulting to 30 seconds
pub fn timeout_option(config: &ProviderConfig) -> Result<Duration, RegistryError> {
    match config.option("timeout-secs") {
        None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| RegistryError::InvalidOption {
                provider: config.provider.clone(),
                option: "timeout-secs".to_string(),
                message: e.to_string(),
            }),
    }
}

/// `token`, or the contents of the environment variable named by `token-env`
pub fn token_option(config: &ProviderConfig) -> Result<Option<String>, RegistryError> {
    if let Some(token) = config.option("token") {
        return Ok(Some(token.to_string()));
    }
    match config.option("token-env") {
        None => Ok(None),
        Some(var) => std::env::var(var)
            .map(Some)
            .map_err(|e| RegistryError::InvalidOption {
                provider: config.provider.clone(),
                option: "token-env".to_string(),
                message: format!("{}: {}", var, e),
            }),
    }
}

fn webhook_dns(config: &ProviderConfig) -> Result<Arc<dyn DnsConfigurator>, RegistryError> {
    let configurator = WebhookConfigurator::new(
        required_option(config, "url")?.to_string(),
        config.option("auth-header").map(str::to_string),
        token_option(config)?,
        timeout_option(config)?,
    )
    .map_err(|e| RegistryError::Provider {
        provider: config.provider.clone(),
        message: e.to_string(),
    })?;
    Ok(Arc::new(configurator))
}

fn files_output(config: &ProviderConfig) -> Result<Arc<dyn OutputSink>, RegistryError> {
    Ok(Arc::new(FilesOutput::new(required_option(config, "directory")?)))
}

fn webhook_output(config: &ProviderConfig) -> Result<Arc<dyn OutputSink>, RegistryError> {
    let output = WebhookOutput::new(
        required_option(config, "url")?.to_string(),
        config.option("auth-header").map(str::to_string),
        token_option(config)?,
        timeout_option(config)?,
    )
    .map_err(|e| RegistryError::Provider {
        provider: config.provider.clone(),
        message: e.to_string(),
    })?;
    Ok(Arc::new(output))
}
