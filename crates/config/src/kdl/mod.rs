//! KDL configuration parsing.

mod domain;
pub mod helpers;

use kdl::{KdlDocument, KdlNode};
use tracing::trace;

use crate::error::ConfigError;
use crate::types::{Config, RenewalConfig, StoreConfig};

pub use domain::parse_domain;
use helpers::{get_string_entry, get_u64_entry};

/// Parse a whole configuration document
pub fn parse_document(text: &str) -> Result<Config, ConfigError> {
    let doc: KdlDocument = text.parse()?;
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "renewal" => config.renewal = parse_renewal(node)?,
            "store" => config.store = parse_store(node)?,
            "domain" => config.domains.push(parse_domain(node)?),
            other => {
                return Err(ConfigError::UnknownNode {
                    context: "document".to_string(),
                    node: other.to_string(),
                })
            }
        }
    }

    trace!(domains = config.domains.len(), "Parsed configuration document");
    Ok(config)
}

/// Parse the `renewal` block; unset values keep their defaults
pub fn parse_renewal(node: &KdlNode) -> Result<RenewalConfig, ConfigError> {
    let defaults = RenewalConfig::default();
    let config = RenewalConfig {
        dns_wait_secs: get_u64_entry(node, "dns-wait-secs", "renewal")?
            .unwrap_or(defaults.dns_wait_secs),
        renew_before_days: get_u64_entry(node, "renew-before-days", "renewal")?
            .unwrap_or(defaults.renew_before_days),
        retry_attempts_max: get_u64_entry(node, "retry-attempts-max", "renewal")?
            .unwrap_or(defaults.retry_attempts_max),
        check_interval_hours: get_u64_entry(node, "check-interval-hours", "renewal")?
            .unwrap_or(defaults.check_interval_hours),
    };

    trace!(
        dns_wait_secs = config.dns_wait_secs,
        renew_before_days = config.renew_before_days,
        retry_attempts_max = config.retry_attempts_max,
        "Parsed renewal configuration"
    );
    Ok(config)
}

fn parse_store(node: &KdlNode) -> Result<StoreConfig, ConfigError> {
    let path = get_string_entry(node, "path").ok_or_else(|| ConfigError::missing("store", "path"))?;
    Ok(StoreConfig { path: path.into() })
}
