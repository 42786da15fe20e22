//! Domain block parsing.

use std::collections::BTreeMap;

use kdl::KdlNode;
use tracing::trace;

use crate::error::ConfigError;
use crate::types::{
    AccountConfig, CertificateConfig, DomainConfig, OutputConfig, ProviderConfig,
    LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING,
};

use super::helpers::{
    get_args, get_first_arg_string, get_property_string, get_string_entry,
    get_string_list, value_to_string,
};

/// Parse a `domain "<name>" { ... }` block
pub fn parse_domain(node: &KdlNode) -> Result<DomainConfig, ConfigError> {
    let name = get_first_arg_string(node).ok_or_else(|| ConfigError::missing("domain", "name"))?;
    let context = format!("domain '{}'", name);

    let mut account = None;
    let mut dns = None;
    let mut certificates = Vec::new();
    let mut outputs = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "account" => account = Some(parse_account(child, &context)?),
                "dns" => dns = Some(parse_provider(child, &context, "dns")?),
                "certificate" => certificates.push(parse_certificate(child, &context)?),
                "output" => outputs.push(parse_output(child, &context)?),
                other => {
                    return Err(ConfigError::UnknownNode {
                        context,
                        node: other.to_string(),
                    })
                }
            }
        }
    }

    let config = DomainConfig {
        account: account.ok_or_else(|| ConfigError::missing(&context, "account"))?,
        dns: dns.ok_or_else(|| ConfigError::missing(&context, "dns"))?,
        name,
        certificates,
        outputs,
    };

    trace!(
        domain = %config.name,
        certificates = config.certificates.len(),
        outputs = config.outputs.len(),
        dns_provider = %config.dns.provider,
        "Parsed domain configuration"
    );
    Ok(config)
}

fn parse_account(node: &KdlNode, context: &str) -> Result<AccountConfig, ConfigError> {
    let directory = match get_string_entry(node, "directory").as_deref() {
        Some("letsencrypt") | None => LETSENCRYPT_PRODUCTION.to_string(),
        Some("letsencrypt-staging") => LETSENCRYPT_STAGING.to_string(),
        Some(url) => url.to_string(),
    };
    let credentials_file = get_string_entry(node, "credentials-file")
        .ok_or_else(|| ConfigError::missing(format!("{} account", context), "credentials-file"))?;

    Ok(AccountConfig {
        directory,
        email: get_string_entry(node, "email"),
        credentials_file: credentials_file.into(),
    })
}

fn parse_certificate(node: &KdlNode, context: &str) -> Result<CertificateConfig, ConfigError> {
    let name =
        get_first_arg_string(node).ok_or_else(|| ConfigError::missing(context, "certificate name"))?;
    let key_file = get_string_entry(node, "key-file").ok_or_else(|| {
        ConfigError::missing(format!("{} certificate '{}'", context, name), "key-file")
    })?;

    Ok(CertificateConfig {
        hosts: get_string_list(node, "hosts"),
        key_file: key_file.into(),
        name,
    })
}

fn parse_output(node: &KdlNode, context: &str) -> Result<OutputConfig, ConfigError> {
    let name =
        get_first_arg_string(node).ok_or_else(|| ConfigError::missing(context, "output name"))?;
    let provider = get_property_string(node, "type").ok_or_else(|| {
        ConfigError::missing(format!("{} output '{}'", context, name), "type")
    })?;

    Ok(OutputConfig {
        provider: ProviderConfig {
            provider,
            options: collect_options(node),
        },
        name,
    })
}

/// `dns "<type>" { key "value" ... }`
fn parse_provider(node: &KdlNode, context: &str, kind: &str) -> Result<ProviderConfig, ConfigError> {
    let provider = get_first_arg_string(node)
        .or_else(|| get_property_string(node, "type"))
        .ok_or_else(|| ConfigError::missing(context, format!("{} type", kind)))?;

    Ok(ProviderConfig {
        provider,
        options: collect_options(node),
    })
}

/// Flatten child nodes into `name -> first argument`
fn collect_options(node: &KdlNode) -> BTreeMap<String, String> {
    let mut options = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = get_args(child)
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(",");
            options.insert(child.name().value().to_string(), value);
        }
    }
    options
}
