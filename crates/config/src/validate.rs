//! Structural validation
//!
//! Field-level constraints are declared on the types with `validator`; this
//! module checks the rules that span several entries.

use std::collections::HashSet;

use validator::Validate;

use crate::error::ConfigError;
use crate::types::{Config, DomainConfig};

/// Run field-level and structural validation
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    config.validate()?;

    let mut domains = HashSet::new();
    for domain in &config.domains {
        if !domains.insert(domain.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "domain '{}' is configured more than once",
                domain.name
            )));
        }
        validate_domain(domain)?;
    }

    Ok(())
}

fn validate_domain(domain: &DomainConfig) -> Result<(), ConfigError> {
    if domain.certificates.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "domain '{}' has no certificates",
            domain.name
        )));
    }

    let mut names = HashSet::new();
    for certificate in &domain.certificates {
        if !names.insert(certificate.name.as_str()) {
            return Err(ConfigError::Duplicate {
                domain: domain.name.clone(),
                kind: "certificate",
                name: certificate.name.clone(),
            });
        }
        for host in &certificate.hosts {
            if host.trim().is_empty() || host.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "certificate '{}' in domain '{}' has an invalid host name '{}'",
                    certificate.name, domain.name, host
                )));
            }
        }
    }

    let mut names = HashSet::new();
    for output in &domain.outputs {
        if !names.insert(output.name.as_str()) {
            return Err(ConfigError::Duplicate {
                domain: domain.name.clone(),
                kind: "output",
                name: output.name.clone(),
            });
        }
    }

    Ok(())
}
