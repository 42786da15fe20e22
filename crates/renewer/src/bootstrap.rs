//! Assembles runtime objects from configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use certpilot_common::{EventSink, RenewalMetrics, SystemClock};
use certpilot_config::{Config, DomainConfig};
use tracing::{debug, info};

use crate::acme::{AcmeAccount, InstantAcmeAccount};
use crate::dns::HickoryQueryFactory;
use crate::domain::{generate_private_key, Certificate, Domain};
use crate::registry::Registry;
use crate::store::FilesystemStore;
use crate::task::{RenewalSettings, Services};

/// Shared engine services for `config`
pub fn build_services(
    config: &Config,
    events: Arc<dyn EventSink>,
    metrics: Arc<RenewalMetrics>,
) -> Result<Services> {
    let store = FilesystemStore::new(&config.store.path).with_context(|| {
        format!(
            "Failed to open certificate store at {}",
            config.store.path.display()
        )
    })?;

    Ok(Services {
        settings: RenewalSettings::from(&config.renewal),
        store: Arc::new(store),
        clock: Arc::new(SystemClock),
        dns_query_factory: Arc::new(HickoryQueryFactory::new()),
        events,
        metrics,
    })
}

/// Build every configured domain
///
/// Domains sharing an ACME directory and credentials file share one account.
pub async fn build_domains(config: &Config, registry: &Registry) -> Result<Vec<Arc<Domain>>> {
    let mut accounts: HashMap<(String, PathBuf), Arc<dyn AcmeAccount>> = HashMap::new();
    let mut domains = Vec::with_capacity(config.domains.len());

    for domain_config in &config.domains {
        let account_config = &domain_config.account;
        let key = (
            account_config.directory.clone(),
            account_config.credentials_file.clone(),
        );

        let account = match accounts.get(&key) {
            Some(account) => Arc::clone(account),
            None => {
                let account = InstantAcmeAccount::load_or_create(
                    &account_config.directory,
                    account_config.email.as_deref(),
                    &account_config.credentials_file,
                )
                .await
                .with_context(|| {
                    format!("Failed to set up ACME account for '{}'", domain_config.name)
                })?;
                let account: Arc<dyn AcmeAccount> = Arc::new(account);
                accounts.insert(key, Arc::clone(&account));
                account
            }
        };

        let domain = build_domain(domain_config, account, registry).await?;
        domains.push(Arc::new(domain));
    }

    info!(domains = domains.len(), "Domains ready");
    Ok(domains)
}

/// Build one domain around an existing account
pub async fn build_domain(
    config: &DomainConfig,
    account: Arc<dyn AcmeAccount>,
    registry: &Registry,
) -> Result<Domain> {
    let dns = registry
        .create_dns(&config.dns)
        .with_context(|| format!("Invalid DNS provider for domain '{}'", config.name))?;

    let mut domain = Domain::new(&config.name, account, dns);

    for certificate in &config.certificates {
        let key = load_or_generate_key(&certificate.key_file)
            .await
            .with_context(|| format!("Failed to load key for certificate '{}'", certificate.name))?;
        let certificate = Certificate::new(&certificate.name, certificate.hosts.clone(), key)?;
        domain = domain.with_certificate(certificate)?;
    }

    for output in &config.outputs {
        let sink = registry
            .create_output(&output.provider)
            .with_context(|| format!("Invalid output '{}' for domain '{}'", output.name, config.name))?;
        domain = domain.with_output(&output.name, sink)?;
    }

    debug!(
        domain = %config.name,
        certificates = config.certificates.len(),
        outputs = config.outputs.len(),
        "Domain built"
    );
    Ok(domain)
}

/// Read a PEM private key, generating and saving one if the file is missing
pub async fn load_or_generate_key(path: &Path) -> Result<String> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    let pem = generate_private_key().context("Failed to generate private key")?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, &pem)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    info!(path = %path.display(), "Generated certificate private key");
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::DnsConfigurator;
    use crate::testing::{FakeAccount, FakeDnsConfigurator};
    use certpilot_common::RecordingEventSink;
    use tempfile::TempDir;

    fn registry() -> Registry {
        let mut registry = Registry::with_builtin();
        registry.register_dns("fake", |_| {
            Ok(Arc::new(FakeDnsConfigurator::new()) as Arc<dyn DnsConfigurator>)
        });
        registry
    }

    fn config(dir: &Path) -> Config {
        let text = format!(
            r#"
store {{ path "{store}" }}
domain "example.com" {{
    account {{
        directory "letsencrypt-staging"
        credentials-file "{dir}/account.json"
    }}
    dns "fake"
    certificate "www" {{
        hosts "example.com" "www.example.com"
        key-file "{dir}/keys/www.key"
    }}
    output "local" type="files" {{ directory "{dir}/out" }}
}}
"#,
            store = dir.join("store").display(),
            dir = dir.display(),
        );
        Config::from_kdl(&text).unwrap()
    }

    #[tokio::test]
    async fn test_generates_key_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("www.key");

        let first = load_or_generate_key(&path).await.unwrap();
        assert!(first.contains("PRIVATE KEY"));
        let second = load_or_generate_key(&path).await.unwrap();
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_build_domain() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        let domain = build_domain(
            &config.domains[0],
            Arc::new(FakeAccount::valid()),
            &registry(),
        )
        .await
        .unwrap();

        assert_eq!(domain.name(), "example.com");
        assert_eq!(domain.dns().name(), "fake");
        let certificate = domain.certificate("www").unwrap();
        assert_eq!(certificate.hosts(), ["example.com", "www.example.com"]);
        assert!(domain.outputs().contains_key("local"));
        assert!(dir.path().join("keys/www.key").exists());
    }

    #[tokio::test]
    async fn test_build_domain_rejects_unknown_provider() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        let err = build_domain(
            &config.domains[0],
            Arc::new(FakeAccount::valid()),
            &Registry::with_builtin(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Invalid DNS provider"));
    }

    #[tokio::test]
    async fn test_build_domain_rejects_invalid_key() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(dir.path().join("keys")).unwrap();
        std::fs::write(dir.path().join("keys/www.key"), "not a key").unwrap();

        let result = build_domain(
            &config.domains[0],
            Arc::new(FakeAccount::valid()),
            &registry(),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_build_services() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        let services = build_services(
            &config,
            Arc::new(RecordingEventSink::new()),
            Arc::new(RenewalMetrics::new()),
        )
        .unwrap();

        assert_eq!(services.settings.retry_attempts_max, 3);
        assert!(dir.path().join("store").is_dir());
    }
}
