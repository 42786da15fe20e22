//! Domains and the certificates they keep issued

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use thiserror::Error;

use crate::acme::AcmeAccount;
use crate::dns::DnsConfigurator;
use crate::output::OutputSink;

/// Errors raised while assembling domains and certificates
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Certificate '{name}' has an invalid private key: {message}")]
    InvalidKey { name: String, message: String },

    #[error("Certificate '{0}' has no host names")]
    NoHosts(String),

    #[error("Failed to build CSR for certificate '{name}': {message}")]
    Csr { name: String, message: String },

    #[error("Domain '{domain}' already has a {kind} named '{name}'")]
    Duplicate {
        domain: String,
        kind: &'static str,
        name: String,
    },
}

impl DomainError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DomainError::InvalidKey { .. } => "domain_invalid_key",
            DomainError::NoHosts(_) => "domain_no_hosts",
            DomainError::Csr { .. } => "domain_csr",
            DomainError::Duplicate { .. } => "domain_duplicate",
        }
    }
}

/// A certificate to keep issued: its key pair and SAN host names
///
/// Immutable after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    name: String,
    hosts: Vec<String>,
    private_key_pem: String,
    public_key_pem: String,
}

impl Certificate {
    /// Build a certificate from a PEM private key
    ///
    /// Fails if the key cannot be parsed or no host is given.
    pub fn new(
        name: impl Into<String>,
        hosts: Vec<String>,
        private_key_pem: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if hosts.is_empty() {
            return Err(DomainError::NoHosts(name));
        }

        let private_key_pem = private_key_pem.into();
        let key = KeyPair::from_pem(&private_key_pem).map_err(|e| DomainError::InvalidKey {
            name: name.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            name,
            hosts,
            public_key_pem: key.public_key_pem(),
            private_key_pem,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// DER-encoded CSR over the host list, signed with the certificate key
    pub fn csr_der(&self) -> Result<Vec<u8>, DomainError> {
        let csr_err = |e: rcgen::Error| DomainError::Csr {
            name: self.name.clone(),
            message: e.to_string(),
        };

        let key = KeyPair::from_pem(&self.private_key_pem).map_err(csr_err)?;
        let mut params = CertificateParams::new(self.hosts.clone()).map_err(csr_err)?;
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, self.hosts[0].as_str());
        params.distinguished_name = subject;

        let csr = params.serialize_request(&key).map_err(csr_err)?;
        Ok(csr.der().to_vec())
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh PEM private key
pub fn generate_private_key() -> Result<String, rcgen::Error> {
    Ok(KeyPair::generate()?.serialize_pem())
}

/// A domain: one ACME account, one DNS configurator, its certificates and
/// the outputs every certificate is delivered to
#[derive(Debug)]
pub struct Domain {
    name: String,
    account: Arc<dyn AcmeAccount>,
    dns: Arc<dyn DnsConfigurator>,
    certificates: BTreeMap<String, Arc<Certificate>>,
    outputs: BTreeMap<String, Arc<dyn OutputSink>>,
}

impl Domain {
    pub fn new(
        name: impl Into<String>,
        account: Arc<dyn AcmeAccount>,
        dns: Arc<dyn DnsConfigurator>,
    ) -> Self {
        Self {
            name: name.into(),
            account,
            dns,
            certificates: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a certificate; names must be unique within the domain
    pub fn with_certificate(mut self, certificate: Certificate) -> Result<Self, DomainError> {
        if self.certificates.contains_key(certificate.name()) {
            return Err(DomainError::Duplicate {
                domain: self.name,
                kind: "certificate",
                name: certificate.name,
            });
        }
        self.certificates
            .insert(certificate.name().to_string(), Arc::new(certificate));
        Ok(self)
    }

    /// Add an output; names must be unique within the domain
    pub fn with_output(
        mut self,
        name: impl Into<String>,
        output: Arc<dyn OutputSink>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            return Err(DomainError::Duplicate {
                domain: self.name,
                kind: "output",
                name,
            });
        }
        self.outputs.insert(name, output);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account(&self) -> &Arc<dyn AcmeAccount> {
        &self.account
    }

    pub fn dns(&self) -> &Arc<dyn DnsConfigurator> {
        &self.dns
    }

    pub fn certificates(&self) -> &BTreeMap<String, Arc<Certificate>> {
        &self.certificates
    }

    pub fn certificate(&self, name: &str) -> Option<&Arc<Certificate>> {
        self.certificates.get(name)
    }

    pub fn outputs(&self) -> &BTreeMap<String, Arc<dyn OutputSink>> {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAccount, FakeDnsConfigurator, RecordingOutput};

    fn hosts() -> Vec<String> {
        vec!["example.com".to_string(), "www.example.com".to_string()]
    }

    #[test]
    fn test_certificate_derives_public_key() {
        let key = generate_private_key().unwrap();
        let cert = Certificate::new("www", hosts(), key).unwrap();
        assert!(cert.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(cert.hosts(), hosts().as_slice());
    }

    #[test]
    fn test_certificate_rejects_invalid_key() {
        let err = Certificate::new("www", hosts(), "not a key").unwrap_err();
        assert_eq!(err.as_label(), "domain_invalid_key");
    }

    #[test]
    fn test_certificate_requires_hosts() {
        let key = generate_private_key().unwrap();
        assert!(matches!(
            Certificate::new("www", vec![], key),
            Err(DomainError::NoHosts(_))
        ));
    }

    #[test]
    fn test_csr_is_der() {
        let key = generate_private_key().unwrap();
        let cert = Certificate::new("www", hosts(), key).unwrap();
        let der = cert.csr_der().unwrap();
        // DER SEQUENCE
        assert_eq!(der[0], 0x30);
    }

    #[test]
    fn test_debug_hides_key() {
        let key = generate_private_key().unwrap();
        let cert = Certificate::new("www", hosts(), key).unwrap();
        assert!(!format!("{:?}", cert).contains("PRIVATE"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let key = generate_private_key().unwrap();
        let cert = Certificate::new("www", hosts(), key).unwrap();
        let domain = Domain::new(
            "example.com",
            Arc::new(FakeAccount::valid()),
            Arc::new(FakeDnsConfigurator::new()),
        )
        .with_certificate(cert.clone())
        .unwrap();
        assert!(matches!(
            domain.with_certificate(cert),
            Err(DomainError::Duplicate { kind: "certificate", .. })
        ));

        let domain = Domain::new(
            "example.com",
            Arc::new(FakeAccount::valid()),
            Arc::new(FakeDnsConfigurator::new()),
        )
        .with_output("a", Arc::new(RecordingOutput::new()))
        .unwrap();
        assert!(domain
            .with_output("a", Arc::new(RecordingOutput::new()))
            .is_err());
    }
}
