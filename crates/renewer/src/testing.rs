//! In-process fakes for the ACME, DNS, store and output seams
//!
//! Used by the unit and integration tests to drive the engine without a CA,
//! a DNS provider or the network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certpilot_common::{ManualClock, RecordingEventSink, RenewalMetrics};
use chrono::Utc;
use parking_lot::Mutex;
use rcgen::{CertificateParams, DistinguishedName, DnType, IsCa, BasicConstraints, KeyPair};

use crate::acme::{
    AcmeAccount, AcmeAuthorization, AcmeError, AcmeOrder, AcmeResult, AcmeStatus, Dns01Challenge,
    Problem,
};
use crate::dns::{
    DnsConfigurator, DnsError, DnsQuery, DnsQueryFactory, DnsResult, TxtRecord,
};
use crate::domain::{generate_private_key, Certificate, Domain};
use crate::output::{OutputData, OutputError, OutputResult, OutputSink};
use crate::store::{CertificateStore, MemoryStore, StoreError, StoreResult, StoredCertificate};
use crate::task::{RenewalSettings, Services, TaskContext};

/// Nameserver reported as authoritative by [`FakeDnsQuery`]
pub const FAKE_NAMESERVER: &str = "ns1.fake-dns.test.";

// ============================================================================
// ACME
// ============================================================================

/// Scriptable DNS-01 challenge
#[derive(Debug)]
pub struct FakeChallenge {
    digest: String,
    status: Mutex<AcmeStatus>,
    error: Mutex<Option<Problem>>,
    after_trigger: Mutex<Option<AcmeStatus>>,
    after_update: Mutex<Option<AcmeStatus>>,
    fail_trigger: AtomicBool,
    fail_update: AtomicBool,
    triggers: AtomicUsize,
    updates: AtomicUsize,
}

impl FakeChallenge {
    pub fn new(status: AcmeStatus, digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            status: Mutex::new(status),
            error: Mutex::new(None),
            after_trigger: Mutex::new(None),
            after_update: Mutex::new(None),
            fail_trigger: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            triggers: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    /// Pending challenge that moves to processing when triggered and to
    /// valid on the next update
    pub fn validating(digest: impl Into<String>) -> Self {
        Self::new(AcmeStatus::Pending, digest)
            .on_trigger(AcmeStatus::Processing)
            .on_update(AcmeStatus::Valid)
    }

    pub fn on_trigger(self, status: AcmeStatus) -> Self {
        *self.after_trigger.lock() = Some(status);
        self
    }

    pub fn on_update(self, status: AcmeStatus) -> Self {
        *self.after_update.lock() = Some(status);
        self
    }

    pub fn with_error(self, problem: Problem) -> Self {
        *self.error.lock() = Some(problem);
        self
    }

    pub fn failing_trigger(self) -> Self {
        self.fail_trigger.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_update(self) -> Self {
        self.fail_update.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_status(&self, status: AcmeStatus) {
        *self.status.lock() = status;
    }

    pub fn triggers(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dns01Challenge for FakeChallenge {
    fn status(&self) -> AcmeStatus {
        *self.status.lock()
    }

    fn digest(&self) -> String {
        self.digest.clone()
    }

    fn error(&self) -> Option<Problem> {
        self.error.lock().clone()
    }

    async fn trigger(&self) -> AcmeResult<()> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        if self.fail_trigger.load(Ordering::SeqCst) {
            return Err(AcmeError::Protocol("challenge trigger rejected".to_string()));
        }
        if let Some(status) = *self.after_trigger.lock() {
            self.set_status(status);
        }
        Ok(())
    }

    async fn update(&self) -> AcmeResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(AcmeError::Protocol("challenge refresh failed".to_string()));
        }
        if let Some(status) = *self.after_update.lock() {
            self.set_status(status);
        }
        Ok(())
    }
}

/// Authorization with an optional DNS-01 challenge
#[derive(Debug)]
pub struct FakeAuthorization {
    domain: String,
    status: Mutex<AcmeStatus>,
    challenge: Option<Arc<FakeChallenge>>,
}

impl FakeAuthorization {
    pub fn new(
        domain: impl Into<String>,
        status: AcmeStatus,
        challenge: Option<Arc<FakeChallenge>>,
    ) -> Self {
        Self {
            domain: domain.into(),
            status: Mutex::new(status),
            challenge,
        }
    }

    /// Pending authorization whose challenge validates normally
    pub fn pending(domain: impl Into<String>, digest: impl Into<String>) -> Self {
        Self::new(
            domain,
            AcmeStatus::Pending,
            Some(Arc::new(FakeChallenge::validating(digest))),
        )
    }

    /// Authorization the CA already considers valid
    pub fn valid(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        let challenge = FakeChallenge::new(AcmeStatus::Valid, format!("digest-{}", domain));
        Self::new(domain, AcmeStatus::Valid, Some(Arc::new(challenge)))
    }

    pub fn challenge(&self) -> Option<&Arc<FakeChallenge>> {
        self.challenge.as_ref()
    }
}

impl AcmeAuthorization for FakeAuthorization {
    fn domain(&self) -> String {
        self.domain.clone()
    }

    fn status(&self) -> AcmeStatus {
        *self.status.lock()
    }

    fn dns01_challenge(&self) -> Option<Arc<dyn Dns01Challenge>> {
        self.challenge
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn Dns01Challenge>)
    }
}

/// Scriptable order
#[derive(Debug)]
pub struct FakeOrder {
    status: Mutex<AcmeStatus>,
    error: Mutex<Option<Problem>>,
    authorizations: Vec<Arc<FakeAuthorization>>,
    after_execute: Mutex<AcmeStatus>,
    after_update: Mutex<Option<AcmeStatus>>,
    certificate: Mutex<Option<String>>,
    fail_execute: AtomicBool,
    fail_update: AtomicBool,
    fail_download: AtomicBool,
    csrs: Mutex<Vec<Vec<u8>>>,
    updates: AtomicUsize,
}

impl FakeOrder {
    /// Pending order that becomes processing on CSR submission and valid on
    /// the next update
    pub fn new(authorizations: Vec<Arc<FakeAuthorization>>) -> Self {
        Self {
            status: Mutex::new(AcmeStatus::Pending),
            error: Mutex::new(None),
            authorizations,
            after_execute: Mutex::new(AcmeStatus::Processing),
            after_update: Mutex::new(Some(AcmeStatus::Valid)),
            certificate: Mutex::new(None),
            fail_execute: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_download: AtomicBool::new(false),
            csrs: Mutex::new(Vec::new()),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn with_certificate(self, pem_chain: impl Into<String>) -> Self {
        *self.certificate.lock() = Some(pem_chain.into());
        self
    }

    pub fn with_status(self, status: AcmeStatus) -> Self {
        *self.status.lock() = status;
        self
    }

    pub fn with_error(self, problem: Problem) -> Self {
        *self.error.lock() = Some(problem);
        self
    }

    pub fn on_execute(self, status: AcmeStatus) -> Self {
        *self.after_execute.lock() = status;
        self
    }

    pub fn on_update(self, status: Option<AcmeStatus>) -> Self {
        *self.after_update.lock() = status;
        self
    }

    pub fn failing_execute(self) -> Self {
        self.fail_execute.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_update(self) -> Self {
        self.fail_update.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing_download(&self, failing: bool) {
        self.fail_download.store(failing, Ordering::SeqCst);
    }

    pub fn set_certificate(&self, pem_chain: Option<String>) {
        *self.certificate.lock() = pem_chain;
    }

    pub fn fake_authorizations(&self) -> &[Arc<FakeAuthorization>] {
        &self.authorizations
    }

    /// CSRs submitted so far, DER encoded
    pub fn csrs(&self) -> Vec<Vec<u8>> {
        self.csrs.lock().clone()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcmeOrder for FakeOrder {
    fn status(&self) -> AcmeStatus {
        *self.status.lock()
    }

    fn error(&self) -> Option<Problem> {
        self.error.lock().clone()
    }

    fn authorizations(&self) -> Vec<Arc<dyn AcmeAuthorization>> {
        self.authorizations
            .iter()
            .map(|a| Arc::clone(a) as Arc<dyn AcmeAuthorization>)
            .collect()
    }

    async fn update(&self) -> AcmeResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(AcmeError::Protocol("order refresh failed".to_string()));
        }
        if let Some(status) = *self.after_update.lock() {
            *self.status.lock() = status;
        }
        Ok(())
    }

    async fn execute(&self, csr_der: &[u8]) -> AcmeResult<()> {
        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(AcmeError::Protocol("finalize rejected".to_string()));
        }
        self.csrs.lock().push(csr_der.to_vec());
        let next = *self.after_execute.lock();
        *self.status.lock() = next;
        Ok(())
    }

    async fn certificate(&self) -> AcmeResult<Option<String>> {
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(AcmeError::Protocol("download failed".to_string()));
        }
        Ok(self.certificate.lock().clone())
    }
}

/// Account issuing [`FakeOrder`]s that validate and issue normally
#[derive(Debug, Default)]
pub struct FakeAccount {
    fail: AtomicBool,
    orders: Mutex<Vec<Arc<FakeOrder>>>,
}

impl FakeAccount {
    pub fn valid() -> Self {
        Self::default()
    }

    /// Account whose order creation always fails
    pub fn failing() -> Self {
        let account = Self::default();
        account.fail.store(true, Ordering::SeqCst);
        account
    }

    /// Orders opened so far
    pub fn orders(&self) -> Vec<Arc<FakeOrder>> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl AcmeAccount for FakeAccount {
    async fn new_order(&self, hosts: &[String]) -> AcmeResult<Arc<dyn AcmeOrder>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AcmeError::OrderCreation("order rejected".to_string()));
        }

        let chain = test_chain(hosts).map_err(|e| AcmeError::Protocol(e.to_string()))?;
        let sequence = self.orders.lock().len();
        let authorizations = hosts
            .iter()
            .map(|host| Arc::new(FakeAuthorization::pending(host, format!("digest-{}-{}", sequence, host))))
            .collect();

        let order = Arc::new(FakeOrder::new(authorizations).with_certificate(chain));
        self.orders.lock().push(Arc::clone(&order));
        Ok(order)
    }
}

/// A leaf for `hosts` followed by an issuer certificate, both self-signed
pub fn test_chain(hosts: &[String]) -> Result<String, rcgen::Error> {
    let leaf_key = KeyPair::generate()?;
    let leaf = CertificateParams::new(hosts.to_vec())?.self_signed(&leaf_key)?;

    let issuer_key = KeyPair::generate()?;
    let mut issuer_params = CertificateParams::new(Vec::<String>::new())?;
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, "Fake Intermediate");
    issuer_params.distinguished_name = subject;
    issuer_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let issuer = issuer_params.self_signed(&issuer_key)?;

    Ok(format!("{}{}", leaf.pem(), issuer.pem()))
}

// ============================================================================
// DNS
// ============================================================================

/// Records currently published in the fake DNS
#[derive(Debug, Default)]
pub struct FakeZone {
    records: Mutex<Vec<(String, String)>>,
}

impl FakeZone {
    pub fn records(&self) -> Vec<(String, String)> {
        self.records.lock().clone()
    }

    pub fn publish(&self, name: &str, value: &str) {
        self.records.lock().push((name.to_string(), value.to_string()));
    }

    fn remove(&self, name: &str, value: &str) -> bool {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|(n, v)| !(n == name && v == value));
        records.len() != before
    }
}

/// Configurator publishing into a [`FakeZone`]
#[derive(Debug, Default)]
pub struct FakeDnsConfigurator {
    zone: Arc<FakeZone>,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    create_calls: AtomicUsize,
    deleted: Mutex<Vec<(String, String)>>,
}

impl FakeDnsConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configurator whose record creation always fails
    pub fn failing() -> Self {
        let configurator = Self::default();
        configurator.fail_create.store(true, Ordering::SeqCst);
        configurator
    }

    pub fn set_failing_create(&self, failing: bool) {
        self.fail_create.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_delete(&self, failing: bool) {
        self.fail_delete.store(failing, Ordering::SeqCst);
    }

    pub fn zone(&self) -> Arc<FakeZone> {
        Arc::clone(&self.zone)
    }

    /// Query factory answering from this configurator's zone
    pub fn query_factory(&self) -> FakeDnsQueryFactory {
        FakeDnsQueryFactory::new(self.zone())
    }

    /// Records still published
    pub fn published(&self) -> Vec<(String, String)> {
        self.zone.records()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl DnsConfigurator for FakeDnsConfigurator {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_txt_record(&self, name: &str, value: &str) -> DnsResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DnsError::RecordCreation {
                name: name.to_string(),
                message: "provider unavailable".to_string(),
            });
        }
        self.zone.publish(name, value);
        Ok(())
    }

    async fn delete_txt_record(&self, name: &str, value: &str) -> DnsResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(DnsError::RecordDeletion {
                name: name.to_string(),
                message: "provider unavailable".to_string(),
            });
        }
        self.zone.remove(name, value);
        self.deleted.lock().push((name.to_string(), value.to_string()));
        Ok(())
    }
}

/// Query factory answering from a [`FakeZone`]
#[derive(Debug)]
pub struct FakeDnsQueryFactory {
    zone: Arc<FakeZone>,
    fail: AtomicBool,
    requested: Mutex<Vec<Vec<String>>>,
}

impl FakeDnsQueryFactory {
    pub fn new(zone: Arc<FakeZone>) -> Self {
        Self {
            zone,
            fail: AtomicBool::new(false),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Nameserver lists queries were created for
    pub fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl DnsQueryFactory for FakeDnsQueryFactory {
    async fn create(&self, nameservers: &[String]) -> DnsResult<Arc<dyn DnsQuery>> {
        self.requested.lock().push(nameservers.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DnsError::Lookup {
                name: nameservers.join(","),
                message: "resolver unavailable".to_string(),
            });
        }
        Ok(Arc::new(FakeDnsQuery {
            zone: Arc::clone(&self.zone),
        }))
    }
}

/// Query over a [`FakeZone`]
#[derive(Debug)]
pub struct FakeDnsQuery {
    zone: Arc<FakeZone>,
}

#[async_trait]
impl DnsQuery for FakeDnsQuery {
    async fn find_authoritative_name_servers(&self, _domain: &str) -> DnsResult<Vec<String>> {
        Ok(vec![FAKE_NAMESERVER.to_string()])
    }

    async fn find_txt_records(&self, domain: &str) -> DnsResult<Vec<TxtRecord>> {
        Ok(self
            .zone
            .records()
            .into_iter()
            .filter(|(name, _)| name == domain)
            .map(|(name, value)| TxtRecord::new(name, format!("\"{}\"", value)))
            .collect())
    }
}

// ============================================================================
// Store and outputs
// ============================================================================

/// Store failing every operation
#[derive(Debug, Default)]
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::Io(std::io::Error::other("store unavailable"))
}

#[async_trait]
impl CertificateStore for FailingStore {
    async fn put(&self, _certificate: StoredCertificate) -> StoreResult<()> {
        Err(unavailable())
    }

    async fn find(&self, _domain: &str, _name: &str) -> StoreResult<Option<StoredCertificate>> {
        Err(unavailable())
    }

    async fn delete(&self, _domain: &str, _name: &str) -> StoreResult<bool> {
        Err(unavailable())
    }

    async fn all(&self) -> StoreResult<Vec<StoredCertificate>> {
        Err(unavailable())
    }
}

/// Output remembering every write
#[derive(Debug, Default)]
pub struct RecordingOutput {
    writes: Mutex<Vec<OutputData>>,
    fail: AtomicBool,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let output = Self::default();
        output.set_failing(true);
        output
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<OutputData> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl OutputSink for RecordingOutput {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn write(&self, data: &OutputData) -> OutputResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OutputError::Request("output unavailable".to_string()));
        }
        self.writes.lock().push(data.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A domain `example.com` with certificate `www` wired to fakes
#[derive(Debug)]
pub struct Harness {
    pub account: Arc<FakeAccount>,
    pub dns: Arc<FakeDnsConfigurator>,
    pub query: Arc<FakeDnsQueryFactory>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingEventSink>,
    pub metrics: Arc<RenewalMetrics>,
    pub outputs: Vec<Arc<RecordingOutput>>,
    pub settings: RenewalSettings,
    pub domain: Arc<Domain>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_outputs(1)
    }

    pub fn with_outputs(count: usize) -> Self {
        Self::build(FakeAccount::valid(), FakeDnsConfigurator::new(), count)
    }

    pub fn with_dns(dns: FakeDnsConfigurator) -> Self {
        Self::build(FakeAccount::valid(), dns, 1)
    }

    pub fn with_account(account: FakeAccount) -> Self {
        Self::build(account, FakeDnsConfigurator::new(), 1)
    }

    fn build(account: FakeAccount, dns: FakeDnsConfigurator, outputs: usize) -> Self {
        let account = Arc::new(account);
        let dns = Arc::new(dns);
        let query = Arc::new(dns.query_factory());
        let outputs: Vec<Arc<RecordingOutput>> =
            (0..outputs).map(|_| Arc::new(RecordingOutput::new())).collect();

        let key = generate_private_key().expect("generate test key");
        let certificate = Certificate::new(
            "www",
            vec!["example.com".to_string(), "www.example.com".to_string()],
            key,
        )
        .expect("valid test certificate");

        let mut domain = Domain::new(
            "example.com",
            Arc::clone(&account) as Arc<dyn AcmeAccount>,
            Arc::clone(&dns) as Arc<dyn DnsConfigurator>,
        )
        .with_certificate(certificate)
        .expect("unique certificate");
        for (index, output) in outputs.iter().enumerate() {
            domain = domain
                .with_output(
                    format!("output-{}", index),
                    Arc::clone(output) as Arc<dyn OutputSink>,
                )
                .expect("unique output");
        }

        Self {
            account,
            dns,
            query,
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(Utc::now())),
            events: Arc::new(RecordingEventSink::new()),
            metrics: Arc::new(RenewalMetrics::new()),
            outputs,
            settings: RenewalSettings {
                dns_wait: Duration::from_secs(60),
                expiration_threshold: chrono::Duration::days(30),
                retry_attempts_max: 3,
            },
            domain: Arc::new(domain),
        }
    }

    pub fn services(&self) -> Services {
        self.services_with_store(Arc::clone(&self.store) as Arc<dyn CertificateStore>)
    }

    pub fn services_with_store(&self, store: Arc<dyn CertificateStore>) -> Services {
        Services {
            settings: self.settings,
            store,
            clock: self.clock.clone(),
            dns_query_factory: self.query.clone(),
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn certificate(&self) -> Arc<Certificate> {
        self.domain
            .certificate("www")
            .cloned()
            .expect("harness certificate")
    }

    pub fn context(&self) -> Arc<TaskContext> {
        Arc::new(TaskContext::new(
            self.services(),
            Arc::clone(&self.domain),
            self.certificate(),
        ))
    }

    pub fn context_with_store(&self, store: Arc<dyn CertificateStore>) -> Arc<TaskContext> {
        Arc::new(TaskContext::new(
            self.services_with_store(store),
            Arc::clone(&self.domain),
            self.certificate(),
        ))
    }

    /// Store a certificate for `www` expiring `days` from the clock's now
    pub async fn store_certificate(&self, days: i64) {
        let now = certpilot_common::Clock::now(self.clock.as_ref());
        let leaf = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        self.store
            .put(StoredCertificate {
                domain: "example.com".to_string(),
                name: "www".to_string(),
                created_on: now,
                expires_on: now + chrono::Duration::days(days),
                certificate: leaf.to_string(),
                chain: format!("{leaf}-----BEGIN CERTIFICATE-----\nBBBB\n-----END CERTIFICATE-----\n"),
            })
            .await
            .expect("memory store put");
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Context for the default harness
pub fn context() -> Arc<TaskContext> {
    Harness::new().context()
}
