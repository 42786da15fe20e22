//! End-to-end renewal runs against in-process fakes

use std::sync::Arc;

use certpilot_common::{ManualClock, RecordingEventSink, RenewalMetrics};
use certpilot_renewer::acme::AcmeAccount;
use certpilot_renewer::dns::DnsConfigurator;
use certpilot_renewer::domain::generate_private_key;
use certpilot_renewer::output::{FilesOutput, OutputSink};
use certpilot_renewer::store::{CertificateStore, FilesystemStore};
use certpilot_renewer::task::events;
use certpilot_renewer::testing::{FakeAccount, FakeDnsConfigurator, Harness};
use certpilot_renewer::{
    Certificate, CertificateOutcome, Domain, DomainExecutor, RenewalSettings, Services,
};
use chrono::Utc;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_renewal_delivers_to_every_output() {
    let harness = Harness::with_outputs(3);
    let executor = DomainExecutor::new(harness.services());

    let report = executor.execute(Arc::clone(&harness.domain)).await;

    assert!(report.is_success(), "{:?}", report);
    for output in &harness.outputs {
        let writes = output.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].domain, "example.com");
    }

    // Every TXT record created during the run is gone
    assert!(harness.dns.published().is_empty());
    assert_eq!(harness.dns.deleted().len(), 2);
    assert_eq!(harness.metrics.dns_records_created(), 2);

    assert_eq!(harness.events.count(events::RENEWAL_SUCCEEDED), 1);
    assert_eq!(harness.events.count(events::STORED), 1);
    assert!(harness.events.failures().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fresh_certificate_is_only_redelivered() {
    let harness = Harness::new();
    harness.store_certificate(60).await;
    let executor = DomainExecutor::new(harness.services());

    let report = executor.execute(Arc::clone(&harness.domain)).await;

    assert!(report.is_success());
    assert!(harness.account.orders()[0].csrs().is_empty());
    assert_eq!(harness.metrics.issued(), 0);
    assert_eq!(harness.outputs[0].writes().len(), 1);
    assert!(harness.dns.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_renewal_with_filesystem_adapters() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FilesystemStore::new(&dir.path().join("store")).unwrap());
    let dns = Arc::new(FakeDnsConfigurator::new());
    let account = Arc::new(FakeAccount::valid());

    let certificate = Certificate::new(
        "api",
        vec!["api.example.org".to_string()],
        generate_private_key().unwrap(),
    )
    .unwrap();
    let domain = Domain::new(
        "example.org",
        Arc::clone(&account) as Arc<dyn AcmeAccount>,
        Arc::clone(&dns) as Arc<dyn DnsConfigurator>,
    )
    .with_certificate(certificate)
    .unwrap()
    .with_output(
        "local",
        Arc::new(FilesOutput::new(dir.path().join("out"))) as Arc<dyn OutputSink>,
    )
    .unwrap();

    let services = Services {
        settings: RenewalSettings::default(),
        store: Arc::clone(&store) as Arc<dyn CertificateStore>,
        clock: Arc::new(ManualClock::new(Utc::now())),
        dns_query_factory: Arc::new(dns.query_factory()),
        events: Arc::new(RecordingEventSink::new()),
        metrics: Arc::new(RenewalMetrics::new()),
    };

    let report = DomainExecutor::new(services)
        .execute(Arc::new(domain))
        .await;

    assert_eq!(
        report.certificates.get("api"),
        Some(&CertificateOutcome::Succeeded)
    );

    let stored = store.find("example.org", "api").await.unwrap().unwrap();
    assert!(stored.certificate.starts_with("-----BEGIN CERTIFICATE-----"));

    let out = dir.path().join("out/example.org/api");
    for file in ["cert.pem", "chain.pem", "fullchain.pem", "privkey.pem", "pubkey.pem"] {
        assert!(out.join(file).is_file(), "missing {}", file);
    }
    let cert = std::fs::read_to_string(out.join("cert.pem")).unwrap();
    assert_eq!(cert, stored.certificate);

    let full_chain = std::fs::read_to_string(out.join("fullchain.pem")).unwrap();
    assert_eq!(full_chain, stored.chain);
    assert!(full_chain.starts_with(&stored.certificate));
    assert_eq!(full_chain.matches("BEGIN CERTIFICATE").count(), 2);
    let intermediates = std::fs::read_to_string(out.join("chain.pem")).unwrap();
    assert_eq!(intermediates.matches("BEGIN CERTIFICATE").count(), 1);
    assert!(!intermediates.contains(&stored.certificate));
}
