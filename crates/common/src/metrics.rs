//! Prometheus metrics for certificate renewal
//!
//! Counters are created unregistered so that several engines (and tests) can
//! coexist in one process; call [`RenewalMetrics::register`] to expose them
//! through a [`Registry`].

use anyhow::{Context, Result};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Counters describing renewal activity
#[derive(Debug, Clone)]
pub struct RenewalMetrics {
    /// Certificates issued by the CA
    certificates_issued: IntCounter,
    /// Task steps that reported a failure, by stage and kind
    task_failures: IntCounterVec,
    /// TXT records created for DNS-01 challenges
    dns_records_created: IntCounter,
    /// TXT records that could not be removed after a run
    dns_cleanup_failures: IntCounter,
}

impl RenewalMetrics {
    /// Create a new, unregistered set of counters
    pub fn new() -> Self {
        let certificates_issued = IntCounter::new(
            "certpilot_certificates_issued_total",
            "Total number of certificates issued by the ACME server",
        )
        .expect("static metric definition");
        let task_failures = IntCounterVec::new(
            Opts::new(
                "certpilot_task_failures_total",
                "Total number of failed renewal task steps",
            ),
            &["stage", "kind"],
        )
        .expect("static metric definition");
        let dns_records_created = IntCounter::new(
            "certpilot_dns_records_created_total",
            "Total number of DNS-01 TXT records created",
        )
        .expect("static metric definition");
        let dns_cleanup_failures = IntCounter::new(
            "certpilot_dns_cleanup_failures_total",
            "Total number of DNS-01 TXT records that could not be deleted",
        )
        .expect("static metric definition");

        Self {
            certificates_issued,
            task_failures,
            dns_records_created,
            dns_cleanup_failures,
        }
    }

    /// Register every counter with `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry
            .register(Box::new(self.certificates_issued.clone()))
            .context("Failed to register certificates_issued metric")?;
        registry
            .register(Box::new(self.task_failures.clone()))
            .context("Failed to register task_failures metric")?;
        registry
            .register(Box::new(self.dns_records_created.clone()))
            .context("Failed to register dns_records_created metric")?;
        registry
            .register(Box::new(self.dns_cleanup_failures.clone()))
            .context("Failed to register dns_cleanup_failures metric")?;
        Ok(())
    }

    pub fn record_issued(&self) {
        self.certificates_issued.inc();
    }

    pub fn record_task_failure(&self, stage: &str, kind: &str) {
        self.task_failures.with_label_values(&[stage, kind]).inc();
    }

    pub fn record_dns_record_created(&self) {
        self.dns_records_created.inc();
    }

    pub fn record_dns_cleanup_failure(&self) {
        self.dns_cleanup_failures.inc();
    }

    pub fn issued(&self) -> u64 {
        self.certificates_issued.get()
    }

    pub fn task_failures(&self, stage: &str, kind: &str) -> u64 {
        self.task_failures.with_label_values(&[stage, kind]).get()
    }

    pub fn dns_records_created(&self) -> u64 {
        self.dns_records_created.get()
    }

    pub fn dns_cleanup_failures(&self) -> u64 {
        self.dns_cleanup_failures.get()
    }
}

impl Default for RenewalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Render every metric of `registry` in the text exposition format
pub fn render(registry: &Registry) -> Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = RenewalMetrics::new();
        assert_eq!(metrics.issued(), 0);
        assert_eq!(metrics.dns_records_created(), 0);
        assert_eq!(metrics.task_failures("sign_certificate_update", "retryable"), 0);
    }

    #[test]
    fn test_register_and_render() {
        let registry = Registry::new();
        let metrics = RenewalMetrics::new();
        metrics.register(&registry).unwrap();

        metrics.record_issued();
        metrics.record_task_failure("authorize_dns_initial", "retryable");

        let text = render(&registry).unwrap();
        assert!(text.contains("certpilot_certificates_issued_total 1"));
        assert!(text.contains("stage=\"authorize_dns_initial\""));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let metrics = RenewalMetrics::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
