//! Shared state of one certificate's renewal attempt

use std::sync::Arc;
use std::time::Duration;

use certpilot_common::{Clock, EventSink, RenewalMetrics};
use certpilot_config::RenewalConfig;
use parking_lot::Mutex;

use crate::acme::Problem;
use crate::dns::DnsQueryFactory;
use crate::domain::{Certificate, Domain};
use crate::store::CertificateStore;

/// Engine timing and retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalSettings {
    /// Wait after creating TXT records before the first propagation check
    pub dns_wait: Duration,
    /// Renew when the stored certificate expires within this window
    pub expiration_threshold: chrono::Duration,
    /// Failed attempts allowed per stage
    pub retry_attempts_max: u32,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self::from(&RenewalConfig::default())
    }
}

impl From<&RenewalConfig> for RenewalSettings {
    fn from(config: &RenewalConfig) -> Self {
        Self {
            dns_wait: config.dns_wait(),
            expiration_threshold: config.expiration_threshold(),
            retry_attempts_max: u32::try_from(config.retry_attempts_max).unwrap_or(u32::MAX),
        }
    }
}

/// Collaborators shared by every task of a run
#[derive(Debug, Clone)]
pub struct Services {
    pub settings: RenewalSettings,
    pub store: Arc<dyn CertificateStore>,
    pub clock: Arc<dyn Clock>,
    pub dns_query_factory: Arc<dyn DnsQueryFactory>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<RenewalMetrics>,
}

/// Context of one (domain, certificate) renewal attempt
///
/// Shared by every task of the chain. The only mutable state is the list of
/// TXT records created so far, read by the executor's cleanup pass.
#[derive(Debug)]
pub struct TaskContext {
    services: Services,
    domain: Arc<Domain>,
    certificate: Arc<Certificate>,
    dns_records: Mutex<Vec<(String, String)>>,
}

impl TaskContext {
    pub fn new(services: Services, domain: Arc<Domain>, certificate: Arc<Certificate>) -> Self {
        Self {
            services,
            domain,
            certificate,
            dns_records: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &RenewalSettings {
        &self.services.settings
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.services.store
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn certificate(&self) -> &Arc<Certificate> {
        &self.certificate
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.services.clock
    }

    pub fn dns_query_factory(&self) -> &Arc<dyn DnsQueryFactory> {
        &self.services.dns_query_factory
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.services.events
    }

    pub fn metrics(&self) -> &Arc<RenewalMetrics> {
        &self.services.metrics
    }

    /// Remember a created TXT record for cleanup; duplicates are ignored
    pub fn record_dns_record(&self, name: &str, value: &str) {
        let mut records = self.dns_records.lock();
        if !records.iter().any(|(n, v)| n == name && v == value) {
            records.push((name.to_string(), value.to_string()));
        }
    }

    /// Whether `(name, value)` was already created for this renewal
    pub fn has_dns_record(&self, name: &str, value: &str) -> bool {
        self.dns_records
            .lock()
            .iter()
            .any(|(n, v)| n == name && v == value)
    }

    /// Every TXT record created so far, in creation order
    pub fn dns_records(&self) -> Vec<(String, String)> {
        self.dns_records.lock().clone()
    }
}

/// Render a CA problem as `title: detail`, sub-problems indented below
pub fn render_problem(problem: &Problem) -> String {
    let mut out = String::new();
    render_into(problem, 0, &mut out);
    out
}

fn render_into(problem: &Problem, depth: usize, out: &mut String) {
    if depth > 0 {
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
    }

    match (&problem.title, &problem.detail) {
        (Some(title), Some(detail)) => {
            out.push_str(title);
            out.push_str(": ");
            out.push_str(detail);
        }
        (Some(text), None) | (None, Some(text)) => out.push_str(text),
        (None, None) => out.push_str(problem.kind.as_deref().unwrap_or("unknown problem")),
    }

    for sub in &problem.subproblems {
        render_into(sub, depth + 1, out);
    }
}

/// Render an optional problem, falling back to `fallback`
pub fn render_optional_problem(problem: Option<&Problem>, fallback: &str) -> String {
    problem
        .map(render_problem)
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    #[test]
    fn test_render_problem_flat() {
        let problem = Problem::new("DNS problem").with_title("Unauthorized");
        assert_eq!(render_problem(&problem), "Unauthorized: DNS problem");
    }

    #[test]
    fn test_render_problem_nested() {
        let problem = Problem::new("Some identifiers failed")
            .with_title("Compound")
            .with_subproblem(
                Problem::new("NXDOMAIN looking up TXT")
                    .with_title("dns")
                    .with_subproblem(Problem::new("inner")),
            )
            .with_subproblem(Problem::new("timeout"));

        assert_eq!(
            render_problem(&problem),
            "Compound: Some identifiers failed\n  dns: NXDOMAIN looking up TXT\n    inner\n  timeout"
        );
    }

    #[test]
    fn test_render_problem_kind_only() {
        let problem = Problem {
            kind: Some("urn:ietf:params:acme:error:rateLimited".into()),
            ..Default::default()
        };
        assert_eq!(
            render_problem(&problem),
            "urn:ietf:params:acme:error:rateLimited"
        );
    }

    #[test]
    fn test_record_dns_record_deduplicates() {
        let ctx = context();
        ctx.record_dns_record("_acme-challenge.example.com.", "a");
        ctx.record_dns_record("_acme-challenge.example.com.", "a");
        ctx.record_dns_record("_acme-challenge.example.com.", "b");

        assert_eq!(
            ctx.dns_records(),
            vec![
                ("_acme-challenge.example.com.".to_string(), "a".to_string()),
                ("_acme-challenge.example.com.".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_settings_from_config() {
        let settings = RenewalSettings::from(&RenewalConfig {
            dns_wait_secs: 7,
            renew_before_days: 10,
            retry_attempts_max: 4,
            check_interval_hours: 1,
        });
        assert_eq!(settings.dns_wait, Duration::from_secs(7));
        assert_eq!(settings.expiration_threshold, chrono::Duration::days(10));
        assert_eq!(settings.retry_attempts_max, 4);
    }
}
