//! Background certificate renewal scheduler
//!
//! Periodically runs the domain executor over every configured domain.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::Domain;
use crate::executor::{DomainExecutor, ExecutionReport};

/// Default check interval (12 hours)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Delay before the first check after startup
pub const INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Background certificate renewal scheduler
///
/// Every tick runs one renewal cycle: each domain is handed to the executor in
/// turn. Certificates that are still valid skip signing inside the executor,
/// so a cycle over fresh certificates only re-delivers them to the outputs.
pub struct RenewalScheduler {
    executor: DomainExecutor,
    domains: Vec<Arc<Domain>>,
    check_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(executor: DomainExecutor, domains: Vec<Arc<Domain>>) -> Self {
        Self {
            executor,
            domains,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to a minimum of 1 hour to avoid
    /// excessive polling.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run the renewal scheduler loop
    ///
    /// This runs indefinitely; cancel it by dropping the future.
    pub async fn run(self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            domains = self.domains.len(),
            "Starting certificate renewal scheduler"
        );

        // Initial check after a short delay
        tokio::time::sleep(INITIAL_DELAY).await;
        self.run_once().await;

        let mut interval = interval(self.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            debug!("Running scheduled certificate renewal check");
            self.run_once().await;
        }
    }

    /// Run one renewal cycle over every domain
    pub async fn run_once(&self) -> Vec<ExecutionReport> {
        let start = Instant::now();
        info!(domain_count = self.domains.len(), "Checking certificates for renewal");

        let mut reports = Vec::with_capacity(self.domains.len());
        for domain in &self.domains {
            let report = self.executor.execute(Arc::clone(domain)).await;
            for (certificate, outcome) in report.failures() {
                warn!(
                    domain = %report.domain,
                    certificate = %certificate,
                    outcome = %outcome,
                    "Certificate renewal failed"
                );
            }
            reports.push(report);
        }

        let failed = reports.iter().filter(|r| !r.is_success()).count();
        info!(
            elapsed_secs = start.elapsed().as_secs(),
            failed_domains = failed,
            "Certificate renewal check completed"
        );
        reports
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("domains", &self.domains.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAccount, Harness};

    fn scheduler(harness: &Harness) -> RenewalScheduler {
        RenewalScheduler::new(
            DomainExecutor::new(harness.services()),
            vec![Arc::clone(&harness.domain)],
        )
    }

    #[test]
    fn test_interval_is_clamped() {
        let harness = Harness::new();
        let scheduler = scheduler(&harness).with_interval(Duration::from_secs(60));
        assert_eq!(scheduler.check_interval(), MIN_CHECK_INTERVAL);

        let scheduler = scheduler.with_interval(Duration::from_secs(24 * 3600));
        assert_eq!(scheduler.check_interval(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_default_interval() {
        let harness = Harness::new();
        assert_eq!(scheduler(&harness).check_interval(), DEFAULT_CHECK_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_renews_each_domain() {
        let harness = Harness::new();
        let reports = scheduler(&harness).run_once().await;

        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_success());
        assert_eq!(harness.account.orders().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_cycle_skips_signing() {
        let harness = Harness::new();
        let scheduler = scheduler(&harness);

        scheduler.run_once().await;
        scheduler.run_once().await;

        let orders = harness.account.orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].csrs().len(), 1);
        assert!(orders[1].csrs().is_empty());
        assert_eq!(harness.metrics.issued(), 1);
        assert_eq!(harness.outputs[0].writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_cycle() {
        let failing = Harness::with_account(FakeAccount::failing());
        let working = Harness::new();
        let scheduler = RenewalScheduler::new(
            DomainExecutor::new(working.services()),
            vec![Arc::clone(&failing.domain), Arc::clone(&working.domain)],
        );

        let reports = scheduler.run_once().await;
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].is_success());
        assert!(reports[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_checks_after_initial_delay() {
        let harness = Harness::new();
        let handle = tokio::spawn(scheduler(&harness).run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(harness.account.orders().is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(harness.account.orders().len(), 1);

        handle.abort();
    }
}
