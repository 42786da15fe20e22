//! Domain executor
//!
//! Runs every certificate of one domain through its renewal chain in lockstep
//! rounds, then removes every TXT record the run created.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::Domain;
use crate::task::{CertificateTask, Services, TaskContext, TaskStatus};

/// Final outcome of one certificate in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateOutcome {
    /// The chain ran to completion
    Succeeded,
    /// A task failed permanently
    Failed { reason: String },
    /// The CA refused to open an order
    OrderFailed { reason: String },
}

impl CertificateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CertificateOutcome::Succeeded)
    }
}

impl fmt::Display for CertificateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateOutcome::Succeeded => f.write_str("succeeded"),
            CertificateOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            CertificateOutcome::OrderFailed { reason } => write!(f, "order failed: {}", reason),
        }
    }
}

/// Summary of one domain run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub domain: String,
    pub certificates: BTreeMap<String, CertificateOutcome>,
    pub dns_records_cleaned: usize,
    pub dns_cleanup_failures: usize,
}

impl ExecutionReport {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            certificates: BTreeMap::new(),
            dns_records_cleaned: 0,
            dns_cleanup_failures: 0,
        }
    }

    /// Every certificate succeeded
    pub fn is_success(&self) -> bool {
        self.certificates.values().all(CertificateOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&String, &CertificateOutcome)> {
        self.certificates.iter().filter(|(_, o)| !o.is_success())
    }
}

/// Tasks after one round
#[derive(Debug)]
pub struct Round {
    /// Tasks to run in the next round, in order
    pub active: Vec<CertificateTask>,
    /// Longest delay any task asked for
    pub delay: Duration,
    /// Certificates whose chain ended this round
    pub finished: Vec<(String, CertificateOutcome)>,
}

/// Reclassify the tasks of a round by the status each one returned
///
/// `Completed` with a next task replaces the task, `Completed` without one
/// finishes it successfully, `InProgress` and retryable failures keep it, and
/// permanent failures finish it.
pub fn step(outcomes: Vec<(CertificateTask, TaskStatus)>) -> Round {
    let mut active = Vec::with_capacity(outcomes.len());
    let mut finished = Vec::new();
    let mut delay = Duration::ZERO;

    for (task, status) in outcomes {
        delay = delay.max(status.delay());
        match status {
            TaskStatus::Completed {
                next: Some(next), ..
            } => active.push(*next),
            TaskStatus::Completed { next: None, .. } => {
                finished.push((certificate_name(&task), CertificateOutcome::Succeeded));
            }
            TaskStatus::InProgress { .. } | TaskStatus::FailedButCanBeRetried { .. } => {
                active.push(task);
            }
            TaskStatus::FailedPermanently { error } => {
                finished.push((
                    certificate_name(&task),
                    CertificateOutcome::Failed {
                        reason: error.to_string(),
                    },
                ));
            }
        }
    }

    Round {
        active,
        delay,
        finished,
    }
}

fn certificate_name(task: &CertificateTask) -> String {
    task.context().certificate().name().to_string()
}

/// Drives the renewal of every certificate of a domain
#[derive(Debug, Clone)]
pub struct DomainExecutor {
    services: Services,
}

impl DomainExecutor {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Renew every certificate of `domain`
    ///
    /// Never fails: per-certificate errors end up in the report and DNS
    /// cleanup always runs.
    pub async fn execute(&self, domain: Arc<Domain>) -> ExecutionReport {
        let span = info_span!("domain_execution", domain = %domain.name());
        self.execute_inner(domain).instrument(span).await
    }

    async fn execute_inner(&self, domain: Arc<Domain>) -> ExecutionReport {
        let start = Instant::now();
        let mut report = ExecutionReport::new(domain.name());
        let mut contexts = Vec::new();
        let mut active = Vec::new();

        info!(
            certificates = domain.certificates().len(),
            "Starting domain renewal"
        );

        for (name, certificate) in domain.certificates() {
            let order = match domain.account().new_order(certificate.hosts()).await {
                Ok(order) => order,
                Err(e) => {
                    error!(certificate = %name, error = %e, label = e.as_label(), "Failed to create order");
                    report.certificates.insert(
                        name.clone(),
                        CertificateOutcome::OrderFailed {
                            reason: e.to_string(),
                        },
                    );
                    continue;
                }
            };

            let context = Arc::new(TaskContext::new(
                self.services.clone(),
                Arc::clone(&domain),
                Arc::clone(certificate),
            ));
            contexts.push(Arc::clone(&context));
            active.push(CertificateTask::initial(context, order));
        }

        let mut rounds = 0u64;
        while !active.is_empty() {
            rounds += 1;
            let mut outcomes = Vec::with_capacity(active.len());
            for mut task in active {
                let status = task.execute().await;
                outcomes.push((task, status));
            }

            let round = step(outcomes);
            for (name, outcome) in round.finished {
                match &outcome {
                    CertificateOutcome::Succeeded => info!(certificate = %name, "Certificate renewal finished"),
                    other => warn!(certificate = %name, outcome = %other, "Certificate renewal failed"),
                }
                report.certificates.insert(name, outcome);
            }

            active = round.active;
            if !active.is_empty() && !round.delay.is_zero() {
                debug!(
                    round = rounds,
                    active = active.len(),
                    delay_ms = round.delay.as_millis() as u64,
                    "Waiting before next round"
                );
                tokio::time::sleep(round.delay).await;
            }
        }

        self.cleanup(&domain, &contexts, &mut report).await;

        info!(
            rounds,
            elapsed_ms = start.elapsed().as_millis() as u64,
            succeeded = report.certificates.values().filter(|o| o.is_success()).count(),
            failed = report.failures().count(),
            "Domain renewal finished"
        );
        report
    }

    async fn cleanup(
        &self,
        domain: &Domain,
        contexts: &[Arc<TaskContext>],
        report: &mut ExecutionReport,
    ) {
        for context in contexts {
            for (name, value) in context.dns_records() {
                match domain.dns().delete_txt_record(&name, &value).await {
                    Ok(()) => {
                        debug!(record = %name, "Deleted challenge TXT record");
                        report.dns_records_cleaned += 1;
                    }
                    Err(e) => {
                        warn!(
                            record = %name,
                            provider = domain.dns().name(),
                            error = %e,
                            label = e.as_label(),
                            "Failed to delete challenge TXT record"
                        );
                        self.services.metrics.record_dns_cleanup_failure();
                        report.dns_cleanup_failures += 1;
                    }
                }
            }
        }
    }
}
