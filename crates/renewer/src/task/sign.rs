//! Certificate signing and delivery stages

use std::sync::Arc;
use std::time::Duration;

use certpilot_common::Event;
use chrono::{DateTime, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use tracing::{debug, info, warn};

use super::context::{render_optional_problem, TaskContext};
use super::{
    events, CertificateTask, Stage, TaskError, TaskStatus, POLL_DELAY, WRITE_RETRY_DELAY,
};
use crate::acme::{AcmeOrder, AcmeStatus};
use crate::output::OutputData;
use crate::store::StoredCertificate;

/// Submit a CSR unless the stored certificate is still good
pub(super) async fn initial(task: &CertificateTask, order: &Arc<dyn AcmeOrder>) -> TaskStatus {
    let ctx = task.context();
    let certificate = ctx.certificate();

    let stored = match ctx
        .store()
        .find(ctx.domain().name(), certificate.name())
        .await
    {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, label = e.as_label(), "Failed to look up stored certificate");
            return TaskStatus::retry(WRITE_RETRY_DELAY, TaskError::Store(e.to_string()));
        }
    };

    let now = ctx.clock().now();
    let threshold = ctx.settings().expiration_threshold;
    match &stored {
        Some(existing) if !existing.expires_within(now, threshold) => {
            info!(expires = %existing.expires_on, "Stored certificate still valid, skipping signing");
            return TaskStatus::completed(
                Duration::ZERO,
                task.next(Stage::SignCertificateSaveToOutputs),
            );
        }
        Some(existing) => {
            info!(expires = %existing.expires_on, "Stored certificate expires soon, signing");
        }
        None => info!("No stored certificate, signing"),
    }

    let csr = match certificate.csr_der() {
        Ok(csr) => csr,
        Err(e) => return TaskStatus::fail(TaskError::Csr(e.to_string())),
    };

    if let Err(e) = order.execute(&csr).await {
        warn!(error = %e, "Failed to submit CSR");
        signing_failed(ctx, &e.to_string());
        return TaskStatus::fail(TaskError::Acme(e.to_string()));
    }

    info!(hosts = ?certificate.hosts(), "CSR submitted");
    TaskStatus::completed(
        POLL_DELAY,
        task.next(Stage::SignCertificateUpdate {
            order: Arc::clone(order),
        }),
    )
}

/// Poll the order until the CA has issued the certificate
pub(super) async fn update(task: &CertificateTask, order: &Arc<dyn AcmeOrder>) -> TaskStatus {
    let ctx = task.context();

    if order.status() != AcmeStatus::Valid {
        if let Err(e) = order.update().await {
            warn!(error = %e, "Failed to refresh order");
            return TaskStatus::retry(POLL_DELAY, TaskError::Acme(e.to_string()));
        }
    }

    match order.status() {
        AcmeStatus::Pending | AcmeStatus::Ready | AcmeStatus::Processing => {
            debug!(status = %order.status(), "Order not yet valid");
            TaskStatus::in_progress(POLL_DELAY)
        }
        AcmeStatus::Valid => {
            info!("Certificate issued");
            ctx.metrics().record_issued();
            TaskStatus::completed(
                Duration::ZERO,
                task.next(Stage::SignCertificateSaveToStore {
                    order: Arc::clone(order),
                }),
            )
        }
        status => {
            let problem = render_optional_problem(order.error().as_ref(), "no problem reported");
            warn!(status = %status, problem = %problem, "Order failed");
            signing_failed(ctx, &problem);
            TaskStatus::fail(TaskError::SigningFailed {
                status: status.to_string(),
                problem,
            })
        }
    }
}

/// Download the issued chain and persist it
pub(super) async fn save_to_store(
    task: &CertificateTask,
    order: &Arc<dyn AcmeOrder>,
) -> TaskStatus {
    let ctx = task.context();

    let chain = match order.certificate().await {
        Ok(Some(chain)) => chain,
        Ok(None) => {
            debug!("Certificate not available for download yet");
            return TaskStatus::retry(WRITE_RETRY_DELAY, TaskError::CertificateUnavailable);
        }
        Err(e) => {
            warn!(error = %e, "Failed to download certificate");
            return TaskStatus::retry(WRITE_RETRY_DELAY, TaskError::Acme(e.to_string()));
        }
    };

    let parsed = match parse_chain(&chain) {
        Ok(parsed) => parsed,
        Err(message) => return TaskStatus::fail(TaskError::CertificateParse(message)),
    };

    let stored = StoredCertificate {
        domain: ctx.domain().name().to_string(),
        name: ctx.certificate().name().to_string(),
        created_on: ctx.clock().now(),
        expires_on: parsed.expires_on,
        certificate: parsed.leaf,
        chain: parsed.chain,
    };
    let expires_on = stored.expires_on;

    if let Err(e) = ctx.store().put(stored).await {
        warn!(error = %e, label = e.as_label(), "Failed to store certificate");
        return TaskStatus::retry(WRITE_RETRY_DELAY, TaskError::Store(e.to_string()));
    }

    ctx.events().emit(
        Event::success(events::STORED)
            .with("domain", ctx.domain().name())
            .with("certificate", ctx.certificate().name())
            .with("expires_on", expires_on.to_rfc3339()),
    );
    TaskStatus::completed(Duration::ZERO, task.next(Stage::SignCertificateSaveToOutputs))
}

/// Deliver the stored certificate to every output of the domain
pub(super) async fn save_to_outputs(task: &CertificateTask) -> TaskStatus {
    let ctx = task.context();
    let domain = ctx.domain();
    let certificate = ctx.certificate();

    let stored = match ctx.store().find(domain.name(), certificate.name()).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return TaskStatus::fail(TaskError::MissingStoredCertificate),
        Err(e) => {
            warn!(error = %e, "Failed to load stored certificate");
            return TaskStatus::retry(WRITE_RETRY_DELAY, TaskError::Store(e.to_string()));
        }
    };

    let data = OutputData {
        domain: domain.name().to_string(),
        certificate_name: certificate.name().to_string(),
        public_key: certificate.public_key_pem().to_string(),
        private_key: certificate.private_key_pem().to_string(),
        certificate: stored.certificate,
        chain: stored.chain,
    };

    let mut failures = Vec::new();
    for (name, output) in domain.outputs() {
        match output.write(&data).await {
            Ok(()) => debug!(output = %name, "Output written"),
            Err(e) => {
                warn!(output = %name, error = %e, label = e.as_label(), "Output failed");
                failures.push(format!("{}: {}", name, e));
            }
        }
    }

    if !failures.is_empty() {
        return TaskStatus::retry(WRITE_RETRY_DELAY, TaskError::Output(failures.join("; ")));
    }

    info!(outputs = domain.outputs().len(), "Certificate delivered");
    TaskStatus::finished()
}

/// Emitted when the store stage gives up
pub(super) fn store_failed(ctx: &TaskContext) {
    ctx.events().emit(
        Event::failure(events::STORE_FAILED)
            .with("domain", ctx.domain().name())
            .with("certificate", ctx.certificate().name()),
    );
}

fn signing_failed(ctx: &TaskContext, reason: &str) {
    ctx.events().emit(
        Event::failure(events::SIGNING_FAILED)
            .with("domain", ctx.domain().name())
            .with("certificate", ctx.certificate().name())
            .with("reason", reason),
    );
}

/// Leaf, full chain and leaf expiry of a downloaded PEM chain
#[derive(Debug)]
pub(crate) struct ParsedChain {
    pub leaf: String,
    pub chain: String,
    pub expires_on: DateTime<Utc>,
}

pub(crate) fn parse_chain(pem_chain: &str) -> Result<ParsedChain, String> {
    let blocks = pem::parse_many(pem_chain).map_err(|e| format!("invalid PEM: {}", e))?;
    let certificates: Vec<&Pem> = blocks.iter().filter(|p| p.tag() == "CERTIFICATE").collect();
    let leaf = certificates
        .first()
        .ok_or_else(|| "no certificate in PEM chain".to_string())?;

    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.contents())
        .map_err(|e| format!("invalid leaf certificate: {}", e))?;
    let not_after = parsed.validity().not_after.timestamp();
    let expires_on = DateTime::<Utc>::from_timestamp(not_after, 0)
        .ok_or_else(|| format!("notAfter out of range: {}", not_after))?;

    Ok(ParsedChain {
        leaf: encode(leaf),
        chain: certificates.iter().map(|p| encode(p)).collect(),
        expires_on,
    })
}

fn encode(block: &Pem) -> String {
    pem::encode_config(block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}
