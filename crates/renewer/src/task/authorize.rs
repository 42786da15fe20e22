//! DNS-01 authorization stages

use std::sync::Arc;
use std::time::Duration;

use certpilot_common::Event;
use tracing::{debug, info, warn};

use super::context::{render_optional_problem, TaskContext};
use super::{events, CertificateTask, ExpectedRecord, Stage, TaskError, TaskStatus, POLL_DELAY};
use crate::acme::{AcmeOrder, AcmeStatus};
use crate::dns::challenge_record_name;

/// Publish a TXT record for every authorization that is not yet valid
pub(super) async fn initial(task: &CertificateTask, order: &Arc<dyn AcmeOrder>) -> TaskStatus {
    let ctx = task.context();
    let dns = ctx.domain().dns();
    let mut expected = Vec::new();

    for authorization in order.authorizations() {
        let domain = authorization.domain();
        if authorization.status() == AcmeStatus::Valid {
            debug!(authorization = %domain, "Authorization already valid");
            continue;
        }

        let Some(challenge) = authorization.dns01_challenge() else {
            return TaskStatus::fail(TaskError::MissingChallenge { domain });
        };

        let name = challenge_record_name(&domain);
        let digest = challenge.digest();
        if ctx.has_dns_record(&name, &digest) {
            debug!(record = %name, "TXT record created by an earlier attempt");
            expected.push(ExpectedRecord { domain, digest });
            continue;
        }

        if let Err(e) = dns.create_txt_record(&name, &digest).await {
            warn!(record = %name, error = %e, label = e.as_label(), "Failed to create TXT record");
            return TaskStatus::retry(
                POLL_DELAY,
                TaskError::DnsRecord {
                    name,
                    message: e.to_string(),
                },
            );
        }

        info!(record = %name, authorization = %domain, "Created challenge TXT record");
        ctx.record_dns_record(&name, &digest);
        ctx.metrics().record_dns_record_created();
        expected.push(ExpectedRecord { domain, digest });
    }

    if expected.is_empty() {
        info!("All authorizations already valid");
        return TaskStatus::completed(
            Duration::ZERO,
            task.next(Stage::SignCertificateInitial {
                order: Arc::clone(order),
            }),
        );
    }

    TaskStatus::completed(
        ctx.settings().dns_wait,
        task.next(Stage::AuthorizeDnsCheckRecords {
            order: Arc::clone(order),
            expected,
        }),
    )
}

/// Wait until every expected record is visible at the authoritative servers
pub(super) async fn check_records(
    task: &CertificateTask,
    order: &Arc<dyn AcmeOrder>,
    expected: &[ExpectedRecord],
) -> TaskStatus {
    let ctx = task.context();
    let mut missing = 0usize;

    for record in expected {
        let name = challenge_record_name(&record.domain);
        let wanted = format!("\"{}\"", record.digest);
        if is_published(ctx, &name, &wanted).await {
            debug!(record = %name, "TXT record visible");
        } else {
            debug!(record = %name, "TXT record not visible yet");
            missing += 1;
        }
    }

    if missing > 0 {
        info!(missing, total = expected.len(), "Waiting for TXT records to propagate");
        return TaskStatus::in_progress(POLL_DELAY);
    }

    info!("All TXT records propagated");
    TaskStatus::completed(
        Duration::ZERO,
        task.next(Stage::AuthorizeDnsTriggerChallenges {
            order: Arc::clone(order),
        }),
    )
}

/// Look `name` up at its authoritative servers; lookup errors count as absent
async fn is_published(ctx: &TaskContext, name: &str, wanted: &str) -> bool {
    let factory = ctx.dns_query_factory();

    let system = match factory.create(&[]).await {
        Ok(query) => query,
        Err(e) => {
            warn!(record = %name, error = %e, "Failed to create DNS query");
            return false;
        }
    };

    let servers = match system.find_authoritative_name_servers(name).await {
        Ok(servers) => servers,
        Err(e) => {
            warn!(record = %name, error = %e, "Failed to find authoritative nameservers");
            return false;
        }
    };

    let query = if servers.is_empty() {
        debug!(record = %name, "No authoritative nameservers found, using system resolver");
        system
    } else {
        match factory.create(&servers).await {
            Ok(query) => query,
            Err(e) => {
                warn!(record = %name, servers = ?servers, error = %e, "Failed to query authoritative nameservers");
                return false;
            }
        }
    };

    match query.find_txt_records(name).await {
        Ok(records) => records.iter().any(|r| r.value == wanted),
        Err(e) => {
            warn!(record = %name, error = %e, "TXT lookup failed");
            false
        }
    }
}

/// Ask the CA to validate every pending challenge
pub(super) async fn trigger_challenges(
    task: &CertificateTask,
    order: &Arc<dyn AcmeOrder>,
) -> TaskStatus {
    let mut errors = Vec::new();

    for authorization in order.authorizations() {
        let domain = authorization.domain();
        let Some(challenge) = authorization.dns01_challenge() else {
            if authorization.status() == AcmeStatus::Valid {
                continue;
            }
            return TaskStatus::fail(TaskError::MissingChallenge { domain });
        };

        match challenge.status() {
            AcmeStatus::Invalid => {
                let problem = challenge
                    .error()
                    .or_else(|| order.error());
                let problem = render_optional_problem(problem.as_ref(), "challenge is invalid");
                warn!(authorization = %domain, problem = %problem, "Challenge is invalid");
                return TaskStatus::fail(TaskError::ChallengeInvalid { domain, problem });
            }
            AcmeStatus::Pending => match challenge.trigger().await {
                Ok(()) => info!(authorization = %domain, "Challenge triggered"),
                Err(e) => {
                    warn!(authorization = %domain, error = %e, "Failed to trigger challenge");
                    errors.push(format!("{}: {}", domain, e));
                }
            },
            status => {
                debug!(authorization = %domain, status = %status, "Challenge not pending, not triggering");
            }
        }
    }

    if !errors.is_empty() {
        return TaskStatus::retry(POLL_DELAY, TaskError::Acme(errors.join("; ")));
    }

    TaskStatus::completed(
        Duration::ZERO,
        task.next(Stage::AuthorizeDnsUpdateChallenges {
            order: Arc::clone(order),
        }),
    )
}

/// Poll challenges until each is valid or has failed
pub(super) async fn update_challenges(
    task: &CertificateTask,
    order: &Arc<dyn AcmeOrder>,
) -> TaskStatus {
    let ctx = task.context();
    let mut succeeded = 0usize;
    let mut pending = 0usize;
    let mut failed = Vec::new();
    let mut errors = Vec::new();

    for authorization in order.authorizations() {
        let domain = authorization.domain();
        let Some(challenge) = authorization.dns01_challenge() else {
            if authorization.status() == AcmeStatus::Valid {
                succeeded += 1;
            } else {
                failed.push(format!("{}: no DNS-01 challenge", domain));
            }
            continue;
        };

        match challenge.status() {
            AcmeStatus::Valid => succeeded += 1,
            AcmeStatus::Pending
            | AcmeStatus::Unknown
            | AcmeStatus::Processing
            | AcmeStatus::Ready => {
                pending += 1;
                if let Err(e) = challenge.update().await {
                    warn!(authorization = %domain, error = %e, "Failed to refresh challenge");
                    errors.push(format!("{}: {}", domain, e));
                }
            }
            status @ (AcmeStatus::Invalid
            | AcmeStatus::Revoked
            | AcmeStatus::Deactivated
            | AcmeStatus::Expired
            | AcmeStatus::Canceled) => {
                let problem = render_optional_problem(challenge.error().as_ref(), status.as_str());
                warn!(authorization = %domain, status = %status, problem = %problem, "Challenge failed");
                failed.push(format!("{}: {}", domain, problem));
            }
        }
    }

    let total = succeeded + pending + failed.len();
    let certificate = ctx.certificate().name();
    let domain = ctx.domain().name();

    if succeeded == total {
        info!("All challenges valid");
        ctx.events().emit(
            Event::success(events::RENEWAL_SUCCEEDED)
                .with("domain", domain)
                .with("certificate", certificate),
        );
        return TaskStatus::completed(
            Duration::ZERO,
            task.next(Stage::SignCertificateInitial {
                order: Arc::clone(order),
            }),
        );
    }

    if !failed.is_empty() && pending == 0 {
        let reason = failed.join("\n");
        ctx.events().emit(
            Event::failure(events::RENEWAL_FAILED)
                .with("domain", domain)
                .with("certificate", certificate)
                .with("reason", &reason),
        );
        return TaskStatus::fail(TaskError::AuthorizationFailed(reason));
    }

    if !errors.is_empty() {
        return TaskStatus::retry(POLL_DELAY, TaskError::Acme(errors.join("; ")));
    }

    debug!(succeeded, pending, failed = failed.len(), "Challenges still pending");
    TaskStatus::in_progress(POLL_DELAY)
}
