//! Certificate renewal task engine
//!
//! A renewal is a fixed chain of stages:
//!
//! ```text
//! AuthorizeDnsInitial -> AuthorizeDnsCheckRecords -> AuthorizeDnsTriggerChallenges
//!     -> AuthorizeDnsUpdateChallenges -> SignCertificateInitial -> SignCertificateUpdate
//!     -> SignCertificateSaveToStore -> SignCertificateSaveToOutputs
//! ```
//!
//! Each [`CertificateTask`] holds one stage and an attempt counter. Executing
//! a task runs the stage once and returns a [`TaskStatus`]; a completed stage
//! hands back the next task, which starts again at attempt 1. Skips are
//! possible: fully valid authorizations jump straight to signing, and a still
//! valid stored certificate jumps straight to output delivery.

mod authorize;
pub mod context;
pub mod error;
mod sign;
pub mod status;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, warn, Instrument};

use crate::acme::AcmeOrder;

pub use context::{render_problem, RenewalSettings, Services, TaskContext};
pub use error::TaskError;
pub use status::TaskStatus;

/// Delay between polls of DNS and the CA
pub const POLL_DELAY: Duration = Duration::from_secs(5);

/// Delay before retrying a store or output write
pub const WRITE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Event messages emitted by the engine
pub mod events {
    pub const RENEWAL_SUCCEEDED: &str = "renewal succeeded";
    pub const RENEWAL_FAILED: &str = "renewal failed";
    pub const SIGNING_FAILED: &str = "signing failed";
    pub const STORED: &str = "certificate stored";
    pub const STORE_FAILED: &str = "certificate store failed";
}

/// A TXT record the CA will look for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedRecord {
    /// Authorization identifier
    pub domain: String,
    /// Challenge digest
    pub digest: String,
}

/// One stage of the renewal chain with the data it needs
#[derive(Clone)]
pub enum Stage {
    AuthorizeDnsInitial {
        order: Arc<dyn AcmeOrder>,
    },
    AuthorizeDnsCheckRecords {
        order: Arc<dyn AcmeOrder>,
        expected: Vec<ExpectedRecord>,
    },
    AuthorizeDnsTriggerChallenges {
        order: Arc<dyn AcmeOrder>,
    },
    AuthorizeDnsUpdateChallenges {
        order: Arc<dyn AcmeOrder>,
    },
    SignCertificateInitial {
        order: Arc<dyn AcmeOrder>,
    },
    SignCertificateUpdate {
        order: Arc<dyn AcmeOrder>,
    },
    SignCertificateSaveToStore {
        order: Arc<dyn AcmeOrder>,
    },
    SignCertificateSaveToOutputs,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::AuthorizeDnsInitial { .. } => "authorize_dns_initial",
            Stage::AuthorizeDnsCheckRecords { .. } => "authorize_dns_check_records",
            Stage::AuthorizeDnsTriggerChallenges { .. } => "authorize_dns_trigger_challenges",
            Stage::AuthorizeDnsUpdateChallenges { .. } => "authorize_dns_update_challenges",
            Stage::SignCertificateInitial { .. } => "sign_certificate_initial",
            Stage::SignCertificateUpdate { .. } => "sign_certificate_update",
            Stage::SignCertificateSaveToStore { .. } => "sign_certificate_save_to_store",
            Stage::SignCertificateSaveToOutputs => "sign_certificate_save_to_outputs",
        }
    }

    /// Called instead of the stage logic once the retry budget is spent
    fn on_retries_exhausted(&self, context: &TaskContext, last_error: Option<&TaskError>) {
        if let (Stage::SignCertificateSaveToStore { .. }, Some(TaskError::Store(_))) =
            (self, last_error)
        {
            sign::store_failed(context);
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::AuthorizeDnsCheckRecords { expected, .. } => f
                .debug_struct("AuthorizeDnsCheckRecords")
                .field("expected", expected)
                .finish_non_exhaustive(),
            other => f.write_str(other.name()),
        }
    }
}

/// A stage of one certificate's renewal together with its retry counter
#[derive(Debug)]
pub struct CertificateTask {
    context: Arc<TaskContext>,
    attempt: u32,
    stage: Stage,
    last_error: Option<TaskError>,
}

impl CertificateTask {
    pub fn new(context: Arc<TaskContext>, stage: Stage) -> Self {
        Self {
            context,
            attempt: 1,
            stage,
            last_error: None,
        }
    }

    /// First task of a renewal chain
    pub fn initial(context: Arc<TaskContext>, order: Arc<dyn AcmeOrder>) -> Self {
        Self::new(context, Stage::AuthorizeDnsInitial { order })
    }

    /// A fresh task for `stage` sharing this task's context
    pub(crate) fn next(&self, stage: Stage) -> Self {
        Self::new(Arc::clone(&self.context), stage)
    }

    pub fn context(&self) -> &Arc<TaskContext> {
        &self.context
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Run the stage once
    ///
    /// Failed steps consume one attempt. Once attempts exceed the configured
    /// maximum the task fails permanently without running the stage again.
    pub async fn execute(&mut self) -> TaskStatus {
        let span = info_span!(
            "certificate_task",
            domain = %self.context.domain().name(),
            certificate = %self.context.certificate().name(),
            stage = self.stage.name(),
            attempt = self.attempt,
            attempt_max = self.context.settings().retry_attempts_max,
        );
        self.execute_step().instrument(span).await
    }

    async fn execute_step(&mut self) -> TaskStatus {
        let attempt_max = self.context.settings().retry_attempts_max;
        let stage = self.stage.name();

        if self.attempt > attempt_max {
            warn!("Retry budget exhausted");
            self.stage
                .on_retries_exhausted(&self.context, self.last_error.as_ref());
            self.context.metrics().record_task_failure(stage, "exhausted");
            return TaskStatus::fail(TaskError::RetriesExceeded {
                attempts: attempt_max,
            });
        }

        let status = self.run_stage().await;

        if let Some(error) = status.error() {
            warn!(kind = status.kind(), error = %error, "Task step failed");
            self.context.metrics().record_task_failure(stage, status.kind());
            self.attempt += 1;
            self.last_error = Some(error.clone());
        } else {
            debug!(status = status.kind(), delay_ms = status.delay().as_millis() as u64, "Task step finished");
        }

        status
    }

    async fn run_stage(&self) -> TaskStatus {
        match &self.stage {
            Stage::AuthorizeDnsInitial { order } => authorize::initial(self, order).await,
            Stage::AuthorizeDnsCheckRecords { order, expected } => {
                authorize::check_records(self, order, expected).await
            }
            Stage::AuthorizeDnsTriggerChallenges { order } => {
                authorize::trigger_challenges(self, order).await
            }
            Stage::AuthorizeDnsUpdateChallenges { order } => {
                authorize::update_challenges(self, order).await
            }
            Stage::SignCertificateInitial { order } => sign::initial(self, order).await,
            Stage::SignCertificateUpdate { order } => sign::update(self, order).await,
            Stage::SignCertificateSaveToStore { order } => sign::save_to_store(self, order).await,
            Stage::SignCertificateSaveToOutputs => sign::save_to_outputs(self).await,
        }
    }
}
