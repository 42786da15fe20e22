//! Result of one task step

use std::time::Duration;

use super::{CertificateTask, TaskError};

/// Outcome of executing a task once
///
/// Only the two failure variants count against the retry budget.
#[derive(Debug)]
pub enum TaskStatus {
    /// The stage is done; `next` continues the chain, `None` ends it
    Completed {
        delay: Duration,
        next: Option<Box<CertificateTask>>,
    },
    /// Waiting on an external party; run the same task again later
    InProgress { delay: Duration },
    /// Transient failure; run the same task again later
    FailedButCanBeRetried { delay: Duration, error: TaskError },
    /// Terminal failure for this certificate
    FailedPermanently { error: TaskError },
}

impl TaskStatus {
    pub fn completed(delay: Duration, next: CertificateTask) -> Self {
        TaskStatus::Completed {
            delay,
            next: Some(Box::new(next)),
        }
    }

    pub fn finished() -> Self {
        TaskStatus::Completed {
            delay: Duration::ZERO,
            next: None,
        }
    }

    pub fn in_progress(delay: Duration) -> Self {
        TaskStatus::InProgress { delay }
    }

    pub fn retry(delay: Duration, error: TaskError) -> Self {
        TaskStatus::FailedButCanBeRetried { delay, error }
    }

    pub fn fail(error: TaskError) -> Self {
        TaskStatus::FailedPermanently { error }
    }

    /// Delay requested before the next round
    pub fn delay(&self) -> Duration {
        match self {
            TaskStatus::Completed { delay, .. }
            | TaskStatus::InProgress { delay }
            | TaskStatus::FailedButCanBeRetried { delay, .. } => *delay,
            TaskStatus::FailedPermanently { .. } => Duration::ZERO,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::FailedButCanBeRetried { .. } | TaskStatus::FailedPermanently { .. }
        )
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            TaskStatus::FailedButCanBeRetried { error, .. }
            | TaskStatus::FailedPermanently { error } => Some(error),
            _ => None,
        }
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TaskStatus::Completed { .. } => "completed",
            TaskStatus::InProgress { .. } => "in_progress",
            TaskStatus::FailedButCanBeRetried { .. } => "retryable",
            TaskStatus::FailedPermanently { .. } => "permanent",
        }
    }
}
