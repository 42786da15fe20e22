//! certpilot renewal engine
//!
//! Issues and renews X.509 certificates over ACME using DNS-01 challenges and
//! hands the results to output sinks.
//!
//! - [`task`] - per-certificate renewal state machine
//! - [`executor`] - runs every certificate of a domain in lockstep rounds
//! - [`scheduler`] - periodic renewal cycles
//! - [`acme`], [`dns`], [`store`], [`output`] - adapter seams and their
//!   shipped implementations
//! - [`registry`] - DNS and output providers by type name
//! - [`bootstrap`] - builds all of the above from configuration
//!
//! # Example
//!
//! ```ignore
//! use certpilot_renewer::{bootstrap, DomainExecutor, Registry};
//!
//! let services = bootstrap::build_services(&config, events, metrics)?;
//! let domains = bootstrap::build_domains(&config, &Registry::with_builtin()).await?;
//! let executor = DomainExecutor::new(services);
//! for domain in domains {
//!     let report = executor.execute(domain).await;
//!     println!("{:?}", report);
//! }
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod bootstrap;
pub mod dns;
pub mod domain;
pub mod executor;
pub mod output;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use domain::{Certificate, Domain, DomainError};
pub use executor::{step, CertificateOutcome, DomainExecutor, ExecutionReport, Round};
pub use registry::{Registry, RegistryError};
pub use scheduler::RenewalScheduler;
pub use task::{CertificateTask, RenewalSettings, Services, Stage, TaskContext, TaskError, TaskStatus};
