//! certpilot - ACME DNS-01 certificate renewal daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use certpilot_common::{init_tracing, LogEventSink, LogFormat, RenewalMetrics};
use certpilot_config::Config;
use certpilot_renewer::store::CertificateStore;
use certpilot_renewer::{bootstrap, DomainExecutor, ExecutionReport, Registry, RenewalScheduler};

/// certpilot - keeps ACME certificates renewed via DNS-01
#[derive(Parser, Debug)]
#[command(name = "certpilot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "CERTPILOT_CONFIG",
        default_value = "/etc/certpilot/certpilot.kdl"
    )]
    config: PathBuf,

    /// Log format (json, pretty, compact); defaults to CERTPILOT_LOG_FORMAT
    #[arg(long = "log-format")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Check,
    /// Run one renewal cycle and exit
    Renew {
        /// Only renew this domain
        #[arg(long = "domain")]
        domain: Option<String>,

        /// Print metrics in Prometheus text format afterwards
        #[arg(long = "metrics")]
        metrics: bool,
    },
    /// Renew periodically until interrupted
    Run,
    /// List stored certificates
    List,
    /// Remove a stored certificate
    Delete {
        /// Domain name
        domain: String,
        /// Certificate name within the domain
        certificate: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_env_or(LogFormat::default()));
    let log_level = if cli.verbose { "debug" } else { "info" };
    init_tracing(format, log_level)?;

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    info!(path = %cli.config.display(), domains = config.domains.len(), "Configuration loaded");

    match cli.command {
        Commands::Check => check(&cli.config, &config),
        Commands::Renew { domain, metrics } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(renew(config, domain, metrics))
        }
        Commands::Run => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(config))
        }
        Commands::List => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(list(&config))
        }
        Commands::Delete {
            domain,
            certificate,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(delete(&config, &domain, &certificate))
        }
    }
}

/// Print a configuration summary
fn check(path: &std::path::Path, config: &Config) -> Result<()> {
    let registry = Registry::with_builtin();

    for domain in &config.domains {
        if !registry.dns_providers().contains(&domain.dns.provider.as_str()) {
            bail!(
                "Domain '{}' uses unknown DNS provider '{}'",
                domain.name,
                domain.dns.provider
            );
        }
        for output in &domain.outputs {
            if !registry
                .output_providers()
                .contains(&output.provider.provider.as_str())
            {
                bail!(
                    "Output '{}' of domain '{}' uses unknown provider '{}'",
                    output.name,
                    domain.name,
                    output.provider.provider
                );
            }
        }

        println!(
            "{}: {} certificate(s), {} output(s), dns={}",
            domain.name,
            domain.certificates.len(),
            domain.outputs.len(),
            domain.dns.provider
        );
    }

    println!(
        "certpilot: configuration file {} test is successful",
        path.display()
    );
    Ok(())
}

fn executor(config: &Config, metrics: Arc<RenewalMetrics>) -> Result<DomainExecutor> {
    let services = bootstrap::build_services(config, Arc::new(LogEventSink), metrics)?;
    Ok(DomainExecutor::new(services))
}

/// One renewal cycle over every (or one) domain
async fn renew(config: Config, only: Option<String>, print_metrics: bool) -> Result<()> {
    let mut config = config;
    if let Some(name) = &only {
        config.domains.retain(|d| &d.name == name);
        if config.domains.is_empty() {
            bail!("Domain '{}' is not configured", name);
        }
    }

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(RenewalMetrics::new());
    metrics.register(&registry)?;

    let executor = executor(&config, Arc::clone(&metrics))?;
    let domains = bootstrap::build_domains(&config, &Registry::with_builtin()).await?;

    let mut reports = Vec::with_capacity(domains.len());
    for domain in domains {
        reports.push(executor.execute(domain).await);
    }
    print_reports(&reports);

    if print_metrics {
        print!("{}", certpilot_common::metrics::render(&registry)?);
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        bail!("{} domain(s) had failed certificates", failed);
    }
    Ok(())
}

fn print_reports(reports: &[ExecutionReport]) {
    for report in reports {
        for (certificate, outcome) in &report.certificates {
            println!("{}/{}: {}", report.domain, certificate, outcome);
        }
        if report.dns_cleanup_failures > 0 {
            println!(
                "{}: {} TXT record(s) could not be removed",
                report.domain, report.dns_cleanup_failures
            );
        }
    }
}

/// Periodic renewal until Ctrl-C or SIGTERM
async fn run(config: Config) -> Result<()> {
    let metrics = Arc::new(RenewalMetrics::new());
    let executor = executor(&config, metrics)?;
    let domains = bootstrap::build_domains(&config, &Registry::with_builtin()).await?;
    let scheduler =
        RenewalScheduler::new(executor, domains).with_interval(config.renewal.check_interval());

    tokio::select! {
        _ = scheduler.run() => {
            error!("Renewal scheduler stopped unexpectedly");
        }
        result = shutdown_signal() => {
            result?;
            info!("Shutdown signal received, stopping");
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}

async fn list(config: &Config) -> Result<()> {
    let store = certpilot_renewer::store::FilesystemStore::new(&config.store.path)?;
    let certificates = store.all().await?;
    if certificates.is_empty() {
        println!("No stored certificates");
        return Ok(());
    }

    for certificate in certificates {
        println!(
            "{}/{}  created {}  expires {}",
            certificate.domain,
            certificate.name,
            certificate.created_on.to_rfc3339(),
            certificate.expires_on.to_rfc3339()
        );
    }
    Ok(())
}

async fn delete(config: &Config, domain: &str, certificate: &str) -> Result<()> {
    let store = certpilot_renewer::store::FilesystemStore::new(&config.store.path)?;
    if store.delete(domain, certificate).await? {
        info!(domain = %domain, certificate = %certificate, "Stored certificate deleted");
        println!("Deleted {}/{}", domain, certificate);
    } else {
        warn!(domain = %domain, certificate = %certificate, "No stored certificate to delete");
        println!("No stored certificate {}/{}", domain, certificate);
    }
    Ok(())
}
