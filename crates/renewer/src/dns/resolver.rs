//! DNS queries backed by `hickory-resolver`

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, trace};

use super::{txt_presentation, DnsError, DnsQuery, DnsQueryFactory, DnsResult, TxtRecord};

/// Default per-query timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates hickory-backed [`DnsQuery`] instances
#[derive(Debug, Clone)]
pub struct HickoryQueryFactory {
    timeout: Duration,
}

impl HickoryQueryFactory {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn options(&self) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 2;
        // Propagation checks must see fresh answers
        opts.cache_size = 0;
        opts
    }

    fn system_resolver(&self) -> DnsResult<TokioAsyncResolver> {
        TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            DnsError::Configuration(format!("Failed to read system resolver configuration: {}", e))
        })
    }
}

impl Default for HickoryQueryFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsQueryFactory for HickoryQueryFactory {
    async fn create(&self, nameservers: &[String]) -> DnsResult<Arc<dyn DnsQuery>> {
        let system = self.system_resolver()?;
        if nameservers.is_empty() {
            return Ok(Arc::new(HickoryQuery {
                resolver: system,
                target: "system".to_string(),
            }));
        }

        let mut ips: Vec<IpAddr> = Vec::new();
        for host in nameservers {
            match system.lookup_ip(host.as_str()).await {
                Ok(lookup) => ips.extend(lookup.iter()),
                Err(e) if is_empty_answer(&e) => {
                    debug!(nameserver = %host, "Nameserver has no addresses");
                }
                Err(e) => return Err(lookup_error(host, &e)),
            }
        }

        if ips.is_empty() {
            return Err(DnsError::Configuration(format!(
                "None of the nameservers resolved to an address: {}",
                nameservers.join(", ")
            )));
        }

        trace!(nameservers = ?nameservers, addresses = ?ips, "Creating bound resolver");

        let config = ResolverConfig::from_parts(
            None,
            vec![],
            NameServerConfigGroup::from_ips_clear(&ips, 53, true),
        );
        Ok(Arc::new(HickoryQuery {
            resolver: TokioAsyncResolver::tokio(config, self.options()),
            target: nameservers.join(","),
        }))
    }
}

/// A resolver bound to the system configuration or to fixed nameservers
pub struct HickoryQuery {
    resolver: TokioAsyncResolver,
    target: String,
}

impl std::fmt::Debug for HickoryQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryQuery")
            .field("target", &self.target)
            .finish()
    }
}

#[async_trait]
impl DnsQuery for HickoryQuery {
    async fn find_authoritative_name_servers(&self, domain: &str) -> DnsResult<Vec<String>> {
        let mut name = domain.trim_end_matches('.').to_string();

        loop {
            let absolute = format!("{}.", name);
            match self.resolver.ns_lookup(absolute.as_str()).await {
                Ok(lookup) => {
                    let servers: Vec<String> = lookup.iter().map(|ns| ns.to_string()).collect();
                    if !servers.is_empty() {
                        debug!(domain = %domain, zone = %absolute, servers = ?servers, "Found authoritative nameservers");
                        return Ok(servers);
                    }
                }
                Err(e) if is_empty_answer(&e) => {
                    trace!(name = %absolute, "No NS records, trying parent");
                }
                Err(e) => return Err(lookup_error(&absolute, &e)),
            }

            match parent_domain(&name) {
                Some(parent) => name = parent.to_string(),
                None => return Ok(Vec::new()),
            }
        }
    }

    async fn find_txt_records(&self, domain: &str) -> DnsResult<Vec<TxtRecord>> {
        match self.resolver.txt_lookup(domain).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    TxtRecord::new(
                        domain,
                        txt_presentation(txt.txt_data().iter().map(|data| data.as_ref())),
                    )
                })
                .collect()),
            Err(e) if is_empty_answer(&e) => Ok(Vec::new()),
            Err(e) => Err(lookup_error(domain, &e)),
        }
    }
}

/// Name with its leftmost label removed, `None` at the root
fn parent_domain(name: &str) -> Option<&str> {
    name.split_once('.')
        .map(|(_, parent)| parent)
        .filter(|parent| !parent.is_empty())
}

fn is_empty_answer(e: &ResolveError) -> bool {
    matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

fn lookup_error(name: &str, e: &ResolveError) -> DnsError {
    DnsError::Lookup {
        name: name.to_string(),
        message: e.to_string(),
    }
}
