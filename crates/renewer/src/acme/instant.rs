//! ACME objects backed by `instant-acme`
//!
//! `instant-acme` models an order as a single mutable object; authorizations
//! and challenges are plain snapshots. The wrappers here share the order
//! behind an async mutex so that challenges can trigger and refresh
//! themselves through it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier,
    NewAccount, NewOrder, Order, OrderStatus,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    AcmeAccount, AcmeAuthorization, AcmeError, AcmeOrder, AcmeResult, AcmeStatus,
    Dns01Challenge, Problem,
};

/// ACME account backed by `instant-acme`
pub struct InstantAcmeAccount {
    account: Account,
    directory: String,
}

impl InstantAcmeAccount {
    /// Load the account from `credentials_file`, or register a new one
    ///
    /// Newly created credentials are written to `credentials_file` with
    /// restrictive permissions.
    pub async fn load_or_create(
        directory: &str,
        email: Option<&str>,
        credentials_file: &Path,
    ) -> AcmeResult<Self> {
        if tokio::fs::try_exists(credentials_file).await.unwrap_or(false) {
            let json = tokio::fs::read_to_string(credentials_file)
                .await
                .map_err(|e| AcmeError::Credentials(format!("{}: {}", credentials_file.display(), e)))?;
            let credentials: AccountCredentials = serde_json::from_str(&json).map_err(|e| {
                AcmeError::Credentials(format!("Failed to deserialize credentials: {}", e))
            })?;
            let account = Account::from_credentials(credentials)
                .await
                .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

            info!(directory = %directory, "Loaded ACME account from storage");
            return Ok(Self {
                account,
                directory: directory.to_string(),
            });
        }

        info!(directory = %directory, email = ?email, "Creating new ACME account");

        let contact = email.map(|e| format!("mailto:{}", e));
        let contacts: Vec<&str> = contact.iter().map(String::as_str).collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contacts,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory,
            None,
        )
        .await
        .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

        let json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| AcmeError::Credentials(format!("Failed to serialize credentials: {}", e)))?;
        write_private(credentials_file, &json)
            .await
            .map_err(|e| AcmeError::Credentials(format!("{}: {}", credentials_file.display(), e)))?;

        info!(path = %credentials_file.display(), "ACME account created and credentials saved");
        Ok(Self {
            account,
            directory: directory.to_string(),
        })
    }
}

async fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

impl std::fmt::Debug for InstantAcmeAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeAccount")
            .field("directory", &self.directory)
            .finish()
    }
}

#[async_trait]
impl AcmeAccount for InstantAcmeAccount {
    async fn new_order(&self, hosts: &[String]) -> AcmeResult<Arc<dyn AcmeOrder>> {
        let identifiers: Vec<Identifier> = hosts.iter().map(|h| Identifier::Dns(h.clone())).collect();

        info!(hosts = ?hosts, "Creating certificate order");

        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        let (status, error) = {
            let state = order.state();
            (order_status(&state.status), state.error.as_ref().map(problem))
        };

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::OrderCreation(format!("Failed to get authorizations: {}", e)))?;

        let mut snapshots = Vec::with_capacity(authorizations.len());
        let mut pending_challenges = Vec::new();
        for authz in &authorizations {
            #[allow(unreachable_patterns)]
            let domain = match &authz.identifier {
                Identifier::Dns(domain) => domain.clone(),
                other => format!("{:?}", other),
            };

            if let Some(c) = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
            {
                pending_challenges.push((
                    snapshots.len(),
                    c.url.clone(),
                    order.key_authorization(c).dns_value(),
                    challenge_status(&c.status),
                    c.error.as_ref().map(problem),
                ));
            }

            debug!(domain = %domain, status = ?authz.status, "Processing authorization");
            snapshots.push((domain, authorization_status(&authz.status)));
        }

        let shared = Arc::new(tokio::sync::Mutex::new(order));
        let mut challenges: Vec<Option<Arc<InstantDns01Challenge>>> = vec![None; snapshots.len()];
        for (index, url, digest, status, error) in pending_challenges {
            challenges[index] = Some(Arc::new(InstantDns01Challenge {
                order: Arc::clone(&shared),
                url,
                digest,
                state: Mutex::new(ChallengeState { status, error }),
            }));
        }

        let authorizations = snapshots
            .into_iter()
            .zip(challenges)
            .map(|((domain, status), challenge)| {
                Arc::new(InstantAcmeAuthorization {
                    domain,
                    status,
                    challenge,
                }) as Arc<dyn AcmeAuthorization>
            })
            .collect();

        Ok(Arc::new(InstantAcmeOrder {
            order: shared,
            state: Mutex::new(OrderSnapshot { status, error }),
            authorizations,
        }))
    }
}

#[derive(Debug)]
struct OrderSnapshot {
    status: AcmeStatus,
    error: Option<Problem>,
}

/// Order wrapper sharing the `instant-acme` order with its challenges
pub struct InstantAcmeOrder {
    order: Arc<tokio::sync::Mutex<Order>>,
    state: Mutex<OrderSnapshot>,
    authorizations: Vec<Arc<dyn AcmeAuthorization>>,
}

impl std::fmt::Debug for InstantAcmeOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeOrder")
            .field("state", &*self.state.lock())
            .field("authorizations", &self.authorizations.len())
            .finish()
    }
}

impl InstantAcmeOrder {
    fn apply(&self, status: &OrderStatus, error: Option<&instant_acme::Problem>) {
        let mut state = self.state.lock();
        state.status = order_status(status);
        state.error = error.map(problem);
    }
}

#[async_trait]
impl AcmeOrder for InstantAcmeOrder {
    fn status(&self) -> AcmeStatus {
        self.state.lock().status
    }

    fn error(&self) -> Option<Problem> {
        self.state.lock().error.clone()
    }

    fn authorizations(&self) -> Vec<Arc<dyn AcmeAuthorization>> {
        self.authorizations.clone()
    }

    async fn update(&self) -> AcmeResult<()> {
        let mut order = self.order.lock().await;
        let state = order.refresh().await?;
        self.apply(&state.status, state.error.as_ref());
        Ok(())
    }

    async fn execute(&self, csr_der: &[u8]) -> AcmeResult<()> {
        let mut order = self.order.lock().await;
        order.finalize(csr_der).await?;
        let state = order.state();
        self.apply(&state.status, state.error.as_ref());
        Ok(())
    }

    async fn certificate(&self) -> AcmeResult<Option<String>> {
        let mut order = self.order.lock().await;
        Ok(order.certificate().await?)
    }
}

#[derive(Debug)]
struct InstantAcmeAuthorization {
    domain: String,
    status: AcmeStatus,
    challenge: Option<Arc<InstantDns01Challenge>>,
}

impl AcmeAuthorization for InstantAcmeAuthorization {
    fn domain(&self) -> String {
        self.domain.clone()
    }

    fn status(&self) -> AcmeStatus {
        self.status
    }

    fn dns01_challenge(&self) -> Option<Arc<dyn Dns01Challenge>> {
        self.challenge
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn Dns01Challenge>)
    }
}

#[derive(Debug)]
struct ChallengeState {
    status: AcmeStatus,
    error: Option<Problem>,
}

struct InstantDns01Challenge {
    order: Arc<tokio::sync::Mutex<Order>>,
    url: String,
    digest: String,
    state: Mutex<ChallengeState>,
}

impl std::fmt::Debug for InstantDns01Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantDns01Challenge")
            .field("url", &self.url)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[async_trait]
impl Dns01Challenge for InstantDns01Challenge {
    fn status(&self) -> AcmeStatus {
        self.state.lock().status
    }

    fn digest(&self) -> String {
        self.digest.clone()
    }

    fn error(&self) -> Option<Problem> {
        self.state.lock().error.clone()
    }

    async fn trigger(&self) -> AcmeResult<()> {
        let mut order = self.order.lock().await;
        order.set_challenge_ready(&self.url).await?;
        self.state.lock().status = AcmeStatus::Processing;
        debug!(challenge_url = %self.url, "Challenge set ready");
        Ok(())
    }

    async fn update(&self) -> AcmeResult<()> {
        let mut order = self.order.lock().await;
        let authorizations = order.authorizations().await?;
        let challenge = authorizations
            .iter()
            .flat_map(|authz| authz.challenges.iter())
            .find(|c| c.url == self.url)
            .ok_or_else(|| AcmeError::Protocol(format!("Challenge {} no longer listed", self.url)))?;

        let mut state = self.state.lock();
        state.status = challenge_status(&challenge.status);
        state.error = challenge.error.as_ref().map(problem);
        Ok(())
    }
}

fn order_status(status: &OrderStatus) -> AcmeStatus {
    match status {
        OrderStatus::Pending => AcmeStatus::Pending,
        OrderStatus::Ready => AcmeStatus::Ready,
        OrderStatus::Processing => AcmeStatus::Processing,
        OrderStatus::Valid => AcmeStatus::Valid,
        OrderStatus::Invalid => AcmeStatus::Invalid,
    }
}

#[allow(unreachable_patterns)]
fn authorization_status(status: &AuthorizationStatus) -> AcmeStatus {
    match status {
        AuthorizationStatus::Pending => AcmeStatus::Pending,
        AuthorizationStatus::Valid => AcmeStatus::Valid,
        AuthorizationStatus::Invalid => AcmeStatus::Invalid,
        AuthorizationStatus::Revoked => AcmeStatus::Revoked,
        AuthorizationStatus::Expired => AcmeStatus::Expired,
        _ => AcmeStatus::Unknown,
    }
}

/// `instant-acme` 0.7 keeps its challenge status type private, so the
/// status is matched by its variant name.
fn challenge_status(status: &impl std::fmt::Debug) -> AcmeStatus {
    status_from_name(&format!("{status:?}"))
}

fn status_from_name(name: &str) -> AcmeStatus {
    match name {
        "Pending" => AcmeStatus::Pending,
        "Processing" => AcmeStatus::Processing,
        "Valid" => AcmeStatus::Valid,
        "Invalid" => AcmeStatus::Invalid,
        _ => AcmeStatus::Unknown,
    }
}

fn problem(p: &instant_acme::Problem) -> Problem {
    Problem {
        kind: p.r#type.clone(),
        title: None,
        detail: p.detail.clone(),
        subproblems: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Reported {
        Pending,
        Processing,
        Valid,
        Invalid,
        Deactivated,
    }

    #[test]
    fn test_challenge_status_by_variant_name() {
        assert_eq!(challenge_status(&Reported::Pending), AcmeStatus::Pending);
        assert_eq!(challenge_status(&Reported::Processing), AcmeStatus::Processing);
        assert_eq!(challenge_status(&Reported::Valid), AcmeStatus::Valid);
        assert_eq!(challenge_status(&Reported::Invalid), AcmeStatus::Invalid);
        assert_eq!(challenge_status(&Reported::Deactivated), AcmeStatus::Unknown);
    }

    #[test]
    fn test_order_status() {
        assert_eq!(order_status(&OrderStatus::Ready), AcmeStatus::Ready);
        assert_eq!(order_status(&OrderStatus::Invalid), AcmeStatus::Invalid);
    }
}
