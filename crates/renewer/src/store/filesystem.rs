//! Filesystem certificate store
//!
//! # Directory Structure
//!
//! ```text
//! store/
//! └── domains/
//!     └── example.com/
//!         └── www/
//!             ├── cert.pem      # Leaf certificate
//!             ├── chain.pem     # Full chain, leaf first
//!             └── meta.json     # Creation and expiry timestamps
//! ```

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, trace, warn};

use super::{CertificateStore, StoreError, StoreResult, StoredCertificate};

const CERT_FILE: &str = "cert.pem";
const CHAIN_FILE: &str = "chain.pem";
const META_FILE: &str = "meta.json";

/// Metadata stored alongside the certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CertificateMeta {
    domain: String,
    name: String,
    created_on: DateTime<Utc>,
    expires_on: DateTime<Utc>,
}

/// Certificate store rooted at a directory
///
/// Directories are created with 0700 and files with 0600 permissions on Unix.
#[derive(Debug)]
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Open the store at `base_path`, creating the directory layout
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or permissions
    /// cannot be set.
    pub fn new(base_path: &Path) -> StoreResult<Self> {
        let domains_path = base_path.join("domains");
        std::fs::create_dir_all(&domains_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(base_path, perms.clone())?;
            std::fs::set_permissions(&domains_path, perms)?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate store"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn domains_path(&self) -> PathBuf {
        self.base_path.join("domains")
    }

    fn entry_path(&self, domain: &str, name: &str) -> StoreResult<PathBuf> {
        for component in [domain, name] {
            if component.is_empty()
                || component == "."
                || component == ".."
                || component.contains(['/', '\\'])
            {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid store key component '{}'", component),
                )));
            }
        }
        Ok(self.domains_path().join(domain).join(name))
    }

    async fn read_entry(&self, path: &Path) -> StoreResult<StoredCertificate> {
        let meta: CertificateMeta =
            serde_json::from_str(&fs::read_to_string(path.join(META_FILE)).await?)?;
        let certificate = fs::read_to_string(path.join(CERT_FILE)).await?;
        let chain = match fs::read_to_string(path.join(CHAIN_FILE)).await {
            Ok(chain) => chain,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(StoredCertificate {
            domain: meta.domain,
            name: meta.name,
            created_on: meta.created_on,
            expires_on: meta.expires_on,
            certificate,
            chain,
        })
    }
}

async fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

async fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

#[async_trait]
impl CertificateStore for FilesystemStore {
    async fn put(&self, certificate: StoredCertificate) -> StoreResult<()> {
        let path = self.entry_path(&certificate.domain, &certificate.name)?;
        if let Some(domain_path) = path.parent() {
            create_private_dir(domain_path).await?;
        }
        create_private_dir(&path).await?;

        let meta = CertificateMeta {
            domain: certificate.domain.clone(),
            name: certificate.name.clone(),
            created_on: certificate.created_on,
            expires_on: certificate.expires_on,
        };

        write_private(&path.join(CERT_FILE), &certificate.certificate).await?;
        write_private(&path.join(CHAIN_FILE), &certificate.chain).await?;
        // Written last: an entry without metadata is not listed
        write_private(&path.join(META_FILE), &serde_json::to_string_pretty(&meta)?).await?;

        info!(
            domain = %certificate.domain,
            certificate = %certificate.name,
            expires = %certificate.expires_on,
            "Saved certificate to store"
        );
        Ok(())
    }

    async fn find(&self, domain: &str, name: &str) -> StoreResult<Option<StoredCertificate>> {
        let path = self.entry_path(domain, name)?;

        if !fs::try_exists(path.join(META_FILE)).await? {
            trace!(domain = %domain, certificate = %name, "No stored certificate found");
            return Ok(None);
        }

        let stored = self.read_entry(&path).await?;
        debug!(
            domain = %domain,
            certificate = %name,
            expires = %stored.expires_on,
            "Loaded stored certificate"
        );
        Ok(Some(stored))
    }

    async fn delete(&self, domain: &str, name: &str) -> StoreResult<bool> {
        let path = self.entry_path(domain, name)?;

        if !fs::try_exists(&path).await? {
            warn!(domain = %domain, certificate = %name, "Certificate to delete not found");
            return Ok(false);
        }

        fs::remove_dir_all(&path).await?;
        info!(domain = %domain, certificate = %name, "Deleted stored certificate");
        Ok(true)
    }

    async fn all(&self) -> StoreResult<Vec<StoredCertificate>> {
        let domains_path = self.domains_path();
        if !fs::try_exists(&domains_path).await? {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut domains = fs::read_dir(&domains_path).await?;
        while let Some(domain) = domains.next_entry().await? {
            if !domain.file_type().await?.is_dir() {
                continue;
            }
            let mut names = fs::read_dir(domain.path()).await?;
            while let Some(entry) = names.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir()
                    && fs::try_exists(path.join(META_FILE)).await?
                {
                    entries.push(self.read_entry(&path).await?);
                }
            }
        }

        entries.sort_by(|a, b| (&a.domain, &a.name).cmp(&(&b.domain, &b.name)));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, FilesystemStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    fn cert(domain: &str, name: &str, days: i64) -> StoredCertificate {
        let now = Utc::now();
        StoredCertificate {
            domain: domain.into(),
            name: name.into(),
            created_on: now,
            expires_on: now + chrono::Duration::days(days),
            certificate: "-----BEGIN CERTIFICATE-----\nleaf\n-----END CERTIFICATE-----\n".into(),
            chain: "-----BEGIN CERTIFICATE-----\nissuer\n-----END CERTIFICATE-----\n".into(),
        }
    }

    #[test]
    fn test_store_creation() {
        let (_temp_dir, store) = setup_store();
        assert!(store.base_path().exists());
        assert!(store.base_path().join("domains").exists());
    }

    #[tokio::test]
    async fn test_certificate_save_load() {
        let (_temp_dir, store) = setup_store();
        let original = cert("example.com", "www", 90);

        store.put(original.clone()).await.unwrap();

        let loaded = store.find("example.com", "www").await.unwrap().unwrap();
        assert_eq!(loaded.certificate, original.certificate);
        assert_eq!(loaded.chain, original.chain);
        assert_eq!(loaded.expires_on, original.expires_on);
    }

    #[tokio::test]
    async fn test_find_missing() {
        let (_temp_dir, store) = setup_store();
        assert!(store.find("nonexistent.com", "www").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let (_temp_dir, store) = setup_store();
        store.put(cert("example.com", "www", 10)).await.unwrap();
        let newer = cert("example.com", "www", 90);
        store.put(newer.clone()).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].expires_on, newer.expires_on);
    }

    #[tokio::test]
    async fn test_all_lists_every_entry() {
        let (_temp_dir, store) = setup_store();
        store.put(cert("b.com", "api", 90)).await.unwrap();
        store.put(cert("a.com", "www", 90)).await.unwrap();
        store.put(cert("a.com", "api", 90)).await.unwrap();

        let all = store.all().await.unwrap();
        let keys: Vec<_> = all.iter().map(|c| (c.domain.as_str(), c.name.as_str())).collect();
        assert_eq!(keys, vec![("a.com", "api"), ("a.com", "www"), ("b.com", "api")]);
    }

    #[tokio::test]
    async fn test_delete_certificate() {
        let (_temp_dir, store) = setup_store();
        store.put(cert("delete.com", "www", 90)).await.unwrap();

        assert!(store.delete("delete.com", "www").await.unwrap());
        assert!(store.find("delete.com", "www").await.unwrap().is_none());
        assert!(!store.delete("delete.com", "www").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (_temp_dir, store) = setup_store();
        assert!(store.find("..", "www").await.is_err());
        assert!(store.find("example.com", "a/b").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp_dir, store) = setup_store();
        store.put(cert("example.com", "www", 90)).await.unwrap();

        let path = store.base_path().join("domains/example.com/www");
        let dir_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        let file_mode = std::fs::metadata(path.join(CERT_FILE)).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
