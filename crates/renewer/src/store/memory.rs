//! In-memory certificate store

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CertificateStore, StoreResult, StoredCertificate};

/// Certificate store kept in process memory
///
/// Used by tests and dry runs; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    certificates: Mutex<BTreeMap<(String, String), StoredCertificate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.certificates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.lock().is_empty()
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn put(&self, certificate: StoredCertificate) -> StoreResult<()> {
        let key = (certificate.domain.clone(), certificate.name.clone());
        self.certificates.lock().insert(key, certificate);
        Ok(())
    }

    async fn find(&self, domain: &str, name: &str) -> StoreResult<Option<StoredCertificate>> {
        Ok(self
            .certificates
            .lock()
            .get(&(domain.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete(&self, domain: &str, name: &str) -> StoreResult<bool> {
        Ok(self
            .certificates
            .lock()
            .remove(&(domain.to_string(), name.to_string()))
            .is_some())
    }

    async fn all(&self) -> StoreResult<Vec<StoredCertificate>> {
        Ok(self.certificates.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cert(domain: &str, name: &str, days: i64) -> StoredCertificate {
        let now = Utc::now();
        StoredCertificate {
            domain: domain.into(),
            name: name.into(),
            created_on: now,
            expires_on: now + chrono::Duration::days(days),
            certificate: "leaf".into(),
            chain: "chain".into(),
        }
    }

    #[tokio::test]
    async fn test_put_upserts() {
        let store = MemoryStore::new();
        store.put(cert("example.com", "www", 10)).await.unwrap();
        store.put(cert("example.com", "www", 90)).await.unwrap();

        assert_eq!(store.len(), 1);
        let found = store.find("example.com", "www").await.unwrap().unwrap();
        assert!(found.expires_on > Utc::now() + chrono::Duration::days(80));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store.put(cert("example.com", "www", 90)).await.unwrap();

        assert!(store.delete("example.com", "www").await.unwrap());
        assert!(!store.delete("example.com", "www").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_all_is_ordered() {
        let store = MemoryStore::new();
        store.put(cert("b.com", "x", 90)).await.unwrap();
        store.put(cert("a.com", "y", 90)).await.unwrap();
        store.put(cert("a.com", "x", 90)).await.unwrap();

        let all = store.all().await.unwrap();
        let keys: Vec<_> = all.iter().map(|c| (c.domain.as_str(), c.name.as_str())).collect();
        assert_eq!(keys, vec![("a.com", "x"), ("a.com", "y"), ("b.com", "x")]);
    }
}
