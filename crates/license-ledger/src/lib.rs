//! Append-only usage ledger.
//!
//! A thin domain façade over [`UsageLedgerRepository`]: every other
//! component crate (`license-issuer`, `license-manifest`) appends its
//! own entries directly through the repository since the append must
//! land in the same storage transaction as the mutation it records.
//! This crate exists for the read side — paginated, newest-first
//! access to an organization's audit trail — and for callers (the HTTP
//! façade) that only need to append a free-standing entry outside of
//! an existing transaction.

use std::sync::Arc;

use license_core::{CoreError, OrgId};
use license_storage::models::UsageLedgerEntry;
use license_storage::UsageLedgerRepository;

/// Read/append access to one organization's usage ledger.
pub struct UsageLedger {
    repo: Arc<dyn UsageLedgerRepository>,
}

impl UsageLedger {
    /// Wrap a repository.
    pub fn new(repo: Arc<dyn UsageLedgerRepository>) -> Self {
        Self { repo }
    }

    /// Append an entry. Never fails silently.
    pub async fn append(&self, entry: UsageLedgerEntry) -> Result<UsageLedgerEntry, CoreError> {
        self.repo.append(entry).await.map_err(CoreError::from)
    }

    /// A page of `org_id`'s entries, `created_at` descending, alongside
    /// the total row count.
    pub async fn read(
        &self,
        org_id: &OrgId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<UsageLedgerEntry>, u64), CoreError> {
        self.repo.read(org_id, limit, offset).await.map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use license_core::{Timestamp, UsageEntryId};
    use license_storage::memory::MemoryUsageLedgerRepository;
    use license_storage::models::LedgerEntryType;
    use serde_json::json;

    fn entry(org_id: &OrgId, entry_type: LedgerEntryType) -> UsageLedgerEntry {
        UsageLedgerEntry {
            id: UsageEntryId::new(),
            org_id: org_id.clone(),
            entry_type,
            site_id: None,
            data: json!({}),
            signature: None,
            created_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn read_is_paginated_and_newest_first() {
        let ledger = UsageLedger::new(Arc::new(MemoryUsageLedgerRepository::new()));
        let org_id = OrgId::new("acme");

        ledger.append(entry(&org_id, LedgerEntryType::SiteIssued)).await.unwrap();
        ledger.append(entry(&org_id, LedgerEntryType::Heartbeat)).await.unwrap();
        ledger.append(entry(&org_id, LedgerEntryType::Revoked)).await.unwrap();

        let (page, total) = ledger.read(&org_id, 2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].entry_type, LedgerEntryType::Revoked);
        assert_eq!(page[1].entry_type, LedgerEntryType::Heartbeat);

        let (second_page, total_again) = ledger.read(&org_id, 2, 2).await.unwrap();
        assert_eq!(total_again, 3);
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].entry_type, LedgerEntryType::SiteIssued);
    }

    #[tokio::test]
    async fn read_scopes_strictly_to_the_requested_organization() {
        let ledger = UsageLedger::new(Arc::new(MemoryUsageLedgerRepository::new()));
        let acme = OrgId::new("acme");
        let globex = OrgId::new("globex");

        ledger.append(entry(&acme, LedgerEntryType::SiteIssued)).await.unwrap();
        ledger.append(entry(&globex, LedgerEntryType::SiteIssued)).await.unwrap();

        let (page, total) = ledger.read(&acme, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page.len(), 1);
    }
}
