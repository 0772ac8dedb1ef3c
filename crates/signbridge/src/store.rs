use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::contract::{Contract, ContractStatus};
use crate::error::StoreError;

/// A conditional status write, applied only if the contract is still in
/// `expected`. This is the only way the state machine mutates status, so two
/// concurrent deliveries can never interleave a read and an unguarded write.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub external_document_id: String,
    pub expected: ContractStatus,
    pub next: ContractStatus,
    /// Entry time for `next`. Ignored if that timestamp is already set.
    pub at: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

/// Persistence seam for contract records, keyed by the provider's document id.
///
/// Implementations must be thread-safe (`Send + Sync`) and must make
/// [`ContractStore::apply_status_update`] and
/// [`ContractStore::link_external_id`] atomic compare-and-set operations.
pub trait ContractStore: Send + Sync {
    /// Register a new contract in `draft`.
    fn create_draft(&self) -> Result<Contract, StoreError>;

    fn find_by_id(&self, id: i64) -> Result<Option<Contract>, StoreError>;

    fn find_by_external_id(
        &self,
        external_document_id: &str,
    ) -> Result<Option<Contract>, StoreError>;

    /// Set the external document id and move `draft -> sent_for_signature`,
    /// only if the contract is still an unlinked draft. Returns `false` if
    /// the guard did not hold. Fails with
    /// [`StoreError::DuplicateExternalId`] if another contract owns the id.
    fn link_external_id(
        &self,
        id: i64,
        external_document_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Apply `update` if the contract is still in `update.expected`.
    /// Returns `false` if the guard did not hold or no contract matched.
    fn apply_status_update(&self, update: &StatusUpdate) -> Result<bool, StoreError>;

    /// Store the last webhook payload without touching status.
    fn record_payload(
        &self,
        external_document_id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, StoreError>;
}

/// In-memory contract store backed by DashMap. Lost on restart.
pub struct InMemoryContractStore {
    contracts: DashMap<i64, Contract>,
    by_external_id: DashMap<String, i64>,
    next_id: AtomicI64,
}

impl InMemoryContractStore {
    pub fn new() -> Self {
        Self {
            contracts: DashMap::new(),
            by_external_id: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    fn id_for(&self, external_document_id: &str) -> Option<i64> {
        self.by_external_id.get(external_document_id).map(|r| *r)
    }
}

impl Default for InMemoryContractStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractStore for InMemoryContractStore {
    fn create_draft(&self) -> Result<Contract, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let contract = Contract::new_draft(id, Utc::now());
        self.contracts.insert(id, contract.clone());
        Ok(contract)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Contract>, StoreError> {
        Ok(self.contracts.get(&id).map(|c| c.clone()))
    }

    fn find_by_external_id(
        &self,
        external_document_id: &str,
    ) -> Result<Option<Contract>, StoreError> {
        match self.id_for(external_document_id) {
            Some(id) => self.find_by_id(id),
            None => Ok(None),
        }
    }

    fn link_external_id(
        &self,
        id: i64,
        external_document_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Lock order: contract entry, then index entry.
        let Some(mut contract) = self.contracts.get_mut(&id) else {
            return Err(StoreError::NotFound(id));
        };
        if contract.status != ContractStatus::Draft || contract.external_document_id.is_some() {
            return Ok(false);
        }

        use dashmap::mapref::entry::Entry;
        match self.by_external_id.entry(external_document_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(StoreError::DuplicateExternalId(
                    external_document_id.to_string(),
                ))
            }
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        contract.external_document_id = Some(external_document_id.to_string());
        contract.status = ContractStatus::SentForSignature;
        contract.updated_at = at;
        Ok(true)
    }

    fn apply_status_update(&self, update: &StatusUpdate) -> Result<bool, StoreError> {
        let Some(id) = self.id_for(&update.external_document_id) else {
            return Ok(false);
        };
        let Some(mut contract) = self.contracts.get_mut(&id) else {
            return Ok(false);
        };
        if contract.status != update.expected {
            return Ok(false);
        }

        contract.status = update.next;
        contract.stamp(update.next, update.at);
        if let Some(ref payload) = update.payload {
            contract.last_webhook_payload = Some(payload.clone());
        }
        contract.updated_at = update.at;
        Ok(true)
    }

    fn record_payload(
        &self,
        external_document_id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let Some(id) = self.id_for(external_document_id) else {
            return Ok(false);
        };
        match self.contracts.get_mut(&id) {
            Some(mut contract) => {
                contract.last_webhook_payload = Some(payload.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
