//! Contract signature lifecycle.
//!
//! ```text
//! draft -> sent_for_signature -> signed_by_issuer -> signed_complete
//!   \______________\_____________________\____> rejected | canceled
//! ```
//!
//! Every write goes through a compare-and-set on the status read just before
//! it. A lost race is re-read and re-decided, never blindly overwritten.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::constants::MAX_CAS_ATTEMPTS;
use crate::contract::{Contract, ContractStatus};
use crate::error::{StateError, StoreError};
use crate::store::{ContractStore, StatusUpdate};

/// Business-policy switches for transitions the lifecycle leaves open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// Let `document_rejected` move a `signed_complete` contract to
    /// `rejected`. Off by default: the two are mutually terminal.
    pub allow_rejection_after_completion: bool,
}

/// How a requested status relates to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Move forward to the target.
    Advance,
    /// Already at or past the target; nothing to write.
    AlreadyReached,
    /// Target is unreachable from a terminal status.
    Conflict,
}

impl TransitionPolicy {
    pub fn decide(&self, current: ContractStatus, target: ContractStatus) -> Decision {
        use ContractStatus::*;

        if current == target {
            return Decision::AlreadyReached;
        }
        match (current.rank(), target.rank()) {
            (Some(c), Some(t)) if c >= t => Decision::AlreadyReached,
            (Some(_), Some(_)) => Decision::Advance,
            // Rejected or canceled: incomparable and terminal.
            (None, _) => Decision::Conflict,
            (Some(_), None) => match current {
                SignedComplete
                    if target == Rejected && self.allow_rejection_after_completion =>
                {
                    Decision::Advance
                }
                SignedComplete => Decision::Conflict,
                _ => Decision::Advance,
            },
        }
    }
}

/// Result of applying an event or command to a contract.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied {
        contract_id: i64,
        from: ContractStatus,
        to: ContractStatus,
    },
    /// Redelivery or stale event. The payload is still recorded.
    NoOp {
        contract_id: i64,
        status: ContractStatus,
    },
    /// No contract is linked to the document yet.
    NotFound,
    /// A second terminal event for a contract that is already terminal.
    Conflict {
        contract_id: i64,
        current: ContractStatus,
        attempted: ContractStatus,
    },
}

/// Domain authority for contract status. Holds the store it writes through;
/// the process entry point owns the store's lifecycle.
pub struct ContractStateMachine {
    store: Arc<dyn ContractStore>,
    policy: TransitionPolicy,
}

impl ContractStateMachine {
    pub fn new(store: Arc<dyn ContractStore>, policy: TransitionPolicy) -> Self {
        Self { store, policy }
    }

    /// Move the contract linked to `document_id` to `target`.
    ///
    /// Idempotent: reaching a status the contract already has (or has passed)
    /// reports [`ApplyOutcome::NoOp`] and only records `payload`.
    pub fn apply(
        &self,
        document_id: &str,
        target: ContractStatus,
        at: DateTime<Utc>,
        payload: Option<&serde_json::Value>,
    ) -> Result<ApplyOutcome, StateError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(contract) = self.store.find_by_external_id(document_id)? else {
                tracing::info!(
                    document_id = %document_id,
                    target = %target,
                    "no contract linked to document, ignoring"
                );
                return Ok(ApplyOutcome::NotFound);
            };

            match self.policy.decide(contract.status, target) {
                Decision::Advance => {
                    let update = StatusUpdate {
                        external_document_id: document_id.to_string(),
                        expected: contract.status,
                        next: target,
                        at,
                        payload: payload.cloned(),
                    };
                    if self.store.apply_status_update(&update)? {
                        tracing::info!(
                            contract_id = contract.id,
                            document_id = %document_id,
                            from = %contract.status,
                            to = %target,
                            "contract status advanced"
                        );
                        return Ok(ApplyOutcome::Applied {
                            contract_id: contract.id,
                            from: contract.status,
                            to: target,
                        });
                    }
                    tracing::debug!(
                        document_id = %document_id,
                        attempt,
                        "contract status changed underneath, retrying"
                    );
                }
                Decision::AlreadyReached => {
                    if let Some(payload) = payload {
                        self.store.record_payload(document_id, payload)?;
                    }
                    tracing::debug!(
                        contract_id = contract.id,
                        document_id = %document_id,
                        status = %contract.status,
                        target = %target,
                        "status already reached, no-op"
                    );
                    return Ok(ApplyOutcome::NoOp {
                        contract_id: contract.id,
                        status: contract.status,
                    });
                }
                Decision::Conflict => {
                    tracing::warn!(
                        contract_id = contract.id,
                        document_id = %document_id,
                        current = %contract.status,
                        attempted = %target,
                        "terminal status conflict, contract left unchanged"
                    );
                    return Ok(ApplyOutcome::Conflict {
                        contract_id: contract.id,
                        current: contract.status,
                        attempted: target,
                    });
                }
            }
        }

        Err(StateError::Contended {
            document_id: document_id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Link a freshly created provider document to a draft contract and mark
    /// it sent for signature.
    pub fn link_document(
        &self,
        contract_id: i64,
        document_id: &str,
    ) -> Result<ApplyOutcome, StateError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let contract = self
                .store
                .find_by_id(contract_id)?
                .ok_or(StoreError::NotFound(contract_id))?;

            if let Some(outcome) = self.check_linkable(&contract, document_id)? {
                return Ok(outcome);
            }

            if self
                .store
                .link_external_id(contract_id, document_id, Utc::now())?
            {
                tracing::info!(
                    contract_id,
                    document_id = %document_id,
                    "contract sent for signature"
                );
                return Ok(ApplyOutcome::Applied {
                    contract_id,
                    from: ContractStatus::Draft,
                    to: ContractStatus::SentForSignature,
                });
            }
        }

        Err(StateError::Contended {
            document_id: document_id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    fn check_linkable(
        &self,
        contract: &Contract,
        document_id: &str,
    ) -> Result<Option<ApplyOutcome>, StateError> {
        match contract.external_document_id.as_deref() {
            Some(existing) if existing == document_id => Ok(Some(ApplyOutcome::NoOp {
                contract_id: contract.id,
                status: contract.status,
            })),
            Some(existing) => Err(StateError::AlreadyLinked {
                contract_id: contract.id,
                existing: existing.to_string(),
            }),
            None if contract.status != ContractStatus::Draft => Err(StateError::NotLinkable {
                contract_id: contract.id,
                status: contract.status,
            }),
            None => Ok(None),
        }
    }

    /// Cancel the contract linked to `document_id`.
    pub fn cancel(&self, document_id: &str) -> Result<ApplyOutcome, StateError> {
        self.apply(document_id, ContractStatus::Canceled, Utc::now(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContractStatus::*;
    use crate::store::InMemoryContractStore;

    #[test]
    fn test_decide_forward_path() {
        let p = TransitionPolicy::default();
        assert_eq!(p.decide(Draft, SentForSignature), Decision::Advance);
        assert_eq!(p.decide(SentForSignature, SignedByIssuer), Decision::Advance);
        assert_eq!(p.decide(SignedByIssuer, SignedComplete), Decision::Advance);
        // Skipping ahead is still monotonic
        assert_eq!(p.decide(SentForSignature, SignedComplete), Decision::Advance);
    }

    #[test]
    fn test_decide_never_regresses() {
        let p = TransitionPolicy::default();
        assert_eq!(p.decide(SignedByIssuer, SignedByIssuer), Decision::AlreadyReached);
        assert_eq!(p.decide(SignedComplete, SignedByIssuer), Decision::AlreadyReached);
        assert_eq!(p.decide(SignedByIssuer, SentForSignature), Decision::AlreadyReached);
    }

    #[test]
    fn test_decide_terminal_exits() {
        let p = TransitionPolicy::default();
        for from in [Draft, SentForSignature, SignedByIssuer] {
            assert_eq!(p.decide(from, Rejected), Decision::Advance);
            assert_eq!(p.decide(from, Canceled), Decision::Advance);
        }
        assert_eq!(p.decide(Rejected, Rejected), Decision::AlreadyReached);
        assert_eq!(p.decide(Canceled, Canceled), Decision::AlreadyReached);
        assert_eq!(p.decide(Rejected, Canceled), Decision::Conflict);
        assert_eq!(p.decide(Canceled, Rejected), Decision::Conflict);
        assert_eq!(p.decide(Rejected, SignedByIssuer), Decision::Conflict);
        assert_eq!(p.decide(Canceled, SignedComplete), Decision::Conflict);
        assert_eq!(p.decide(SignedComplete, Rejected), Decision::Conflict);
        assert_eq!(p.decide(SignedComplete, Canceled), Decision::Conflict);
    }

    #[test]
    fn test_policy_allows_rejection_after_completion() {
        let p = TransitionPolicy {
            allow_rejection_after_completion: true,
        };
        assert_eq!(p.decide(SignedComplete, Rejected), Decision::Advance);
        assert_eq!(p.decide(SignedComplete, Canceled), Decision::Conflict);
    }

    fn machine() -> (Arc<InMemoryContractStore>, ContractStateMachine) {
        let store = Arc::new(InMemoryContractStore::new());
        let sm = ContractStateMachine::new(store.clone(), TransitionPolicy::default());
        (store, sm)
    }

    #[test]
    fn test_link_document() {
        let (store, sm) = machine();
        let draft = store.create_draft().unwrap();

        let outcome = sm.link_document(draft.id, "doc-1").unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                contract_id: draft.id,
                from: Draft,
                to: SentForSignature
            }
        );
        // Idempotent for the same document
        assert!(matches!(
            sm.link_document(draft.id, "doc-1").unwrap(),
            ApplyOutcome::NoOp { .. }
        ));
        // Immutable once set
        assert!(matches!(
            sm.link_document(draft.id, "doc-2"),
            Err(StateError::AlreadyLinked { .. })
        ));
        assert!(matches!(
            sm.link_document(4242, "doc-3"),
            Err(StateError::Store(StoreError::NotFound(4242)))
        ));
    }

    #[test]
    fn test_cancel() {
        let (store, sm) = machine();
        let draft = store.create_draft().unwrap();
        sm.link_document(draft.id, "doc-1").unwrap();

        assert!(matches!(
            sm.cancel("doc-1").unwrap(),
            ApplyOutcome::Applied { to: Canceled, .. }
        ));
        let contract = store.find_by_id(draft.id).unwrap().unwrap();
        assert_eq!(contract.status, Canceled);
        assert!(contract.canceled_at.is_some());

        assert!(matches!(sm.cancel("doc-1").unwrap(), ApplyOutcome::NoOp { .. }));
        assert_eq!(sm.cancel("doc-missing").unwrap(), ApplyOutcome::NotFound);
    }

    /// Store whose first compare-and-set always loses, as if another
    /// delivery got there first.
    struct RacingStore {
        inner: InMemoryContractStore,
        lost_once: std::sync::atomic::AtomicBool,
    }

    impl ContractStore for RacingStore {
        fn create_draft(&self) -> Result<Contract, StoreError> {
            self.inner.create_draft()
        }
        fn find_by_id(&self, id: i64) -> Result<Option<Contract>, StoreError> {
            self.inner.find_by_id(id)
        }
        fn find_by_external_id(
            &self,
            id: &str,
        ) -> Result<Option<Contract>, StoreError> {
            self.inner.find_by_external_id(id)
        }
        fn link_external_id(
            &self,
            id: i64,
            doc: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.link_external_id(id, doc, at)
        }
        fn apply_status_update(
            &self,
            update: &StatusUpdate,
        ) -> Result<bool, StoreError> {
            use std::sync::atomic::Ordering;
            if !self.lost_once.swap(true, Ordering::SeqCst) {
                // The competing delivery completes the document.
                self.inner.apply_status_update(&StatusUpdate {
                    next: SignedComplete,
                    payload: None,
                    ..update.clone()
                })?;
                return Ok(false);
            }
            self.inner.apply_status_update(update)
        }
        fn record_payload(
            &self,
            doc: &str,
            payload: &serde_json::Value,
        ) -> Result<bool, StoreError> {
            self.inner.record_payload(doc, payload)
        }
    }

    #[test]
    fn test_lost_race_is_redecided() {
        let store = Arc::new(RacingStore {
            inner: InMemoryContractStore::new(),
            lost_once: std::sync::atomic::AtomicBool::new(false),
        });
        let sm = ContractStateMachine::new(store.clone(), TransitionPolicy::default());
        let draft = store.create_draft().unwrap();
        sm.link_document(draft.id, "doc-1").unwrap();

        // document_signed loses to a concurrent document_completed and must
        // not drag the contract back to signed_by_issuer.
        let outcome = sm
            .apply("doc-1", SignedByIssuer, Utc::now(), None)
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::NoOp {
                contract_id: draft.id,
                status: SignedComplete
            }
        );
        assert_eq!(
            store.find_by_id(draft.id).unwrap().unwrap().status,
            SignedComplete
        );
    }
}
