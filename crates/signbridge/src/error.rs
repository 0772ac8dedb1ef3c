use thiserror::Error;

use crate::contract::ContractStatus;

/// Failures of a [`crate::store::ContractStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("corrupt contract row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("contract not found: {0}")]
    NotFound(i64),

    #[error("external document id already linked: {0}")]
    DuplicateExternalId(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A caller-supplied provider path that cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("no provider path could be derived from the request")]
    Missing,

    #[error("invalid URL encoding in path")]
    InvalidEncoding,

    #[error("path traversal not allowed")]
    Traversal,

    #[error("path must not contain {0}")]
    ForbiddenSequence(&'static str),
}

/// Errors from the contract state machine.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("gave up after {attempts} conflicting updates on document {document_id}")]
    Contended {
        document_id: String,
        attempts: usize,
    },

    #[error("contract {contract_id} is already linked to document {existing}")]
    AlreadyLinked {
        contract_id: i64,
        existing: String,
    },

    #[error("contract {contract_id} cannot be sent for signature from {status}")]
    NotLinkable {
        contract_id: i64,
        status: ContractStatus,
    },
}

/// Delivery-level webhook failures. Everything else a webhook can hit is
/// acknowledged; see [`crate::webhook::Acknowledgement`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("method {0} not allowed, webhooks must be POSTed")]
    MethodNotAllowed(String),

    #[error("missing webhook signature")]
    MissingSignature,

    #[error("webhook signature mismatch")]
    InvalidSignature,
}

/// A webhook body that cannot be turned into an [`crate::event::InboundEvent`].
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("body is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("body does not have the delivery shape: {0}")]
    Malformed(serde_json::Error),

    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
}
