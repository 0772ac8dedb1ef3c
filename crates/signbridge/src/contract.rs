use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signature lifecycle status of a contract.
///
/// `Draft -> SentForSignature -> SignedByIssuer -> SignedComplete` is the
/// monotonic path. `Rejected` and `Canceled` are terminal and can be entered
/// from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    SentForSignature,
    SignedByIssuer,
    SignedComplete,
    Rejected,
    Canceled,
}

impl ContractStatus {
    pub const ALL: [ContractStatus; 6] = [
        ContractStatus::Draft,
        ContractStatus::SentForSignature,
        ContractStatus::SignedByIssuer,
        ContractStatus::SignedComplete,
        ContractStatus::Rejected,
        ContractStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "draft",
            ContractStatus::SentForSignature => "sent_for_signature",
            ContractStatus::SignedByIssuer => "signed_by_issuer",
            ContractStatus::SignedComplete => "signed_complete",
            ContractStatus::Rejected => "rejected",
            ContractStatus::Canceled => "canceled",
        }
    }

    /// Position on the monotonic signing path. `None` for `Rejected` and
    /// `Canceled`, which are incomparable with the path and with each other.
    pub fn rank(&self) -> Option<u8> {
        match self {
            ContractStatus::Draft => Some(0),
            ContractStatus::SentForSignature => Some(1),
            ContractStatus::SignedByIssuer => Some(2),
            ContractStatus::SignedComplete => Some(3),
            ContractStatus::Rejected | ContractStatus::Canceled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContractStatus::SignedComplete | ContractStatus::Rejected | ContractStatus::Canceled
        )
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown contract status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ContractStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContractStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Contract record as seen by the signature core.
///
/// The surrounding store owns everything else about a contract (parties,
/// pricing, stand allocation); the core only reads and writes these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: i64,
    /// Provider-assigned document id. Immutable once set.
    pub external_document_id: Option<String>,
    pub status: ContractStatus,
    pub signed_by_issuer_at: Option<DateTime<Utc>>,
    pub signed_complete_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    /// Last raw webhook payload applied, kept for audit.
    pub last_webhook_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn new_draft(id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            external_document_id: None,
            status: ContractStatus::Draft,
            signed_by_issuer_at: None,
            signed_complete_at: None,
            rejected_at: None,
            canceled_at: None,
            last_webhook_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Timestamp field that records entry into `status`, if it has one.
    pub fn timestamp_for(&self, status: ContractStatus) -> Option<DateTime<Utc>> {
        match status {
            ContractStatus::SignedByIssuer => self.signed_by_issuer_at,
            ContractStatus::SignedComplete => self.signed_complete_at,
            ContractStatus::Rejected => self.rejected_at,
            ContractStatus::Canceled => self.canceled_at,
            ContractStatus::Draft | ContractStatus::SentForSignature => None,
        }
    }

    /// Set the entry timestamp for `status` unless it is already set.
    pub fn stamp(&mut self, status: ContractStatus, at: DateTime<Utc>) {
        let slot = match status {
            ContractStatus::SignedByIssuer => &mut self.signed_by_issuer_at,
            ContractStatus::SignedComplete => &mut self.signed_complete_at,
            ContractStatus::Rejected => &mut self.rejected_at,
            ContractStatus::Canceled => &mut self.canceled_at,
            ContractStatus::Draft | ContractStatus::SentForSignature => return,
        };
        if slot.is_none() {
            *slot = Some(at);
        }
    }
}
