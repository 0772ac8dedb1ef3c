use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

use crate::contract::ContractStatus;
use crate::error::PayloadError;

/// Provider event kinds. Anything the provider sends that is not recognised
/// is kept as [`EventKind::Unknown`] so it can be logged and acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    DocumentSigned,
    DocumentCompleted,
    DocumentRejected,
    Unknown(String),
}

impl EventKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "document_signed" => EventKind::DocumentSigned,
            "document_completed" => EventKind::DocumentCompleted,
            "document_rejected" => EventKind::DocumentRejected,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::DocumentSigned => "document_signed",
            EventKind::DocumentCompleted => "document_completed",
            EventKind::DocumentRejected => "document_rejected",
            EventKind::Unknown(kind) => kind,
        }
    }

    /// Status a contract moves to when this event is applied.
    pub fn target_status(&self) -> Option<ContractStatus> {
        match self {
            EventKind::DocumentSigned => Some(ContractStatus::SignedByIssuer),
            EventKind::DocumentCompleted => Some(ContractStatus::SignedComplete),
            EventKind::DocumentRejected => Some(ContractStatus::Rejected),
            EventKind::Unknown(_) => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A parsed provider delivery. Not unique per delivery: the provider
/// redelivers at least once.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub document_id: String,
    /// The whole delivery body, stored on the contract for audit.
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Parse `{ "event": "...", "data": { "document_id": "...", ... } }`.
    pub fn parse(raw: &[u8], received_at: DateTime<Utc>) -> Result<Self, PayloadError> {
        let payload: serde_json::Value = serde_json::from_slice(raw)?;
        let wire: WireEvent =
            serde_json::from_value(payload.clone()).map_err(PayloadError::Malformed)?;

        if wire.event.trim().is_empty() {
            return Err(PayloadError::MissingField("event"));
        }

        let document_id = wire
            .data
            .get("document_id")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(PayloadError::MissingField("data.document_id"))?
            .to_string();

        Ok(Self {
            kind: EventKind::parse(wire.event.trim()),
            document_id,
            payload,
            received_at,
        })
    }
}
