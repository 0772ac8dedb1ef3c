//! Inbound provider webhook dispatch.
//!
//! Delivery is at-least-once and the provider retries anything it does not
//! see acknowledged. Once a body is authentic, every outcome below is
//! acknowledged, including malformed payloads, unknown documents, unknown
//! event kinds, terminal conflicts and failed writes. Retrying those would
//! only produce a redelivery storm, so they are logged at `warn`/`error`
//! instead. This is the one place data can be dropped silently: operators
//! must watch these log lines.

use chrono::Utc;
use std::sync::Arc;

use crate::error::WebhookError;
use crate::event::{EventKind, InboundEvent};
use crate::state_machine::{ApplyOutcome, ContractStateMachine};

/// What happened to an acknowledged delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledgement {
    /// Handed to the state machine.
    Handled {
        kind: EventKind,
        outcome: ApplyOutcome,
    },
    UnknownKind {
        kind: String,
        document_id: String,
    },
    BadPayload {
        reason: String,
    },
    /// The state machine could not read or write the contract.
    PersistenceFailed {
        kind: EventKind,
        document_id: String,
        error: String,
    },
}

impl Acknowledgement {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Acknowledgement::Handled { outcome, .. } => match outcome {
                ApplyOutcome::Applied { .. } => "applied",
                ApplyOutcome::NoOp { .. } => "noop",
                ApplyOutcome::NotFound => "not_found",
                ApplyOutcome::Conflict { .. } => "conflict",
            },
            Acknowledgement::UnknownKind { .. } => "unknown_kind",
            Acknowledgement::BadPayload { .. } => "bad_payload",
            Acknowledgement::PersistenceFailed { .. } => "persistence_failed",
        }
    }

    /// Event kind for metrics. Unrecognised kinds collapse to `unknown` so
    /// the label set stays bounded.
    pub fn kind_label(&self) -> &str {
        match self {
            Acknowledgement::Handled { kind, .. }
            | Acknowledgement::PersistenceFailed { kind, .. } => kind.as_str(),
            Acknowledgement::UnknownKind { .. } => "unknown",
            Acknowledgement::BadPayload { .. } => "unparsed",
        }
    }
}

pub struct WebhookDispatcher {
    machine: Arc<ContractStateMachine>,
    signing_secret: Option<Vec<u8>>,
}

impl WebhookDispatcher {
    /// `signing_secret` enables HMAC verification of every body.
    pub fn new(machine: Arc<ContractStateMachine>, signing_secret: Option<Vec<u8>>) -> Self {
        Self {
            machine,
            signing_secret,
        }
    }

    pub fn verifies_signatures(&self) -> bool {
        self.signing_secret.is_some()
    }

    /// Receive one delivery.
    ///
    /// Only a non-POST method or a bad signature is an error; everything
    /// else is acknowledged.
    pub fn receive(
        &self,
        method: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<Acknowledgement, WebhookError> {
        if !method.eq_ignore_ascii_case("POST") {
            return Err(WebhookError::MethodNotAllowed(method.to_string()));
        }
        self.verify_signature(raw_body, signature)?;

        let event = match InboundEvent::parse(raw_body, Utc::now()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    body_len = raw_body.len(),
                    "malformed webhook acknowledged and dropped"
                );
                return Ok(Acknowledgement::BadPayload {
                    reason: e.to_string(),
                });
            }
        };

        Ok(self.dispatch(&event))
    }

    fn verify_signature(&self, raw_body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
        let Some(ref secret) = self.signing_secret else {
            return Ok(());
        };
        let Some(signature) = signature else {
            tracing::warn!("webhook signature header missing");
            return Err(WebhookError::MissingSignature);
        };
        if crate::hmac::verify(secret, raw_body, signature) {
            return Ok(());
        }
        tracing::warn!("webhook signature mismatch");
        Err(WebhookError::InvalidSignature)
    }

    /// Route a parsed event to its transition.
    pub fn dispatch(&self, event: &InboundEvent) -> Acknowledgement {
        let Some(target) = event.kind.target_status() else {
            tracing::warn!(
                kind = %event.kind,
                document_id = %event.document_id,
                "unknown webhook event kind acknowledged and ignored"
            );
            return Acknowledgement::UnknownKind {
                kind: event.kind.to_string(),
                document_id: event.document_id.clone(),
            };
        };

        match self.machine.apply(
            &event.document_id,
            target,
            event.received_at,
            Some(&event.payload),
        ) {
            Ok(outcome) => {
                if outcome == ApplyOutcome::NotFound {
                    tracing::warn!(
                        kind = %event.kind,
                        document_id = %event.document_id,
                        "webhook for unlinked document acknowledged without changes"
                    );
                }
                Acknowledgement::Handled {
                    kind: event.kind.clone(),
                    outcome,
                }
            }
            Err(e) => {
                tracing::error!(
                    kind = %event.kind,
                    document_id = %event.document_id,
                    error = %e,
                    "failed to persist webhook event, acknowledged anyway"
                );
                Acknowledgement::PersistenceFailed {
                    kind: event.kind.clone(),
                    document_id: event.document_id.clone(),
                    error: e.to_string(),
                }
            }
        }
    }
}
