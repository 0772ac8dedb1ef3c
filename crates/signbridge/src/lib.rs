//! Signature lifecycle core for contracts signed through an external
//! e-signature provider.
//!
//! The crate owns three concerns:
//! - the contract status state machine ([`state_machine`]), which applies
//!   provider events idempotently and never lets a status regress,
//! - the persistence seam ([`store`]) with SQLite and in-memory backends,
//! - inbound webhook classification and dispatch ([`webhook`]).
//!
//! Provider path normalization ([`path`]) lives here too, so that the HTTP
//! gateway and any other caller resolve resources the same way.

pub mod constants;
pub mod contract;
pub mod error;
pub mod event;
pub mod hmac;
pub mod path;
pub mod security;
pub mod sqlite;
pub mod state_machine;
pub mod store;
pub mod webhook;

pub use contract::{Contract, ContractStatus};
pub use error::{PathError, PayloadError, StateError, StoreError, WebhookError};
pub use event::{EventKind, InboundEvent};
pub use path::{normalize, ProviderPath};
pub use sqlite::SqliteContractStore;
pub use state_machine::{ApplyOutcome, ContractStateMachine, TransitionPolicy};
pub use store::{ContractStore, InMemoryContractStore, StatusUpdate};
pub use webhook::{Acknowledgement, WebhookDispatcher};
