use serde_json::json;
use signbridge::contract::ContractStatus;
use signbridge::store::{ContractStore, InMemoryContractStore};
use signbridge::{ContractStateMachine, SqliteContractStore, TransitionPolicy, WebhookDispatcher};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn body(event: &str, doc: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({"event": event, "data": {"document_id": doc}})).unwrap()
}

fn dispatcher(store: Arc<dyn ContractStore>) -> Arc<WebhookDispatcher> {
    let machine = Arc::new(ContractStateMachine::new(store, TransitionPolicy::default()));
    Arc::new(WebhookDispatcher::new(machine, None))
}

/// Deliver signed and completed events for `doc` from many threads at once,
/// each through its own dispatcher.
fn hammer(dispatchers: Vec<Arc<WebhookDispatcher>>, doc: &'static str) {
    let handles: Vec<_> = dispatchers
        .into_iter()
        .enumerate()
        .map(|(i, dispatcher)| {
            thread::spawn(move || {
                for round in 0..20 {
                    let event = if (i + round) % 2 == 0 {
                        "document_signed"
                    } else {
                        "document_completed"
                    };
                    let ack = dispatcher.receive("POST", &body(event, doc), None).unwrap();
                    assert_ne!(ack.label(), "persistence_failed");
                    assert_ne!(ack.label(), "conflict");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_concurrent_deliveries_in_memory() {
    let store = Arc::new(InMemoryContractStore::new());
    let draft = store.create_draft().unwrap();
    store
        .link_external_id(draft.id, "doc-1", chrono::Utc::now())
        .unwrap();

    let shared = dispatcher(store.clone());
    hammer((0..8).map(|_| shared.clone()).collect(), "doc-1");

    let contract = store.find_by_id(draft.id).unwrap().unwrap();
    assert_eq!(contract.status, ContractStatus::SignedComplete);
    assert!(contract.signed_complete_at.is_some());
}

#[test]
fn test_concurrent_deliveries_across_sqlite_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contracts.db");
    let path = path.to_str().unwrap().to_string();

    let seed = SqliteContractStore::open(&path, Duration::from_secs(5)).unwrap();
    let draft = seed.create_draft().unwrap();
    seed.link_external_id(draft.id, "doc-1", chrono::Utc::now())
        .unwrap();

    // Separate connections, like separate worker processes.
    let dispatchers = (0..4)
        .map(|_| {
            let store = SqliteContractStore::open(&path, Duration::from_secs(5)).unwrap();
            dispatcher(Arc::new(store))
        })
        .collect();
    hammer(dispatchers, "doc-1");

    let contract = seed.find_by_id(draft.id).unwrap().unwrap();
    assert_eq!(contract.status, ContractStatus::SignedComplete);
    assert!(contract.signed_complete_at.is_some());
}
