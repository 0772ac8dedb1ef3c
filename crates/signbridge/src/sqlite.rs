use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::contract::{Contract, ContractStatus};
use crate::error::StoreError;
use crate::store::{ContractStore, StatusUpdate};

const CONTRACT_COLUMNS: &str = "id, external_document_id, status, signed_by_issuer_at, \
     signed_complete_at, rejected_at, canceled_at, last_webhook_payload, created_at, updated_at";

/// Persistent contract store backed by SQLite.
///
/// Status writes are single `UPDATE ... WHERE status = ?` statements, so the
/// compare-and-set also holds against other processes sharing the file.
pub struct SqliteContractStore {
    conn: Mutex<Connection>,
}

impl SqliteContractStore {
    /// Open (or create) a contract database at `path`.
    ///
    /// `busy_timeout` bounds how long a write waits on a locked database
    /// before failing.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set contract database file permissions to 0600"
                );
            }
        }

        Self::init(conn, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS contracts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_document_id TEXT UNIQUE,
                status TEXT NOT NULL DEFAULT 'draft',
                signed_by_issuer_at INTEGER,
                signed_complete_at INTEGER,
                rejected_at INTEGER,
                canceled_at INTEGER,
                last_webhook_payload TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn query_one(
        &self,
        clause: &str,
        param: &dyn rusqlite::ToSql,
    ) -> Result<Option<Contract>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE {clause}");
        let row = conn
            .query_row(&sql, [param], ContractRow::from_row)
            .optional()?;
        row.map(ContractRow::into_contract).transpose()
    }
}

/// Column recording entry into `status`.
fn timestamp_column(status: ContractStatus) -> Option<&'static str> {
    match status {
        ContractStatus::SignedByIssuer => Some("signed_by_issuer_at"),
        ContractStatus::SignedComplete => Some("signed_complete_at"),
        ContractStatus::Rejected => Some("rejected_at"),
        ContractStatus::Canceled => Some("canceled_at"),
        ContractStatus::Draft | ContractStatus::SentForSignature => None,
    }
}

impl ContractStore for SqliteContractStore {
    fn create_draft(&self) -> Result<Contract, StoreError> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO contracts (status, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![ContractStatus::Draft.as_str(), now.timestamp_millis()],
        )?;
        let id = conn.last_insert_rowid();
        // Round-trip through millis so the returned record equals a later read.
        let now = from_millis(id, now.timestamp_millis())?;
        Ok(Contract::new_draft(id, now))
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Contract>, StoreError> {
        self.query_one("id = ?1", &id)
    }

    fn find_by_external_id(
        &self,
        external_document_id: &str,
    ) -> Result<Option<Contract>, StoreError> {
        self.query_one("external_document_id = ?1", &external_document_id)
    }

    fn link_external_id(
        &self,
        id: i64,
        external_document_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let result = conn.execute(
            r#"
            UPDATE contracts
            SET external_document_id = ?1, status = ?2, updated_at = ?3
            WHERE id = ?4 AND status = ?5 AND external_document_id IS NULL
            "#,
            params![
                external_document_id,
                ContractStatus::SentForSignature.as_str(),
                at.timestamp_millis(),
                id,
                ContractStatus::Draft.as_str(),
            ],
        );

        match result {
            Ok(0) => {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM contracts WHERE id = ?1)",
                    [id],
                    |row| row.get(0),
                )?;
                if exists {
                    Ok(false)
                } else {
                    Err(StoreError::NotFound(id))
                }
            }
            Ok(_) => Ok(true),
            // SQLITE_CONSTRAINT_UNIQUE
            Err(rusqlite::Error::SqliteFailure(ref err, _)) if err.extended_code == 2067 => Err(
                StoreError::DuplicateExternalId(external_document_id.to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn apply_status_update(&self, update: &StatusUpdate) -> Result<bool, StoreError> {
        let payload = update
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Column names come from a fixed match, never from input.
        let stamp = timestamp_column(update.next)
            .map(|col| format!(", {col} = COALESCE({col}, ?2)"))
            .unwrap_or_default();
        let sql = format!(
            "UPDATE contracts \
             SET status = ?1, updated_at = ?2, \
                 last_webhook_payload = COALESCE(?3, last_webhook_payload){stamp} \
             WHERE external_document_id = ?4 AND status = ?5"
        );

        let conn = self.conn()?;
        let changed = conn.execute(
            &sql,
            params![
                update.next.as_str(),
                update.at.timestamp_millis(),
                payload,
                update.external_document_id,
                update.expected.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn record_payload(
        &self,
        external_document_id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(payload)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE contracts SET last_webhook_payload = ?1 WHERE external_document_id = ?2",
            params![payload, external_document_id],
        )?;
        Ok(changed == 1)
    }
}

struct ContractRow {
    id: i64,
    external_document_id: Option<String>,
    status: String,
    signed_by_issuer_at: Option<i64>,
    signed_complete_at: Option<i64>,
    rejected_at: Option<i64>,
    canceled_at: Option<i64>,
    last_webhook_payload: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl ContractRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            external_document_id: row.get(1)?,
            status: row.get(2)?,
            signed_by_issuer_at: row.get(3)?,
            signed_complete_at: row.get(4)?,
            rejected_at: row.get(5)?,
            canceled_at: row.get(6)?,
            last_webhook_payload: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_contract(self) -> Result<Contract, StoreError> {
        let id = self.id;
        let status = self.status.parse().map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("{e}"),
        })?;
        let ts = |ms: Option<i64>| ms.map(|ms| from_millis(id, ms)).transpose();
        let last_webhook_payload = self
            .last_webhook_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                id,
                reason: format!("last_webhook_payload: {e}"),
            })?;

        Ok(Contract {
            id,
            external_document_id: self.external_document_id,
            status,
            signed_by_issuer_at: ts(self.signed_by_issuer_at)?,
            signed_complete_at: ts(self.signed_complete_at)?,
            rejected_at: ts(self.rejected_at)?,
            canceled_at: ts(self.canceled_at)?,
            last_webhook_payload,
            created_at: from_millis(id, self.created_at)?,
            updated_at: from_millis(id, self.updated_at)?,
        })
    }
}

fn from_millis(id: i64, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        id,
        reason: format!("timestamp out of range: {ms}"),
    })
}
