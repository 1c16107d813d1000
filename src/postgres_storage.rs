use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use postgres::{error::SqlState, Client, NoTls, Row};
use refbook_core::{
    format_date, parse_date, CreateElementCommand, CreateRefbookCommand, CreateVersionCommand,
    ElementId, Refbook, RefbookElement, RefbookId, RefbookVersion, VersionId,
};

use crate::storage::{RefbookStore, StorageError, TransactionId};

pub struct PostgresStorage {
    client: Mutex<Client>,
    tx_counter: AtomicU64,
    active_tx: Mutex<Option<TransactionId>>,
}

impl PostgresStorage {
    /// Connects with a blocking client. Must not be called from inside an
    /// async task; the server constructs it before starting the runtime work.
    pub fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = Client::connect(connection_string, NoTls)
            .map_err(|e| StorageError::Other(format!("PostgreSQL connection failed: {}", e)))?;

        let storage = Self {
            client: Mutex::new(client),
            tx_counter: AtomicU64::new(1),
            active_tx: Mutex::new(None),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let mut client = self.client()?;
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS refbooks (
                id BIGSERIAL PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS refbook_versions (
                id BIGSERIAL PRIMARY KEY,
                refbook_id BIGINT NOT NULL REFERENCES refbooks(id) ON DELETE CASCADE,
                version TEXT NOT NULL,
                start_date TEXT NOT NULL,
                UNIQUE (refbook_id, version),
                UNIQUE (refbook_id, start_date)
            );

            CREATE TABLE IF NOT EXISTS refbook_elements (
                id BIGSERIAL PRIMARY KEY,
                version_id BIGINT NOT NULL REFERENCES refbook_versions(id) ON DELETE CASCADE,
                code TEXT NOT NULL,
                value TEXT NOT NULL,
                UNIQUE (version_id, code)
            );

            CREATE INDEX IF NOT EXISTS idx_pg_versions_refbook_date
                ON refbook_versions(refbook_id, start_date);
            ",
            )
            .map_err(other)?;
        Ok(())
    }

    fn client(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        self.client.lock().map_err(|e| StorageError::Other(e.to_string()))
    }

    fn active_tx(&self) -> Result<MutexGuard<'_, Option<TransactionId>>, StorageError> {
        self.active_tx.lock().map_err(|e| StorageError::Other(e.to_string()))
    }
}

fn other(e: postgres::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn insert_error(e: postgres::Error, what: String) -> StorageError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StorageError::AlreadyExists(what)
    } else {
        other(e)
    }
}

fn row_to_refbook(row: &Row) -> Refbook {
    let code: String = row.get(1);
    let name: String = row.get(2);
    let description: Option<String> = row.get(3);
    Refbook {
        id: row.get(0),
        code: Arc::from(code),
        name: Arc::from(name),
        description: description.map(Arc::from),
    }
}

fn row_to_version(row: &Row) -> Result<RefbookVersion, StorageError> {
    let version: String = row.get(2);
    let start_date: String = row.get(3);
    let start_date = parse_date(&start_date)
        .map_err(|e| StorageError::Other(format!("Invalid start_date {:?}: {}", start_date, e)))?;
    Ok(RefbookVersion {
        id: row.get(0),
        refbook_id: row.get(1),
        version: Arc::from(version),
        start_date,
    })
}

fn row_to_element(row: &Row) -> RefbookElement {
    let code: String = row.get(2);
    let value: String = row.get(3);
    RefbookElement {
        id: row.get(0),
        version_id: row.get(1),
        code: Arc::from(code),
        value: Arc::from(value),
    }
}

impl RefbookStore for PostgresStorage {
    fn create_refbook(&self, command: &CreateRefbookCommand) -> Result<RefbookId, StorageError> {
        let mut client = self.client()?;
        let row = client
            .query_one(
                "INSERT INTO refbooks (code, name, description) VALUES ($1, $2, $3) RETURNING id",
                &[&command.code.as_ref(), &command.name.as_ref(), &command.description.as_deref()],
            )
            .map_err(|e| insert_error(e, format!("refbook code {}", command.code)))?;
        let id: i64 = row.get(0);
        tracing::debug!(refbook_id = id, code = %command.code, "PostgreSQL refbook created");
        Ok(id)
    }

    fn create_version(&self, command: &CreateVersionCommand) -> Result<VersionId, StorageError> {
        let mut client = self.client()?;
        let exists = client
            .query_opt("SELECT 1 FROM refbooks WHERE id = $1", &[&command.refbook_id])
            .map_err(other)?
            .is_some();
        if !exists {
            return Err(StorageError::RefbookNotFound(command.refbook_id));
        }

        let row = client
            .query_one(
                "INSERT INTO refbook_versions (refbook_id, version, start_date) VALUES ($1, $2, $3) RETURNING id",
                &[&command.refbook_id, &command.version.as_ref(), &format_date(command.start_date)],
            )
            .map_err(|e| insert_error(e, format!("version {} starting {}", command.version, command.start_date)))?;
        let id: i64 = row.get(0);
        tracing::debug!(version_id = id, refbook_id = command.refbook_id, version = %command.version, "PostgreSQL version created");
        Ok(id)
    }

    fn create_element(&self, command: &CreateElementCommand) -> Result<ElementId, StorageError> {
        let mut client = self.client()?;
        let exists = client
            .query_opt("SELECT 1 FROM refbook_versions WHERE id = $1", &[&command.version_id])
            .map_err(other)?
            .is_some();
        if !exists {
            return Err(StorageError::VersionNotFound(command.version_id));
        }

        let row = client
            .query_one(
                "INSERT INTO refbook_elements (version_id, code, value) VALUES ($1, $2, $3) RETURNING id",
                &[&command.version_id, &command.code.as_ref(), &command.value.as_ref()],
            )
            .map_err(|e| insert_error(e, format!("element code {}", command.code)))?;
        Ok(row.get(0))
    }

    fn delete_refbook(&self, id: RefbookId) -> Result<(), StorageError> {
        let mut client = self.client()?;
        let deleted = client
            .execute("DELETE FROM refbooks WHERE id = $1", &[&id])
            .map_err(other)?;
        if deleted == 0 {
            return Err(StorageError::RefbookNotFound(id));
        }
        tracing::debug!(refbook_id = id, "PostgreSQL refbook deleted");
        Ok(())
    }

    fn get_refbook(&self, id: RefbookId) -> Result<Option<Refbook>, StorageError> {
        let mut client = self.client()?;
        let row = client
            .query_opt("SELECT id, code, name, description FROM refbooks WHERE id = $1", &[&id])
            .map_err(other)?;
        Ok(row.as_ref().map(row_to_refbook))
    }

    fn list_refbooks(&self) -> Result<Vec<Refbook>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query("SELECT id, code, name, description FROM refbooks ORDER BY code COLLATE \"C\"", &[])
            .map_err(other)?;
        Ok(rows.iter().map(row_to_refbook).collect())
    }

    fn list_versions(&self, refbook_id: RefbookId) -> Result<Vec<RefbookVersion>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query(
                "SELECT id, refbook_id, version, start_date FROM refbook_versions
                 WHERE refbook_id = $1 ORDER BY start_date",
                &[&refbook_id],
            )
            .map_err(other)?;
        rows.iter().map(row_to_version).collect()
    }

    fn list_elements(&self, version_id: VersionId) -> Result<Vec<RefbookElement>, StorageError> {
        let mut client = self.client()?;
        let rows = client
            .query(
                "SELECT id, version_id, code, value FROM refbook_elements
                 WHERE version_id = $1 ORDER BY code COLLATE \"C\"",
                &[&version_id],
            )
            .map_err(other)?;
        Ok(rows.iter().map(row_to_element).collect())
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut active = self.active_tx()?;
        if active.is_some() {
            return Err(StorageError::Other("transaction already in progress".to_string()));
        }
        let mut client = self.client()?;
        client
            .batch_execute("BEGIN")
            .map_err(other)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        *active = Some(tx_id);
        tracing::debug!(tx_id, "PostgreSQL transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let mut client = self.client()?;
        client
            .batch_execute("COMMIT")
            .map_err(other)?;
        *active = None;
        tracing::debug!(tx_id, "PostgreSQL transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let mut client = self.client()?;
        client
            .batch_execute("ROLLBACK")
            .map_err(other)?;
        *active = None;
        tracing::debug!(tx_id, "PostgreSQL transaction rolled back");
        Ok(())
    }
}
