use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use refbook_core::{
    format_date, parse_date, CreateElementCommand, CreateRefbookCommand, CreateVersionCommand,
    ElementId, Refbook, RefbookElement, RefbookId, RefbookVersion, VersionId,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::storage::{RefbookStore, StorageError, TransactionId};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    tx_counter: AtomicU64,
    active_tx: Mutex<Option<TransactionId>>,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(other)?;

        if path != ":memory:" {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
                .map_err(other)?;
        }
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(other)?;

        let storage = Self {
            conn: Mutex::new(conn),
            tx_counter: AtomicU64::new(1),
            active_tx: Mutex::new(None),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS refbooks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS refbook_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                refbook_id INTEGER NOT NULL REFERENCES refbooks(id) ON DELETE CASCADE,
                version TEXT NOT NULL,
                start_date TEXT NOT NULL,
                UNIQUE (refbook_id, version),
                UNIQUE (refbook_id, start_date)
            );

            CREATE TABLE IF NOT EXISTS refbook_elements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version_id INTEGER NOT NULL REFERENCES refbook_versions(id) ON DELETE CASCADE,
                code TEXT NOT NULL,
                value TEXT NOT NULL,
                UNIQUE (version_id, code)
            );

            CREATE INDEX IF NOT EXISTS idx_versions_refbook_date
                ON refbook_versions(refbook_id, start_date);
            ",
        )
        .map_err(other)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|e| StorageError::Other(e.to_string()))
    }

    fn active_tx(&self) -> Result<MutexGuard<'_, Option<TransactionId>>, StorageError> {
        self.active_tx.lock().map_err(|e| StorageError::Other(e.to_string()))
    }
}

fn other(e: rusqlite::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn insert_error(e: rusqlite::Error, what: String) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            StorageError::AlreadyExists(what)
        }
        _ => other(e),
    }
}

fn row_to_refbook(row: &Row<'_>) -> rusqlite::Result<Refbook> {
    let code: String = row.get(1)?;
    let name: String = row.get(2)?;
    let description: Option<String> = row.get(3)?;
    Ok(Refbook {
        id: row.get(0)?,
        code: Arc::from(code),
        name: Arc::from(name),
        description: description.map(Arc::from),
    })
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<RefbookVersion> {
    let version: String = row.get(2)?;
    let start_date: String = row.get(3)?;
    let start_date = parse_date(&start_date)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(RefbookVersion {
        id: row.get(0)?,
        refbook_id: row.get(1)?,
        version: Arc::from(version),
        start_date,
    })
}

fn row_to_element(row: &Row<'_>) -> rusqlite::Result<RefbookElement> {
    let code: String = row.get(2)?;
    let value: String = row.get(3)?;
    Ok(RefbookElement {
        id: row.get(0)?,
        version_id: row.get(1)?,
        code: Arc::from(code),
        value: Arc::from(value),
    })
}

impl RefbookStore for SqliteStorage {
    fn create_refbook(&self, command: &CreateRefbookCommand) -> Result<RefbookId, StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO refbooks (code, name, description) VALUES (?1, ?2, ?3)",
            params![command.code.as_ref(), command.name.as_ref(), command.description.as_deref()],
        )
        .map_err(|e| insert_error(e, format!("refbook code {}", command.code)))?;
        let id = conn.last_insert_rowid();
        tracing::debug!(refbook_id = id, code = %command.code, "SQLite refbook created");
        Ok(id)
    }

    fn create_version(&self, command: &CreateVersionCommand) -> Result<VersionId, StorageError> {
        let conn = self.conn()?;
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM refbooks WHERE id = ?1",
                params![command.refbook_id],
                |row| row.get(0),
            )
            .map_err(other)?;
        if !exists {
            return Err(StorageError::RefbookNotFound(command.refbook_id));
        }

        conn.execute(
            "INSERT INTO refbook_versions (refbook_id, version, start_date) VALUES (?1, ?2, ?3)",
            params![command.refbook_id, command.version.as_ref(), format_date(command.start_date)],
        )
        .map_err(|e| insert_error(e, format!("version {} starting {}", command.version, command.start_date)))?;
        let id = conn.last_insert_rowid();
        tracing::debug!(version_id = id, refbook_id = command.refbook_id, version = %command.version, "SQLite version created");
        Ok(id)
    }

    fn create_element(&self, command: &CreateElementCommand) -> Result<ElementId, StorageError> {
        let conn = self.conn()?;
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM refbook_versions WHERE id = ?1",
                params![command.version_id],
                |row| row.get(0),
            )
            .map_err(other)?;
        if !exists {
            return Err(StorageError::VersionNotFound(command.version_id));
        }

        conn.execute(
            "INSERT INTO refbook_elements (version_id, code, value) VALUES (?1, ?2, ?3)",
            params![command.version_id, command.code.as_ref(), command.value.as_ref()],
        )
        .map_err(|e| insert_error(e, format!("element code {}", command.code)))?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_refbook(&self, id: RefbookId) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM refbooks WHERE id = ?1", params![id])
            .map_err(other)?;
        if deleted == 0 {
            return Err(StorageError::RefbookNotFound(id));
        }
        tracing::debug!(refbook_id = id, "SQLite refbook deleted");
        Ok(())
    }

    fn get_refbook(&self, id: RefbookId) -> Result<Option<Refbook>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, code, name, description FROM refbooks WHERE id = ?1",
            params![id],
            row_to_refbook,
        )
        .optional()
        .map_err(other)
    }

    fn list_refbooks(&self) -> Result<Vec<Refbook>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, code, name, description FROM refbooks ORDER BY code")
            .map_err(other)?;
        let rows = stmt.query_map([], row_to_refbook).map_err(other)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(other)
    }

    fn list_versions(&self, refbook_id: RefbookId) -> Result<Vec<RefbookVersion>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, refbook_id, version, start_date FROM refbook_versions
                 WHERE refbook_id = ?1 ORDER BY start_date",
            )
            .map_err(other)?;
        let rows = stmt.query_map(params![refbook_id], row_to_version).map_err(other)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(other)
    }

    fn list_elements(&self, version_id: VersionId) -> Result<Vec<RefbookElement>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, version_id, code, value FROM refbook_elements
                 WHERE version_id = ?1 ORDER BY code",
            )
            .map_err(other)?;
        let rows = stmt.query_map(params![version_id], row_to_element).map_err(other)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(other)
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut active = self.active_tx()?;
        let conn = self.conn()?;
        conn.execute_batch("SAVEPOINT refbook_tx")
            .map_err(other)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        *active = Some(tx_id);
        tracing::debug!(tx_id, "SQLite transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn()?;
        conn.execute_batch("RELEASE SAVEPOINT refbook_tx")
            .map_err(other)?;
        *active = None;
        tracing::debug!(tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn()?;
        conn.execute_batch("ROLLBACK TO SAVEPOINT refbook_tx; RELEASE SAVEPOINT refbook_tx")
            .map_err(other)?;
        *active = None;
        tracing::debug!(tx_id, "SQLite transaction rolled back");
        Ok(())
    }
}
