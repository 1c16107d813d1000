use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use refbook_core::{
    CreateElementCommand, CreateRefbookCommand, CreateVersionCommand, ElementId, Refbook,
    RefbookElement, RefbookId, RefbookVersion, VersionId,
};

// Re-export core storage types so callers can use crate::storage::*
pub use refbook_core::storage::{RefbookStore, StorageError, TransactionId};

#[derive(Clone, Default)]
struct StoreData {
    refbooks: BTreeMap<RefbookId, Refbook>,
    versions: BTreeMap<VersionId, RefbookVersion>,
    // keyed by code so iteration is already in code order
    elements: BTreeMap<VersionId, BTreeMap<Arc<str>, RefbookElement>>,
    last_id: i64,
}

impl StoreData {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

pub struct InMemoryStorage {
    data: RwLock<StoreData>,
    tx_counter: AtomicU64,
    snapshots: RwLock<HashMap<TransactionId, StoreData>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            tx_counter: AtomicU64::new(1),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>, StorageError> {
        self.data.read().map_err(|e| StorageError::Other(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>, StorageError> {
        self.data.write().map_err(|e| StorageError::Other(e.to_string()))
    }

    fn snapshots(&self) -> Result<RwLockWriteGuard<'_, HashMap<TransactionId, StoreData>>, StorageError> {
        self.snapshots.write().map_err(|e| StorageError::Other(e.to_string()))
    }
}

impl RefbookStore for InMemoryStorage {
    fn create_refbook(&self, command: &CreateRefbookCommand) -> Result<RefbookId, StorageError> {
        let mut data = self.write()?;
        if data.refbooks.values().any(|r| r.code == command.code) {
            return Err(StorageError::AlreadyExists(format!("refbook code {}", command.code)));
        }
        let id = data.next_id();
        data.refbooks.insert(id, Refbook {
            id,
            code: command.code.clone(),
            name: command.name.clone(),
            description: command.description.clone(),
        });
        tracing::debug!(refbook_id = id, code = %command.code, "Refbook created");
        Ok(id)
    }

    fn create_version(&self, command: &CreateVersionCommand) -> Result<VersionId, StorageError> {
        let mut data = self.write()?;
        if !data.refbooks.contains_key(&command.refbook_id) {
            return Err(StorageError::RefbookNotFound(command.refbook_id));
        }
        let siblings = data.versions.values().filter(|v| v.refbook_id == command.refbook_id);
        for existing in siblings {
            if existing.version == command.version {
                return Err(StorageError::AlreadyExists(format!("version {}", command.version)));
            }
            if existing.start_date == command.start_date {
                return Err(StorageError::AlreadyExists(format!("version starting {}", command.start_date)));
            }
        }
        let id = data.next_id();
        data.versions.insert(id, RefbookVersion {
            id,
            refbook_id: command.refbook_id,
            version: command.version.clone(),
            start_date: command.start_date,
        });
        tracing::debug!(version_id = id, refbook_id = command.refbook_id, version = %command.version, "Version created");
        Ok(id)
    }

    fn create_element(&self, command: &CreateElementCommand) -> Result<ElementId, StorageError> {
        let mut data = self.write()?;
        if !data.versions.contains_key(&command.version_id) {
            return Err(StorageError::VersionNotFound(command.version_id));
        }
        let id = data.next_id();
        let elements = data.elements.entry(command.version_id).or_default();
        if elements.contains_key(&command.code) {
            return Err(StorageError::AlreadyExists(format!("element code {}", command.code)));
        }
        elements.insert(command.code.clone(), RefbookElement {
            id,
            version_id: command.version_id,
            code: command.code.clone(),
            value: command.value.clone(),
        });
        Ok(id)
    }

    fn delete_refbook(&self, id: RefbookId) -> Result<(), StorageError> {
        let mut data = self.write()?;
        data.refbooks.remove(&id)
            .ok_or(StorageError::RefbookNotFound(id))?;
        let version_ids: Vec<VersionId> = data.versions.values()
            .filter(|v| v.refbook_id == id)
            .map(|v| v.id)
            .collect();
        for version_id in &version_ids {
            data.versions.remove(version_id);
            data.elements.remove(version_id);
        }
        tracing::debug!(refbook_id = id, versions = version_ids.len(), "Refbook deleted");
        Ok(())
    }

    fn get_refbook(&self, id: RefbookId) -> Result<Option<Refbook>, StorageError> {
        Ok(self.read()?.refbooks.get(&id).cloned())
    }

    fn list_refbooks(&self) -> Result<Vec<Refbook>, StorageError> {
        Ok(self.read()?.refbooks.values().cloned().collect())
    }

    fn list_versions(&self, refbook_id: RefbookId) -> Result<Vec<RefbookVersion>, StorageError> {
        Ok(self.read()?.versions.values()
            .filter(|v| v.refbook_id == refbook_id)
            .cloned()
            .collect())
    }

    fn list_elements(&self, version_id: VersionId) -> Result<Vec<RefbookElement>, StorageError> {
        let data = self.read()?;
        match data.elements.get(&version_id) {
            Some(elements) => Ok(elements.values().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.read()?.clone();
        self.snapshots()?.insert(tx_id, snapshot);
        tracing::debug!(tx_id, "Transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        self.snapshots()?.remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction)?;
        tracing::debug!(tx_id, "Transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let snapshot = self.snapshots()?.remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction)?;
        *self.write()? = snapshot;
        tracing::debug!(tx_id, "Transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Month};

    fn date(y: i32, m: Month, d: u8) -> Date {
        Date::from_calendar_date(y, m, d).unwrap()
    }

    fn refbook(storage: &InMemoryStorage, code: &str) -> RefbookId {
        storage.create_refbook(&CreateRefbookCommand {
            code: Arc::from(code),
            name: Arc::from("Medical Specialties"),
            description: None,
        }).unwrap()
    }

    fn version(storage: &InMemoryStorage, refbook_id: RefbookId, label: &str, start: Date) -> VersionId {
        storage.create_version(&CreateVersionCommand {
            refbook_id,
            version: Arc::from(label),
            start_date: start,
        }).unwrap()
    }

    fn element(storage: &InMemoryStorage, version_id: VersionId, code: &str, value: &str) -> Result<ElementId, StorageError> {
        storage.create_element(&CreateElementCommand {
            version_id,
            code: Arc::from(code),
            value: Arc::from(value),
        })
    }

    #[test]
    fn test_refbook_code_is_unique() {
        let storage = InMemoryStorage::new();
        refbook(&storage, "RB1");
        let err = storage.create_refbook(&CreateRefbookCommand {
            code: Arc::from("RB1"),
            name: Arc::from("Other"),
            description: None,
        });
        assert!(matches!(err, Err(StorageError::AlreadyExists(_))));
    }

    #[test]
    fn test_version_label_and_start_date_unique_per_refbook() {
        let storage = InMemoryStorage::new();
        let rb1 = refbook(&storage, "RB1");
        let rb2 = refbook(&storage, "RB2");
        version(&storage, rb1, "1.0", date(2022, Month::January, 1));

        let same_label = storage.create_version(&CreateVersionCommand {
            refbook_id: rb1,
            version: Arc::from("1.0"),
            start_date: date(2023, Month::January, 1),
        });
        assert!(matches!(same_label, Err(StorageError::AlreadyExists(_))));

        let same_date = storage.create_version(&CreateVersionCommand {
            refbook_id: rb1,
            version: Arc::from("2.0"),
            start_date: date(2022, Month::January, 1),
        });
        assert!(matches!(same_date, Err(StorageError::AlreadyExists(_))));

        // another refbook may reuse both
        version(&storage, rb2, "1.0", date(2022, Month::January, 1));
    }

    #[test]
    fn test_version_requires_refbook() {
        let storage = InMemoryStorage::new();
        let err = storage.create_version(&CreateVersionCommand {
            refbook_id: 42,
            version: Arc::from("1.0"),
            start_date: date(2022, Month::January, 1),
        });
        assert!(matches!(err, Err(StorageError::RefbookNotFound(42))));
    }

    #[test]
    fn test_elements_unique_and_ordered_by_code() {
        let storage = InMemoryStorage::new();
        let rb = refbook(&storage, "RB1");
        let v = version(&storage, rb, "1.0", date(2022, Month::January, 1));
        element(&storage, v, "2", "Orthopedist").unwrap();
        element(&storage, v, "1", "Therapist").unwrap();
        assert!(matches!(element(&storage, v, "1", "Other"), Err(StorageError::AlreadyExists(_))));

        let codes: Vec<String> = storage.list_elements(v).unwrap()
            .iter()
            .map(|e| e.code.to_string())
            .collect();
        assert_eq!(codes, vec!["1", "2"]);
    }

    #[test]
    fn test_delete_refbook_cascades() {
        let storage = InMemoryStorage::new();
        let rb = refbook(&storage, "RB1");
        let v = version(&storage, rb, "1.0", date(2022, Month::January, 1));
        element(&storage, v, "1", "Therapist").unwrap();

        storage.delete_refbook(rb).unwrap();

        assert!(storage.get_refbook(rb).unwrap().is_none());
        assert!(storage.list_versions(rb).unwrap().is_empty());
        assert!(storage.list_elements(v).unwrap().is_empty());
        assert!(matches!(storage.delete_refbook(rb), Err(StorageError::RefbookNotFound(_))));
    }

    #[test]
    fn test_transaction_rollback() {
        let storage = InMemoryStorage::new();
        refbook(&storage, "RB1");

        let tx_id = storage.begin_transaction().unwrap();
        refbook(&storage, "RB2");
        storage.rollback_transaction(tx_id).unwrap();

        let codes: Vec<String> = storage.list_refbooks().unwrap()
            .iter()
            .map(|r| r.code.to_string())
            .collect();
        assert_eq!(codes, vec!["RB1"]);
        assert!(matches!(storage.commit_transaction(tx_id), Err(StorageError::NoActiveTransaction)));
    }
}
