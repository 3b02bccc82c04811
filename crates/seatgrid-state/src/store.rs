//! StateStore — redb-backed directory of licenses and instances.
//!
//! Provides typed CRUD operations with optimistic concurrency. Every write
//! happens in a single redb write transaction that re-reads the stored
//! `resource_version`, compares it with the caller's expectation, and
//! bumps it. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe directory backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent directory at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory directory (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(LICENSES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Licenses ───────────────────────────────────────────────────

    /// Insert or replace a license.
    ///
    /// `license.resource_version` must match the stored version (0 for a
    /// new record). Returns the record as stored, with its new version.
    pub fn put_license(&self, license: &LicenseRecord) -> StateResult<LicenseRecord> {
        validate_name("license", &license.name)?;
        validate_name("namespace", &license.namespace)?;
        let key = license.table_key();
        let stored = self.put_versioned(LICENSES, &key, license)?;
        debug!(%key, version = stored.resource_version, "license stored");
        Ok(stored)
    }

    /// Get a license by `{namespace}/{name}` key.
    pub fn get_license(&self, key: &str) -> StateResult<Option<LicenseRecord>> {
        self.get_json(LICENSES, key)
    }

    /// List all licenses.
    pub fn list_licenses(&self) -> StateResult<Vec<LicenseRecord>> {
        self.scan_json(LICENSES, "")
    }

    /// Read-modify-write a license in one transaction.
    ///
    /// With `expected = Some(v)` the patch is rejected if the stored record
    /// changed since version `v` was read.
    pub fn patch_license<F>(
        &self,
        key: &str,
        expected: Option<u64>,
        patch: F,
    ) -> StateResult<LicenseRecord>
    where
        F: FnOnce(&mut LicenseRecord),
    {
        let stored = self.patch_versioned(LICENSES, key, expected, patch)?;
        debug!(%key, version = stored.resource_version, "license patched");
        Ok(stored)
    }

    /// Delete a license by key. Returns true if it existed.
    pub fn delete_license(&self, key: &str) -> StateResult<bool> {
        let existed = self.remove(LICENSES, key)?;
        debug!(%key, existed, "license deleted");
        Ok(existed)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or replace an instance, with the same version rules as
    /// [`put_license`](Self::put_license).
    pub fn put_instance(&self, instance: &InstanceRecord) -> StateResult<InstanceRecord> {
        validate_name("instance", &instance.name)?;
        validate_name("namespace", &instance.namespace)?;
        let key = instance.table_key();
        let stored = self.put_versioned(INSTANCES, &key, instance)?;
        debug!(%key, version = stored.resource_version, "instance stored");
        Ok(stored)
    }

    /// Get an instance by `{namespace}/{name}` key.
    pub fn get_instance(&self, key: &str) -> StateResult<Option<InstanceRecord>> {
        self.get_json(INSTANCES, key)
    }

    /// List every instance in every namespace.
    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        self.scan_json(INSTANCES, "")
    }

    /// List the instances referencing a license, read in one transaction.
    pub fn list_instances_for_license(&self, license_key: &str) -> StateResult<Vec<InstanceRecord>> {
        let (namespace, license) = split_key(license_key)
            .ok_or_else(|| StateError::Invalid(format!("malformed license key '{license_key}'")))?;
        let prefix = format!("{namespace}/");
        let instances: Vec<InstanceRecord> = self.scan_json(INSTANCES, &prefix)?;
        Ok(instances
            .into_iter()
            .filter(|i| i.license.as_deref() == Some(license))
            .collect())
    }

    /// Read-modify-write an instance in one transaction.
    pub fn patch_instance<F>(
        &self,
        key: &str,
        expected: Option<u64>,
        patch: F,
    ) -> StateResult<InstanceRecord>
    where
        F: FnOnce(&mut InstanceRecord),
    {
        self.patch_versioned(INSTANCES, key, expected, patch)
    }

    /// Replace only the cached session snapshot of an instance.
    pub fn update_session(&self, key: &str, session: SessionSnapshot) -> StateResult<InstanceRecord> {
        self.patch_versioned(INSTANCES, key, None, |inst: &mut InstanceRecord| {
            inst.session = session;
        })
    }

    /// Delete an instance by key. Returns true if it existed.
    pub fn delete_instance(&self, key: &str) -> StateResult<bool> {
        let existed = self.remove(INSTANCES, key)?;
        debug!(%key, existed, "instance deleted");
        Ok(existed)
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    fn put_versioned<T>(&self, table: Table, key: &str, record: &T) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned + Versioned + Clone,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let actual = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<T>(guard.value())
                    .map_err(map_err!(Deserialize))?
                    .resource_version(),
                None => 0,
            };
            let expected = record.resource_version();
            if actual != expected {
                return Err(StateError::Conflict {
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }
            let mut next = record.clone();
            next.set_resource_version(actual + 1);
            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
            stored = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stored)
    }

    fn patch_versioned<T, F>(
        &self,
        table: Table,
        key: &str,
        expected: Option<u64>,
        patch: F,
    ) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned + Versioned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice::<T>(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;
            let mut record = current.ok_or_else(|| StateError::NotFound(key.to_string()))?;
            let actual = record.resource_version();
            if let Some(expected) = expected.filter(|v| *v != actual) {
                return Err(StateError::Conflict {
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }
            patch(&mut record);
            record.set_resource_version(actual + 1);
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
            stored = record;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stored)
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_license(ns: &str, name: &str) -> LicenseRecord {
        LicenseRecord::new(ns, name, 1000)
    }

    fn test_instance(ns: &str, name: &str, license: &str, created_at: u64) -> InstanceRecord {
        InstanceRecord::new(ns, name, license, created_at)
    }

    // ── License CRUD ───────────────────────────────────────────────

    #[test]
    fn license_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let stored = store.put_license(&test_license("tables", "main")).unwrap();
        assert_eq!(stored.resource_version, 1);

        let retrieved = store.get_license("tables/main").unwrap();
        assert_eq!(retrieved, Some(stored));
    }

    #[test]
    fn license_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_license("nope/nothing").unwrap().is_none());
    }

    #[test]
    fn license_create_twice_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_license(&test_license("tables", "main")).unwrap();

        let err = store.put_license(&test_license("tables", "main")).unwrap_err();
        assert!(matches!(
            err,
            StateError::Conflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn license_replace_with_current_version() {
        let store = StateStore::open_in_memory().unwrap();
        let mut stored = store.put_license(&test_license("tables", "main")).unwrap();
        stored.default_switchover_mode = SwitchoverMode::Queue;

        let replaced = store.put_license(&stored).unwrap();
        assert_eq!(replaced.resource_version, 2);
        assert_eq!(
            store.get_license("tables/main").unwrap().unwrap().default_switchover_mode,
            SwitchoverMode::Queue
        );
    }

    #[test]
    fn license_patch_checks_expected_version() {
        let store = StateStore::open_in_memory().unwrap();
        let stored = store.put_license(&test_license("tables", "main")).unwrap();

        let patched = store
            .patch_license("tables/main", Some(stored.resource_version), |l| {
                l.active_instance = Some("alpha".into());
            })
            .unwrap();
        assert_eq!(patched.resource_version, 2);

        // A second writer still holding version 1 loses.
        let err = store
            .patch_license("tables/main", Some(1), |l| l.active_instance = None)
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
        assert_eq!(
            store.get_license("tables/main").unwrap().unwrap().active_instance.as_deref(),
            Some("alpha")
        );
    }

    #[test]
    fn license_patch_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.patch_license("tables/ghost", None, |_| {}).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn license_rejects_invalid_name() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.put_license(&test_license("tables", "Main_License")).unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));
    }

    #[test]
    fn license_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_license(&test_license("tables", "main")).unwrap();

        assert!(store.delete_license("tables/main").unwrap());
        assert!(!store.delete_license("tables/main").unwrap());
        assert!(store.list_licenses().unwrap().is_empty());
    }

    // ── Instance CRUD ──────────────────────────────────────────────

    #[test]
    fn instances_listed_per_license() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("tables", "alpha", "main", 10)).unwrap();
        store.put_instance(&test_instance("tables", "beta", "main", 20)).unwrap();
        store.put_instance(&test_instance("tables", "gamma", "other", 30)).unwrap();
        store.put_instance(&test_instance("games", "delta", "main", 40)).unwrap();

        let main = store.list_instances_for_license("tables/main").unwrap();
        let names: Vec<_> = main.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        assert_eq!(store.list_instances().unwrap().len(), 4);
    }

    #[test]
    fn instance_without_license_is_not_listed_for_any_license() {
        let store = StateStore::open_in_memory().unwrap();
        let mut orphan = test_instance("tables", "orphan", "main", 10);
        orphan.license = None;
        store.put_instance(&orphan).unwrap();

        assert!(store.list_instances_for_license("tables/main").unwrap().is_empty());
    }

    #[test]
    fn malformed_license_key_is_invalid() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.list_instances_for_license("no-slash").unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));
    }

    #[test]
    fn update_session_bumps_version_and_keeps_other_fields() {
        let store = StateStore::open_in_memory().unwrap();
        let mut inst = test_instance("tables", "alpha", "main", 10);
        inst.scheduled_delete_at = Some(5000);
        store.put_instance(&inst).unwrap();

        let snap = SessionSnapshot {
            connected_players: Some(3),
            world_active: Some(true),
            last_probe_time: Some(1234),
            ..Default::default()
        };
        let updated = store.update_session("tables/alpha", snap.clone()).unwrap();

        assert_eq!(updated.session, snap);
        assert_eq!(updated.scheduled_delete_at, Some(5000));
        assert_eq!(updated.resource_version, 2);
    }

    #[test]
    fn instance_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("tables", "alpha", "main", 10)).unwrap();

        assert!(store.delete_instance("tables/alpha").unwrap());
        assert!(store.get_instance("tables/alpha").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_license(&test_license("tables", "main")).unwrap();
            store
                .patch_license("tables/main", None, |l| l.active_instance = Some("alpha".into()))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let license = store.get_license("tables/main").unwrap().unwrap();
        assert_eq!(license.active_instance.as_deref(), Some("alpha"));
        assert_eq!(license.resource_version, 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_licenses().unwrap().is_empty());
        assert!(store.list_instances().unwrap().is_empty());
        assert!(store.list_instances_for_license("ns/any").unwrap().is_empty());
        assert!(!store.delete_license("nope/x").unwrap());
        assert!(!store.delete_instance("nope/x").unwrap());
    }
}
