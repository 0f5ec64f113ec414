// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! In-memory relational primary store.
//!
//! Tables live behind one tokio `RwLock`. A transaction stages its writes in
//! a private overlay and reads through it, so it sees its own writes while
//! other readers see committed state only. `commit` applies the overlay in
//! one write-locked step; `rollback` (or drop) discards it.
//!
//! Row locks are keyed by `granule_id`. A transaction that calls
//! [`PrimaryTransaction::lock_granule`] holds the lock until it ends, which
//! serializes concurrent writers of one granule.
//!
//! ```text
//! begin() ──> Active ──commit()──> Committed (overlay applied, locks released)
//!               │
//!               └──rollback()/drop──> RolledBack (overlay discarded)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use granary_model::{
    construct_collection_id, FileRecord, GranuleRecord, Reference, ReferenceKind,
};

use crate::error::StoreError;
use crate::{PrimaryStore, PrimaryTransaction};

#[derive(Debug, Clone)]
struct ExecutionRow {
    arn: String,
    url: String,
}

#[derive(Debug, Default)]
struct Tables {
    collections: BTreeMap<i64, (String, String)>,
    executions: BTreeMap<i64, ExecutionRow>,
    providers: BTreeMap<i64, String>,
    pdrs: BTreeMap<i64, String>,
    async_operations: BTreeMap<i64, String>,
    granules: BTreeMap<i64, GranuleRecord>,
    /// `(granule_id, collection_cumulus_id)` to row id
    granule_keys: BTreeMap<(String, i64), i64>,
    files: BTreeMap<i64, FileRecord>,
    granule_executions: BTreeSet<(i64, i64)>,
}

impl Tables {
    /// Committed rows carrying `granule_id`, in collection order.
    fn granules_named<'a>(&'a self, granule_id: &str) -> impl Iterator<Item = &'a GranuleRecord> {
        let from = (granule_id.to_string(), i64::MIN);
        let to = (granule_id.to_string(), i64::MAX);
        self.granule_keys
            .range(from..=to)
            .filter_map(|(_, id)| self.granules.get(id))
    }

    fn insert_granule(&mut self, id: i64, row: GranuleRecord) {
        self.granule_keys
            .insert((row.granule_id.clone(), row.collection_cumulus_id), id);
        self.granules.insert(id, row);
    }

    fn lookup(&self, reference: &Reference) -> Option<i64> {
        fn find<V>(table: &BTreeMap<i64, V>, pred: impl Fn(&V) -> bool) -> Option<i64> {
            table.iter().find(|(_, row)| pred(row)).map(|(id, _)| *id)
        }
        match reference {
            Reference::Collection { name, version } => {
                find(&self.collections, |(n, v)| n == name && v == version)
            }
            Reference::ExecutionUrl(url) => find(&self.executions, |row| &row.url == url),
            Reference::ExecutionArn(arn) => find(&self.executions, |row| &row.arn == arn),
            Reference::Provider(name) => find(&self.providers, |row| row == name),
            Reference::Pdr(name) => find(&self.pdrs, |row| row == name),
            Reference::AsyncOperation(id) => find(&self.async_operations, |row| row == id),
        }
    }

    fn describe(&self, kind: ReferenceKind, cumulus_id: i64) -> Option<String> {
        match kind {
            ReferenceKind::Collection => self
                .collections
                .get(&cumulus_id)
                .map(|(name, version)| construct_collection_id(name, version)),
            ReferenceKind::Execution => self.executions.get(&cumulus_id).map(|row| row.url.clone()),
            ReferenceKind::Provider => self.providers.get(&cumulus_id).cloned(),
            ReferenceKind::Pdr => self.pdrs.get(&cumulus_id).cloned(),
            ReferenceKind::AsyncOperation => self.async_operations.get(&cumulus_id).cloned(),
        }
    }
}

struct Shared {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
    /// Entries are pruned once no transaction holds or awaits them.
    row_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    active: AtomicUsize,
}

impl Shared {
    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Relational primary store held entirely in memory.
///
/// Reference rows (collections, executions, providers, PDRs, async
/// operations) are registered up front; granules, files and the
/// granule/execution join table are only written through transactions.
/// Clones share the same tables.
#[derive(Clone)]
pub struct InMemoryPrimaryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryPrimaryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPrimaryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                next_id: AtomicI64::new(1),
                row_locks: std::sync::Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub async fn register_collection(&self, name: &str, version: &str) -> i64 {
        let reference = Reference::Collection {
            name: name.to_string(),
            version: version.to_string(),
        };
        let mut tables = self.shared.tables.write().await;
        if let Some(id) = tables.lookup(&reference) {
            return id;
        }
        let id = self.shared.allocate_id();
        tables
            .collections
            .insert(id, (name.to_string(), version.to_string()));
        id
    }

    pub async fn register_execution(&self, arn: &str, url: &str) -> i64 {
        let mut tables = self.shared.tables.write().await;
        if let Some(id) = tables.lookup(&Reference::ExecutionArn(arn.to_string())) {
            return id;
        }
        let id = self.shared.allocate_id();
        tables.executions.insert(
            id,
            ExecutionRow {
                arn: arn.to_string(),
                url: url.to_string(),
            },
        );
        id
    }

    pub async fn register_provider(&self, name: &str) -> i64 {
        let mut tables = self.shared.tables.write().await;
        if let Some(id) = tables.lookup(&Reference::Provider(name.to_string())) {
            return id;
        }
        let id = self.shared.allocate_id();
        tables.providers.insert(id, name.to_string());
        id
    }

    pub async fn register_pdr(&self, name: &str) -> i64 {
        let mut tables = self.shared.tables.write().await;
        if let Some(id) = tables.lookup(&Reference::Pdr(name.to_string())) {
            return id;
        }
        let id = self.shared.allocate_id();
        tables.pdrs.insert(id, name.to_string());
        id
    }

    pub async fn register_async_operation(&self, operation_id: &str) -> i64 {
        let mut tables = self.shared.tables.write().await;
        if let Some(id) = tables.lookup(&Reference::AsyncOperation(operation_id.to_string())) {
            return id;
        }
        let id = self.shared.allocate_id();
        tables.async_operations.insert(id, operation_id.to_string());
        id
    }

    pub async fn granule_count(&self) -> usize {
        self.shared.tables.read().await.granules.len()
    }

    pub async fn file_count(&self) -> usize {
        self.shared.tables.read().await.files.len()
    }

    pub async fn execution_link_count(&self) -> usize {
        self.shared.tables.read().await.granule_executions.len()
    }

    /// Granules with a live row-lock entry.
    pub fn row_lock_count(&self) -> usize {
        self.shared
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Transactions begun and not yet finished.
    pub fn active_transactions(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrimaryStore for InMemoryPrimaryStore {
    async fn begin(&self) -> Result<Box<dyn PrimaryTransaction>, StoreError> {
        let txn = InMemoryTransaction::new(Arc::clone(&self.shared));
        debug!(transaction = %txn.id, "transaction started");
        Ok(Box::new(txn))
    }

    async fn lookup(&self, reference: &Reference) -> Result<Option<i64>, StoreError> {
        Ok(self.shared.tables.read().await.lookup(reference))
    }

    async fn describe(
        &self,
        kind: ReferenceKind,
        cumulus_id: i64,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.shared.tables.read().await.describe(kind, cumulus_id))
    }

    async fn get_granule(
        &self,
        granule_id: &str,
        collection_cumulus_id: i64,
    ) -> Result<Option<GranuleRecord>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .granule_keys
            .get(&(granule_id.to_string(), collection_cumulus_id))
            .and_then(|id| tables.granules.get(id))
            .cloned())
    }

    async fn granules_by_granule_id(
        &self,
        granule_id: &str,
    ) -> Result<Vec<GranuleRecord>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables.granules_named(granule_id).cloned().collect())
    }

    async fn files_for_granule(
        &self,
        granule_cumulus_id: i64,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .files
            .values()
            .filter(|f| f.granule_cumulus_id == granule_cumulus_id)
            .cloned()
            .collect())
    }

    async fn executions_for_granule(
        &self,
        granule_cumulus_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .granule_executions
            .iter()
            .filter(|(g, _)| *g == granule_cumulus_id)
            .map(|(_, e)| *e)
            .collect())
    }
}

/// A transaction over [`InMemoryPrimaryStore`].
pub struct InMemoryTransaction {
    id: Uuid,
    shared: Arc<Shared>,
    granules: BTreeMap<i64, GranuleRecord>,
    /// `None` marks a staged delete.
    files: BTreeMap<i64, Option<FileRecord>>,
    links: BTreeSet<(i64, i64)>,
    locked: HashSet<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl InMemoryTransaction {
    fn new(shared: Arc<Shared>) -> Self {
        shared.active.fetch_add(1, Ordering::SeqCst);
        Self {
            id: Uuid::new_v4(),
            shared,
            granules: BTreeMap::new(),
            files: BTreeMap::new(),
            links: BTreeSet::new(),
            locked: HashSet::new(),
            guards: Vec::new(),
        }
    }

    /// Rows carrying `granule_id`, committed or staged; staged writes win.
    fn visible_granules(&self, tables: &Tables, granule_id: &str) -> Vec<GranuleRecord> {
        let mut merged: BTreeMap<i64, GranuleRecord> = tables
            .granules_named(granule_id)
            .filter_map(|g| g.cumulus_id.map(|id| (id, g.clone())))
            .collect();
        merged.extend(
            self.granules
                .iter()
                .filter(|(_, g)| g.granule_id == granule_id)
                .map(|(id, g)| (*id, g.clone())),
        );
        merged.into_values().collect()
    }

    /// Release row locks and prune entries nobody else holds or awaits.
    fn release_locks(&mut self) {
        self.guards.clear();
        if self.locked.is_empty() {
            return;
        }
        let mut locks = self
            .shared
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for granule_id in self.locked.drain() {
            if locks
                .get(&granule_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&granule_id);
            }
        }
    }

    fn visible_files(&self, tables: &Tables, granule_cumulus_id: i64) -> Vec<FileRecord> {
        let mut merged: BTreeMap<i64, FileRecord> = tables
            .files
            .iter()
            .filter(|(_, f)| f.granule_cumulus_id == granule_cumulus_id)
            .map(|(id, f)| (*id, f.clone()))
            .collect();
        for (id, staged) in &self.files {
            match staged {
                Some(file) if file.granule_cumulus_id == granule_cumulus_id => {
                    merged.insert(*id, file.clone());
                }
                Some(_) => {}
                None => {
                    merged.remove(id);
                }
            }
        }
        merged.into_values().collect()
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release_locks();
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PrimaryTransaction for InMemoryTransaction {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn lock_granule(&mut self, granule_id: &str) -> Result<(), StoreError> {
        if self.locked.contains(granule_id) {
            return Ok(());
        }
        let row_lock = {
            let mut locks = self
                .shared
                .row_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(granule_id.to_string()).or_default())
        };
        let guard = row_lock.lock_owned().await;
        self.guards.push(guard);
        self.locked.insert(granule_id.to_string());
        debug!(transaction = %self.id, granule_id, "row lock acquired");
        Ok(())
    }

    async fn get_granule(
        &mut self,
        granule_id: &str,
        collection_cumulus_id: i64,
    ) -> Result<Option<GranuleRecord>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(self
            .visible_granules(&tables, granule_id)
            .into_iter()
            .find(|g| g.collection_cumulus_id == collection_cumulus_id))
    }

    async fn granules_by_granule_id(
        &mut self,
        granule_id: &str,
    ) -> Result<Vec<GranuleRecord>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(self.visible_granules(&tables, granule_id))
    }

    async fn upsert_granule(&mut self, record: &GranuleRecord) -> Result<i64, StoreError> {
        let tables = self.shared.tables.read().await;
        if !tables.collections.contains_key(&record.collection_cumulus_id) {
            return Err(StoreError::Constraint(format!(
                "collection {} does not exist",
                record.collection_cumulus_id
            )));
        }
        let existing = self
            .visible_granules(&tables, &record.granule_id)
            .into_iter()
            .find(|g| g.collection_cumulus_id == record.collection_cumulus_id)
            .and_then(|g| g.cumulus_id);
        drop(tables);

        let id = existing.unwrap_or_else(|| self.shared.allocate_id());
        let mut row = record.clone();
        row.cumulus_id = Some(id);
        self.granules.insert(id, row);
        Ok(id)
    }

    async fn files_for_granule(
        &mut self,
        granule_cumulus_id: i64,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(self.visible_files(&tables, granule_cumulus_id))
    }

    async fn upsert_file(&mut self, file: &FileRecord) -> Result<i64, StoreError> {
        if file.bucket.is_none() {
            return Err(StoreError::not_null("files", "bucket"));
        }
        if file.key.is_none() {
            return Err(StoreError::not_null("files", "key"));
        }

        let tables = self.shared.tables.read().await;
        let existing = self
            .visible_files(&tables, file.granule_cumulus_id)
            .into_iter()
            .find(|f| f.same_location(file))
            .and_then(|f| f.cumulus_id);
        drop(tables);

        let id = existing.unwrap_or_else(|| self.shared.allocate_id());
        let mut row = file.clone();
        row.cumulus_id = Some(id);
        self.files.insert(id, Some(row));
        Ok(id)
    }

    async fn delete_file(&mut self, file_cumulus_id: i64) -> Result<(), StoreError> {
        let known = match self.files.get(&file_cumulus_id) {
            Some(staged) => staged.is_some(),
            None => self
                .shared
                .tables
                .read()
                .await
                .files
                .contains_key(&file_cumulus_id),
        };
        if !known {
            return Err(StoreError::NotFound(format!("file {file_cumulus_id}")));
        }
        self.files.insert(file_cumulus_id, None);
        Ok(())
    }

    async fn link_execution(
        &mut self,
        granule_cumulus_id: i64,
        execution_cumulus_id: i64,
    ) -> Result<(), StoreError> {
        if !self
            .shared
            .tables
            .read()
            .await
            .executions
            .contains_key(&execution_cumulus_id)
        {
            return Err(StoreError::Constraint(format!(
                "execution {execution_cumulus_id} does not exist"
            )));
        }
        self.links.insert((granule_cumulus_id, execution_cumulus_id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let mut tables = self.shared.tables.write().await;
        let granules = std::mem::take(&mut self.granules);
        let files = std::mem::take(&mut self.files);
        let links = std::mem::take(&mut self.links);
        let (granule_writes, file_writes) = (granules.len(), files.len());

        for (id, row) in granules {
            tables.insert_granule(id, row);
        }
        for (id, staged) in files {
            match staged {
                Some(file) => {
                    tables.files.insert(id, file);
                }
                None => {
                    tables.files.remove(&id);
                }
            }
        }
        tables.granule_executions.extend(links);
        drop(tables);

        info!(
            transaction = %self.id,
            granule_writes,
            file_writes,
            "transaction committed"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        info!(
            transaction = %self.id,
            staged = self.granules.len() + self.files.len(),
            "transaction rolled back"
        );
        Ok(())
    }
}
