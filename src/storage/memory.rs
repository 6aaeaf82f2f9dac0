use crate::connection::{ConnectionFactory, StoreConnection};
use crate::core::{Result, TxnError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A stored record: field name -> value, without the id
pub type Record = Map<String, Value>;

/// Committed contents of one named store
pub struct MemoryDatabase {
    name: String,
    /// collection -> (id -> record)
    collections: RwLock<HashMap<String, BTreeMap<u64, Record>>>,
    next_record_id: AtomicU64,
    sequences: Arc<Sequences>,
}

/// Counters shared by every database of one `MemoryStore`
///
/// Transaction and backend ids are unique across the whole store, the way a
/// server numbers transactions across all of its databases.
#[derive(Debug)]
struct Sequences {
    next_txn_id: AtomicU64,
    next_connection_id: AtomicU64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
        }
    }
}

impl MemoryDatabase {
    fn new(name: &str, sequences: Arc<Sequences>) -> Self {
        Self {
            name: name.to_string(),
            collections: RwLock::new(HashMap::new()),
            next_record_id: AtomicU64::new(1),
            sequences,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn allocate_record_id(&self) -> u64 {
        self.next_record_id.fetch_add(1, Ordering::SeqCst)
    }

    fn allocate_connection_id(&self) -> u64 {
        self.sequences.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }

    fn allocate_txn_id(&self) -> u64 {
        self.sequences.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert a record outside of any transaction and return its id
    pub async fn insert_committed(&self, collection: &str, record: Record) -> u64 {
        let id = self.allocate_record_id();
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record);
        id
    }

    /// Read a committed record
    pub async fn get_committed(&self, collection: &str, id: u64) -> Option<Record> {
        let collections = self.collections.read().await;
        collections.get(collection)?.get(&id).cloned()
    }
}

/// Named in-memory stores, handing out transactional connections
///
/// Each connection buffers its writes in a private overlay. `commit` applies
/// the overlay to the shared store and `rollback` discards it, so uncommitted
/// work is never visible to other connections.
#[derive(Default)]
pub struct MemoryStore {
    databases: RwLock<HashMap<String, Arc<MemoryDatabase>>>,
    sequences: Arc<Sequences>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store, or return the existing one with that name
    pub async fn create_store(&self, name: &str) -> Arc<MemoryDatabase> {
        let mut databases = self.databases.write().await;
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(MemoryDatabase::new(name, Arc::clone(&self.sequences)))
                }),
        )
    }

    pub async fn database(&self, name: &str) -> Result<Arc<MemoryDatabase>> {
        let databases = self.databases.read().await;
        databases
            .get(name)
            .cloned()
            .ok_or_else(|| TxnError::BackingStoreFailure(format!("Store '{}' does not exist", name)))
    }

    /// Seed a committed record; the value must be a JSON object
    pub async fn insert(&self, store: &str, collection: &str, record: Value) -> Result<u64> {
        let Value::Object(record) = record else {
            return Err(TxnError::InvalidParams("record must be a JSON object".into()));
        };
        let database = self.database(store).await?;
        Ok(database.insert_committed(collection, record).await)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryStore {
    type Connection = MemoryConnection;

    async fn open(&self, store: &str) -> Result<MemoryConnection> {
        let database = self.database(store).await?;
        Ok(MemoryConnection::new(database))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    InTransaction,
    Closed,
}

/// A connection to a `MemoryDatabase` with one transaction always open
pub struct MemoryConnection {
    id: u64,
    db: Arc<MemoryDatabase>,
    txn_id: u64,
    /// Uncommitted changes: `None` marks a deletion
    pending: HashMap<(String, u64), Option<Record>>,
    state: ConnectionState,
}

impl MemoryConnection {
    fn new(db: Arc<MemoryDatabase>) -> Self {
        let id = db.allocate_connection_id();
        let txn_id = db.allocate_txn_id();
        Self {
            id,
            db,
            txn_id,
            pending: HashMap::new(),
            state: ConnectionState::InTransaction,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn store_name(&self) -> &str {
        self.db.name()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Number of buffered, uncommitted changes
    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(TxnError::BackingStoreFailure("Connection is closed".into()));
        }
        Ok(())
    }

    /// Read a record as this transaction sees it
    pub async fn get(&self, collection: &str, id: u64) -> Result<Option<Record>> {
        self.ensure_open()?;
        if let Some(change) = self.pending.get(&(collection.to_string(), id)) {
            return Ok(change.clone());
        }
        Ok(self.db.get_committed(collection, id).await)
    }

    /// All ids visible to this transaction, ascending
    pub async fn ids(&self, collection: &str) -> Result<Vec<u64>> {
        self.ensure_open()?;
        let mut ids: BTreeSet<u64> = {
            let collections = self.db.collections.read().await;
            collections
                .get(collection)
                .map(|records| records.keys().copied().collect())
                .unwrap_or_default()
        };

        for ((name, id), change) in &self.pending {
            if name != collection {
                continue;
            }
            match change {
                Some(_) => ids.insert(*id),
                None => ids.remove(id),
            };
        }

        Ok(ids.into_iter().collect())
    }

    pub async fn put(&mut self, collection: &str, id: u64, record: Record) -> Result<()> {
        self.ensure_open()?;
        self.pending.insert((collection.to_string(), id), Some(record));
        Ok(())
    }

    pub async fn insert(&mut self, collection: &str, record: Record) -> Result<u64> {
        self.ensure_open()?;
        let id = self.db.allocate_record_id();
        self.pending.insert((collection.to_string(), id), Some(record));
        Ok(id)
    }

    pub async fn delete(&mut self, collection: &str, id: u64) -> Result<()> {
        self.ensure_open()?;
        self.pending.insert((collection.to_string(), id), None);
        Ok(())
    }

    fn restart_transaction(&mut self) {
        self.pending.clear();
        self.txn_id = self.db.allocate_txn_id();
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        {
            let mut collections = self.db.collections.write().await;
            for ((collection, id), change) in self.pending.drain() {
                let records = collections.entry(collection).or_default();
                match change {
                    Some(record) => {
                        records.insert(id, record);
                    }
                    None => {
                        records.remove(&id);
                    }
                }
            }
        }
        self.restart_transaction();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.restart_transaction();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(TxnError::BackingStoreFailure(
                "Connection already closed".into(),
            ));
        }
        self.pending.clear();
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn native_transaction_id(&self) -> Option<u64> {
        match self.state {
            ConnectionState::InTransaction => Some(self.txn_id),
            ConnectionState::Closed => None,
        }
    }

    fn backend_id(&self) -> Option<u64> {
        Some(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    async fn store_with_partner() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_store("demo").await;
        store
            .insert("demo", "res.partner", json!({"name": "Alice"}))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let store = store_with_partner().await;
        let mut writer = store.open("demo").await.unwrap();
        let reader = store.open("demo").await.unwrap();

        writer
            .put("res.partner", 1, record(json!({"name": "Alice2"})))
            .await
            .unwrap();

        let seen = writer.get("res.partner", 1).await.unwrap().unwrap();
        assert_eq!(seen["name"], json!("Alice2"));

        let other = reader.get("res.partner", 1).await.unwrap().unwrap();
        assert_eq!(other["name"], json!("Alice"));
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = store_with_partner().await;
        let mut writer = store.open("demo").await.unwrap();
        let before = writer.native_transaction_id().unwrap();

        let id = writer
            .insert("res.partner", record(json!({"name": "Bob"})))
            .await
            .unwrap();
        writer.commit().await.unwrap();

        assert_ne!(writer.native_transaction_id().unwrap(), before);
        assert_eq!(writer.pending_changes(), 0);

        let reader = store.open("demo").await.unwrap();
        assert_eq!(reader.ids("res.partner").await.unwrap(), vec![1, id]);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = store_with_partner().await;
        let mut conn = store.open("demo").await.unwrap();

        conn.delete("res.partner", 1).await.unwrap();
        assert!(conn.ids("res.partner").await.unwrap().is_empty());

        conn.rollback().await.unwrap();
        assert_eq!(conn.ids("res.partner").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_each_connection_gets_its_own_transaction() {
        let store = store_with_partner().await;
        let a = store.open("demo").await.unwrap();
        let b = store.open("demo").await.unwrap();
        assert_ne!(a.native_transaction_id(), b.native_transaction_id());
        assert_ne!(a.backend_id(), b.backend_id());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_work() {
        let store = store_with_partner().await;
        let mut conn = store.open("demo").await.unwrap();

        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(conn.native_transaction_id().is_none());
        assert!(conn.get("res.partner", 1).await.is_err());
        assert!(conn.commit().await.is_err());
        assert!(conn.close().await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_ids_unique_across_stores() {
        let store = store_with_partner().await;
        store.create_store("other").await;

        let a = store.open("demo").await.unwrap();
        let mut b = store.open("other").await.unwrap();
        assert_ne!(a.native_transaction_id(), b.native_transaction_id());
        assert_ne!(a.backend_id(), b.backend_id());

        b.rollback().await.unwrap();
        let c = store.open("demo").await.unwrap();
        let ids: std::collections::HashSet<_> = [&a, &b, &c]
            .iter()
            .map(|conn| conn.native_transaction_id())
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_store() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.open("missing").await,
            Err(TxnError::BackingStoreFailure(_))
        ));
    }
}
