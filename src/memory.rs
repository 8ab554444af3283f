//! # In-process connections
//!
//! A [`MemoryConnectionFactory`] behaves like a tiny MongoDB server living in
//! the process: every factory owns its own set of databases, connections
//! derived from one default connection share them, and documents are matched
//! by top-level field equality.
//!
//! It also keeps counters of opened, derived and closed connections and can be
//! told to refuse closing a given database or to slow derivation down, which
//! makes it the backend the test-suite and the offline demo run against.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mongodb::bson::{Bson, Document, oid::ObjectId};
use tracing::debug;

use crate::config::ConnectOptions;
use crate::connection::{
    Connection, ConnectionFactory, ConnectionRef, DocumentStore, Liveness,
};
use crate::errors::TenancyError;
use crate::mongo::DEFAULT_DATABASE;

type Collections = HashMap<String, Vec<Document>>;

#[derive(Default)]
struct Shared {
    databases: Mutex<HashMap<String, Collections>>,
    refuse_close: Mutex<HashSet<String>>,
    derive_delay: Mutex<Option<Duration>>,
    opened: AtomicUsize,
    derived: AtomicUsize,
    closed: AtomicUsize,
}

impl Shared {
    fn databases(&self) -> MutexGuard<'_, HashMap<String, Collections>> {
        self.databases.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn refuses_close(&self, db: &str) -> bool {
        self.refuse_close
            .lock()
            .map(|set| set.contains(db))
            .unwrap_or(false)
    }

    fn derive_delay(&self) -> Option<Duration> {
        self.derive_delay.lock().ok().and_then(|delay| *delay)
    }
}

#[derive(Clone, Default)]
pub struct MemoryConnectionFactory {
    shared: Arc<Shared>,
}

impl MemoryConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default connections opened through this factory.
    pub fn connections_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Tenant connections derived from any default connection of this factory.
    pub fn connections_derived(&self) -> usize {
        self.shared.derived.load(Ordering::SeqCst)
    }

    /// Successful closes, default and tenant connections alike.
    pub fn connections_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Makes every close of a connection scoped to `db` fail until [`Self::allow_close`].
    pub fn refuse_close(&self, db: impl Into<String>) {
        if let Ok(mut set) = self.shared.refuse_close.lock() {
            set.insert(db.into());
        }
    }

    pub fn allow_close(&self, db: &str) {
        if let Ok(mut set) = self.shared.refuse_close.lock() {
            set.remove(db);
        }
    }

    /// Delays every derivation, widening the window in which callers can overlap.
    pub fn set_derive_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.shared.derive_delay.lock() {
            *slot = delay;
        }
    }

    /// Number of documents currently stored in `db.collection`.
    pub fn document_count(&self, db: &str, collection: &str) -> usize {
        self.shared
            .databases()
            .get(db)
            .and_then(|collections| collections.get(collection))
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for MemoryConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnectionFactory")
            .field("opened", &self.connections_opened())
            .field("derived", &self.connections_derived())
            .field("closed", &self.connections_closed())
            .finish()
    }
}

/// Database named in the path of a `mongodb://host[:port]/db?opts` string.
fn database_from_url(url: &str) -> Result<Option<String>, TenancyError> {
    let (_, rest) = url
        .split_once("://")
        .ok_or_else(|| TenancyError::Connection(format!("invalid connection string: {url}")))?;

    let path = rest.split_once('/').map(|(_, path)| path).unwrap_or("");
    let db = path.split('?').next().unwrap_or("");

    Ok((!db.is_empty()).then(|| db.to_string()))
}

#[rocket::async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(
        &self,
        url: &str,
        _options: &ConnectOptions,
    ) -> Result<ConnectionRef, TenancyError> {
        let db = database_from_url(url)?.unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        debug!(db = %db, "opened in-memory connection");

        Ok(Arc::new(MemoryConnection {
            db,
            shared: self.shared.clone(),
            liveness: Liveness::root(),
        }))
    }
}

pub struct MemoryConnection {
    db: String,
    shared: Arc<Shared>,
    liveness: Liveness,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("db", &self.db)
            .field("root", &self.liveness.is_root())
            .field("open", &self.liveness.is_open())
            .finish()
    }
}

#[rocket::async_trait]
impl Connection for MemoryConnection {
    fn db_name(&self) -> &str {
        &self.db
    }

    fn is_open(&self) -> bool {
        self.liveness.is_open()
    }

    fn store(&self, collection: &str) -> Arc<dyn DocumentStore> {
        Arc::new(MemoryStore {
            db: self.db.clone(),
            collection: collection.to_string(),
            shared: self.shared.clone(),
            liveness: self.liveness.clone(),
        })
    }

    async fn use_db(&self, db: &str) -> Result<ConnectionRef, TenancyError> {
        self.liveness.check()?;
        if let Some(delay) = self.shared.derive_delay() {
            tokio::time::sleep(delay).await;
        }
        self.shared.derived.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryConnection {
            db: db.to_string(),
            shared: self.shared.clone(),
            liveness: self.liveness.child(),
        }))
    }

    async fn close(&self, _force: bool) -> Result<(), TenancyError> {
        if !self.liveness.is_open() {
            return Ok(());
        }
        if self.shared.refuses_close(&self.db) {
            return Err(TenancyError::Connection(format!(
                "close refused for database {}",
                self.db
            )));
        }
        if self.liveness.retire() {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryStore {
    db: String,
    collection: String,
    shared: Arc<Shared>,
    liveness: Liveness,
}

impl MemoryStore {
    fn with_docs<T>(&self, f: impl FnOnce(&mut Vec<Document>) -> T) -> Result<T, TenancyError> {
        self.liveness.check()?;
        let mut databases = self.shared.databases();
        let docs = databases
            .entry(self.db.clone())
            .or_default()
            .entry(self.collection.clone())
            .or_default();
        Ok(f(docs))
    }
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

#[rocket::async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, filter: Document) -> Result<Vec<Document>, TenancyError> {
        self.with_docs(|docs| {
            docs.iter()
                .filter(|doc| matches_filter(doc, &filter))
                .cloned()
                .collect()
        })
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, TenancyError> {
        self.with_docs(|docs| docs.iter().find(|doc| matches_filter(doc, &filter)).cloned())
    }

    async fn insert_one(&self, mut doc: Document) -> Result<Bson, TenancyError> {
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                doc.insert("_id", id.clone());
                id
            }
        };
        self.with_docs(|docs| docs.push(doc))?;
        Ok(id)
    }

    async fn count_documents(&self, filter: Document) -> Result<u64, TenancyError> {
        self.with_docs(|docs| {
            docs.iter()
                .filter(|doc| matches_filter(doc, &filter))
                .count() as u64
        })
    }

    async fn delete_many(&self, filter: Document) -> Result<u64, TenancyError> {
        self.with_docs(|docs| {
            let before = docs.len();
            docs.retain(|doc| !matches_filter(doc, &filter));
            (before - docs.len()) as u64
        })
    }
}
