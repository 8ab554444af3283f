//! # Tenant connection cache
//!
//! Owns the default connection and every tenant connection derived from it.
//!
//! Each tenant lives in a slot guarded by its own async mutex. The first
//! caller to resolve a name derives the connection while holding that mutex;
//! concurrent callers for the same name queue on it and pick up the result,
//! so a name is derived at most once. A slot that has been closed is marked
//! retired before it leaves the map, and anyone still waiting on it starts
//! over with a fresh slot instead of reviving the old one.
//!
//! Lock order is default connection, then slot map, then slot. Resolution
//! holds the default connection for reading until it returns, and
//! [`TenantCache::shutdown`] holds it for writing, so no tenant can be derived
//! while the default connection is being closed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rocket::futures::future::join_all;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionFactory, ConnectionRef};
use crate::errors::{CloseFailure, TenancyError};

enum SlotState {
    Vacant,
    Open(ConnectionRef),
    Retired,
}

struct Slot {
    state: AsyncMutex<SlotState>,
}

impl Slot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AsyncMutex::new(SlotState::Vacant),
        })
    }
}

pub struct TenantCache {
    factory: Arc<dyn ConnectionFactory>,
    default: RwLock<Option<ConnectionRef>>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl TenantCache {
    pub fn new(factory: Arc<dyn ConnectionFactory>, default: ConnectionRef) -> Self {
        Self {
            factory,
            default: RwLock::new(Some(default)),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        self.slots()
            .entry(name.to_string())
            .or_insert_with(Slot::new)
            .clone()
    }

    /// Drops `slot` from the map unless it has already been replaced.
    fn evict(&self, name: &str, slot: &Arc<Slot>) {
        let mut slots = self.slots();
        if slots.get(name).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(name);
        }
    }

    /// Cached tenant connection for `name`, derived from the default
    /// connection on first access.
    pub async fn resolve(&self, name: &str) -> Result<ConnectionRef, TenancyError> {
        if name.is_empty() {
            return Err(TenancyError::EmptyDatabaseName);
        }

        let default = self.default.read().await;
        loop {
            let slot = self.slot(name);
            let mut state = slot.state.lock().await;

            if let SlotState::Open(conn) = &*state {
                return Ok(conn.clone());
            }
            if matches!(*state, SlotState::Retired) {
                drop(state);
                self.evict(name, &slot);
                continue;
            }

            let Some(root) = default.as_ref() else {
                *state = SlotState::Retired;
                drop(state);
                self.evict(name, &slot);
                return Err(TenancyError::NotConnected);
            };

            match self.factory.derive(root, name).await {
                Ok(conn) => {
                    info!(db = %name, "tenant connection created");
                    *state = SlotState::Open(conn.clone());
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(db = %name, error = %e, "failed to derive tenant connection");
                    *state = SlotState::Retired;
                    drop(state);
                    self.evict(name, &slot);
                    return Err(e);
                }
            }
        }
    }

    async fn close_slot(
        &self,
        name: &str,
        slot: &Arc<Slot>,
        force: bool,
    ) -> Result<(), TenancyError> {
        let mut state = slot.state.lock().await;
        let conn = match &*state {
            SlotState::Open(conn) => conn.clone(),
            SlotState::Vacant | SlotState::Retired => return Ok(()),
        };

        conn.close(force).await?;

        *state = SlotState::Retired;
        drop(state);
        self.evict(name, slot);
        debug!(db = %name, force, "tenant connection removed");
        Ok(())
    }

    /// Closes and evicts `name`. The entry stays cached if the close fails.
    pub async fn remove(&self, name: &str, force: bool) -> Result<(), TenancyError> {
        let slot = self.slots().get(name).cloned();
        match slot {
            Some(slot) => self.close_slot(name, &slot, force).await,
            None => Ok(()),
        }
    }

    /// Closes every tenant, reporting all failures together once every close
    /// has been attempted.
    pub async fn remove_all(&self, force: bool) -> Result<(), TenancyError> {
        let mut slots: Vec<(String, Arc<Slot>)> = self
            .slots()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        let results = join_all(
            slots
                .iter()
                .map(|(name, slot)| self.close_slot(name, slot, force)),
        )
        .await;

        let failures: Vec<CloseFailure> = slots
            .into_iter()
            .zip(results)
            .filter_map(|((db, _), result)| {
                result.err().map(|e| {
                    warn!(db = %db, error = %e, "failed to close tenant connection");
                    CloseFailure {
                        db,
                        reason: e.to_string(),
                    }
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TenancyError::CloseFailed(failures))
        }
    }

    /// Closes every tenant, then the default connection once all tenants are
    /// gone. Calling it again after success is a no-op.
    pub async fn shutdown(&self, force: bool) -> Result<(), TenancyError> {
        let mut default = self.default.write().await;
        self.remove_all(force).await?;

        if let Some(conn) = default.as_ref() {
            conn.close(force).await?;
            info!(db = %conn.db_name(), force, "default connection closed");
        }
        *default = None;
        Ok(())
    }

    pub async fn default_connection(&self) -> Option<ConnectionRef> {
        self.default.read().await.clone()
    }

    /// Tenant connections that are open in the cache right now.
    pub async fn snapshot(&self) -> BTreeMap<String, ConnectionRef> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();

        let mut open = BTreeMap::new();
        for (name, slot) in slots {
            if let SlotState::Open(conn) = &*slot.state.lock().await {
                open.insert(name, conn.clone());
            }
        }
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectOptions;
    use crate::memory::MemoryConnectionFactory;
    use std::time::Duration;

    async fn cache() -> (MemoryConnectionFactory, Arc<TenantCache>) {
        let factory = MemoryConnectionFactory::new();
        let default = factory
            .connect("mongodb://localhost:27017", &ConnectOptions::default())
            .await
            .unwrap();
        let cache = TenantCache::new(Arc::new(factory.clone()), default);
        (factory, Arc::new(cache))
    }

    #[tokio::test]
    async fn resolve_caches_per_name() {
        let (factory, cache) = cache().await;

        let first = cache.resolve("a").await.unwrap();
        let second = cache.resolve("a").await.unwrap();
        cache.resolve("b").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connections_derived(), 2);
        assert_eq!(
            cache.snapshot().await.keys().collect::<Vec<_>>(),
            ["a", "b"]
        );
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let (_, cache) = cache().await;
        assert!(matches!(
            cache.resolve("").await,
            Err(TenancyError::EmptyDatabaseName)
        ));
    }

    #[tokio::test]
    async fn concurrent_first_access_derives_once() {
        let (factory, cache) = cache().await;
        factory.set_derive_delay(Some(Duration::from_millis(20)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve("a").await })
            })
            .collect();

        let mut conns = Vec::new();
        for handle in handles {
            conns.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(factory.connections_derived(), 1);
        assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
    }

    #[tokio::test]
    async fn remove_evicts_and_next_resolve_recreates() {
        let (factory, cache) = cache().await;
        let first = cache.resolve("a").await.unwrap();

        cache.remove("a", true).await.unwrap();
        assert!(!first.is_open());
        assert!(cache.snapshot().await.is_empty());

        let second = cache.resolve("a").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_open());
        assert_eq!(factory.connections_derived(), 2);
    }

    #[tokio::test]
    async fn remove_of_unknown_name_is_a_no_op() {
        let (_, cache) = cache().await;
        cache.remove("missing", true).await.unwrap();
    }

    #[tokio::test]
    async fn failed_close_keeps_the_entry() {
        let (factory, cache) = cache().await;
        let conn = cache.resolve("a").await.unwrap();
        factory.refuse_close("a");

        assert!(cache.remove("a", true).await.is_err());
        assert!(conn.is_open());
        assert!(cache.snapshot().await.contains_key("a"));

        factory.allow_close("a");
        cache.remove("a", true).await.unwrap();
        assert!(cache.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn remove_all_attempts_every_close() {
        let (factory, cache) = cache().await;
        for db in ["a", "b", "c", "d"] {
            cache.resolve(db).await.unwrap();
        }
        factory.refuse_close("b");
        factory.refuse_close("d");

        let err = cache.remove_all(true).await.unwrap_err();
        let failed: Vec<_> = err.close_failures().iter().map(|f| f.db.as_str()).collect();
        assert_eq!(failed, ["b", "d"]);

        let left: Vec<_> = cache.snapshot().await.into_keys().collect();
        assert_eq!(left, ["b", "d"]);
    }

    #[tokio::test]
    async fn shutdown_keeps_default_open_until_tenants_close() {
        let (factory, cache) = cache().await;
        cache.resolve("a").await.unwrap();
        factory.refuse_close("a");

        assert!(cache.shutdown(true).await.is_err());
        let default = cache.default_connection().await.unwrap();
        assert!(default.is_open());

        factory.allow_close("a");
        cache.shutdown(true).await.unwrap();
        assert!(!default.is_open());
        assert!(cache.default_connection().await.is_none());

        cache.shutdown(true).await.unwrap();
        assert!(matches!(
            cache.resolve("a").await,
            Err(TenancyError::NotConnected)
        ));
        assert!(cache.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn resolve_racing_shutdown_never_returns_a_closed_handle() {
        let (factory, cache) = cache().await;
        factory.set_derive_delay(Some(Duration::from_millis(10)));

        let resolvers: Vec<_> = ["a", "b", "a", "c"]
            .into_iter()
            .map(|db| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve(db).await })
            })
            .collect();
        let closer = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.shutdown(true).await })
        };

        closer.await.unwrap().unwrap();
        for resolver in resolvers {
            match resolver.await.unwrap() {
                // Resolved before shutdown took the default connection; closed by it since.
                Ok(conn) => assert!(!conn.is_open()),
                Err(e) => assert!(matches!(e, TenancyError::NotConnected)),
            }
        }

        assert!(cache.snapshot().await.is_empty());
        assert_eq!(
            factory.connections_closed(),
            factory.connections_derived() + 1
        );
    }
}
