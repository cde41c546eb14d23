//! Named registry of routed connections.
//!
//! Entries are added eagerly with [`PoolManager::add`] or built on first use by a
//! lazy factory installed with [`PoolManager::on_lazy_add`]. The factory runs while
//! the write lock is held, so concurrent misses for one name build it once.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cluster::ClusterDb;
use crate::error::{DbError, DbResult};
use crate::handle::Connection;

/// Lazy constructor: `Ok(None)` means "no such entry".
pub type LazyFactory<T> =
    Arc<dyn Fn(String) -> BoxFuture<'static, DbResult<Option<T>>> + Send + Sync>;

/// Name-keyed registry. Cloning shares the underlying map.
pub struct PoolManager<T = Arc<ClusterDb>> {
    pools: Arc<RwLock<HashMap<String, T>>>,
    lazy_add: Option<LazyFactory<T>>,
}

impl<T> Clone for PoolManager<T> {
    fn clone(&self) -> Self {
        Self {
            pools: Arc::clone(&self.pools),
            lazy_add: self.lazy_add.clone(),
        }
    }
}

impl<T> Default for PoolManager<T> {
    fn default() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
            lazy_add: None,
        }
    }
}

impl<T> fmt::Debug for PoolManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("has_lazy_add", &self.lazy_add.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> PoolManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the lazy constructor. Call before the manager is cloned or shared.
    pub fn on_lazy_add<F, Fut>(&mut self, factory: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<Option<T>>> + Send + 'static,
    {
        self.lazy_add = Some(Arc::new(move |name| -> BoxFuture<'static, _> {
            Box::pin(factory(name))
        }));
    }

    /// Register `entry` under `name`, replacing any previous entry.
    pub async fn add(&self, name: impl Into<String>, entry: T) {
        let name = name.into();
        let mut pools = self.pools.write().await;
        if pools.insert(name.clone(), entry).is_some() {
            warn!(name = %name, "Replaced registered pool");
        } else {
            info!(name = %name, "Registered pool");
        }
    }

    /// Look up `name`, building it with the lazy factory on a miss.
    pub async fn get(&self, name: &str) -> DbResult<T> {
        {
            let pools = self.pools.read().await;
            if let Some(entry) = pools.get(name) {
                return Ok(entry.clone());
            }
        } // Read lock released here

        let Some(factory) = &self.lazy_add else {
            return Err(DbError::connection_not_found(name));
        };

        let mut pools = self.pools.write().await;
        // Another caller may have built it while we waited for the write lock
        if let Some(entry) = pools.get(name) {
            return Ok(entry.clone());
        }

        debug!(name = %name, "Building pool lazily");
        match factory(name.to_string()).await {
            Ok(Some(entry)) => {
                pools.insert(name.to_string(), entry.clone());
                info!(name = %name, "Registered pool lazily");
                Ok(entry)
            }
            Ok(None) => Err(DbError::connection_not_found(name)),
            Err(e) => {
                warn!(name = %name, error = %e, "Lazy pool construction failed");
                Err(DbError::lazy_add(name, e))
            }
        }
    }

    /// Like [`get`](Self::get) but panics when the entry cannot be produced.
    pub async fn must_get(&self, name: &str) -> T {
        match self.get(name).await {
            Ok(entry) => entry,
            Err(e) => panic!("pool '{}' unavailable: {}", name, e),
        }
    }

    /// Registered names, in no particular order.
    pub async fn names(&self) -> Vec<String> {
        let pools = self.pools.read().await;
        pools.keys().cloned().collect()
    }

    /// Registered entries, in no particular order.
    pub async fn values(&self) -> Vec<T> {
        let pools = self.pools.read().await;
        pools.values().cloned().collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        let pools = self.pools.read().await;
        pools.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        let pools = self.pools.read().await;
        pools.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<C> PoolManager<Arc<C>>
where
    C: Connection + ?Sized + 'static,
{
    /// Close every registered connection. Entries stay registered.
    pub async fn close_all(&self) {
        // Snapshot so no lock is held across the close calls
        let entries: Vec<(String, Arc<C>)> = {
            let pools = self.pools.read().await;
            pools
                .iter()
                .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
                .collect()
        };

        for (name, entry) in entries {
            info!(name = %name, "Closing pool");
            entry.close().await;
        }
        info!("All pools closed");
    }
}
