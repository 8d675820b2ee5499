//! Registry of per-account transaction stores
//!
//! The registry lock only guards the address -> store map; transaction state
//! is always behind the individual store's lock.

use super::txstore::TxStore;
use crate::address::TronAddress;
use crate::logging::TxLogger;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct AccountStore {
    stores: RwLock<HashMap<TronAddress, Arc<TxStore>>>,
    retention: Duration,
    logger: TxLogger,
}

impl AccountStore {
    pub fn new(retention: Duration, logger: TxLogger) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            retention,
            logger,
        }
    }

    /// Store for `address`, created on first access
    pub fn get_tx_store(&self, address: &TronAddress) -> Arc<TxStore> {
        if let Some(store) = self.stores.read().get(address) {
            return store.clone();
        }
        self.stores
            .write()
            .entry(*address)
            .or_insert_with(|| Arc::new(TxStore::new(self.retention, self.logger.clone())))
            .clone()
    }

    /// Snapshot of every store, so callers never hold the registry lock while working
    pub fn get_all(&self) -> Vec<(TronAddress, Arc<TxStore>)> {
        self.stores
            .read()
            .iter()
            .map(|(addr, store)| (*addr, store.clone()))
            .collect()
    }

    /// Store holding transaction `id`, if any
    pub fn find(&self, id: &str) -> Option<Arc<TxStore>> {
        self.get_all()
            .into_iter()
            .map(|(_, store)| store)
            .find(|store| store.has(id))
    }

    /// Union of every store's hash index
    pub fn get_hash_to_id_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (_, store) in self.get_all() {
            map.extend(store.hash_to_id());
        }
        map
    }

    pub fn get_total_inflight_count(&self) -> usize {
        self.get_all().iter().map(|(_, s)| s.inflight_count()).sum()
    }

    pub fn get_total_finished_count(&self) -> usize {
        self.get_all().iter().map(|(_, s)| s.finished_count()).sum()
    }
}
