//! Per-account transaction store
//!
//! Owns the state machine for every transaction of one sender. All reads and
//! transitions go through a single `RwLock`; a transition is checked and
//! applied while the write guard is held, so the broadcast, confirm and reap
//! loops never observe a half-applied change.

use super::errors::TxStoreError;
use super::tx::{TronTx, TxState};
use crate::logging::TxLogger;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// A `Broadcasted` transaction awaiting a receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconfirmedTx {
    pub id: String,
    pub hash: String,
    /// Ledger-clock expiration of the current attempt
    pub expiration_ms: i64,
}

/// A `Confirmed` transaction awaiting finality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTx {
    pub id: String,
    pub hash: String,
    pub block_number: i64,
}

#[derive(Debug)]
struct TxEntry {
    tx: TronTx,
    hashes: Vec<String>,
    current_hash: Option<String>,
    expiration_ms: i64,
    confirmed_block: Option<i64>,
}

#[derive(Debug, Default)]
struct Inner {
    txs: HashMap<String, TxEntry>,
    hash_to_id: HashMap<String, String>,
    /// Ids currently in `Broadcasted`
    unconfirmed: HashSet<String>,
    idempotency_keys: HashMap<String, String>,
    /// Ids in a terminal state, with the time they got there
    finished: HashMap<String, Instant>,
}

impl Inner {
    fn entry_mut(&mut self, id: &str) -> Result<&mut TxEntry, TxStoreError> {
        self.txs
            .get_mut(id)
            .ok_or_else(|| TxStoreError::NotFound(id.to_string()))
    }
}

fn check_transition(entry: &TxEntry, to: TxState) -> Result<TxState, TxStoreError> {
    let from = entry.tx.state;
    if !from.can_transition_to(to) {
        return Err(TxStoreError::InvalidTransition {
            id: entry.tx.id.clone(),
            from,
            to,
        });
    }
    Ok(from)
}

pub struct TxStore {
    inner: RwLock<Inner>,
    retention: Duration,
    logger: TxLogger,
}

impl TxStore {
    pub fn new(retention: Duration, logger: TxLogger) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            retention,
            logger,
        }
    }

    /// Register a new transaction in `Pending`
    pub fn on_pending(&self, mut tx: TronTx) -> Result<(), TxStoreError> {
        let mut inner = self.inner.write();
        if inner.txs.contains_key(&tx.id) {
            return Err(TxStoreError::DuplicateId(tx.id));
        }
        if let Some(key) = &tx.idempotency_key {
            if inner.idempotency_keys.contains_key(key) {
                return Err(TxStoreError::DuplicateIdempotencyKey(key.clone()));
            }
            inner.idempotency_keys.insert(key.clone(), tx.id.clone());
        }
        tx.state = TxState::Pending;
        let id = tx.id.clone();
        inner.txs.insert(
            id,
            TxEntry {
                tx,
                hashes: Vec::new(),
                current_hash: None,
                expiration_ms: 0,
                confirmed_block: None,
            },
        );
        Ok(())
    }

    /// `Pending|Errored -> Broadcasted`, recording the attempt's hash
    ///
    /// `tx` carries the counters used for this attempt and replaces the stored copy.
    pub fn on_broadcasted(
        &self,
        hash: &str,
        expiration_ms: i64,
        mut tx: TronTx,
    ) -> Result<(), TxStoreError> {
        let mut inner = self.inner.write();
        if inner.hash_to_id.contains_key(hash) {
            return Err(TxStoreError::DuplicateHash(hash.to_string()));
        }
        let entry = inner.entry_mut(&tx.id)?;
        // Confirmed -> Broadcasted is a reorg, not a send
        if entry.tx.state == TxState::Confirmed {
            return Err(TxStoreError::InvalidTransition {
                id: tx.id.clone(),
                from: TxState::Confirmed,
                to: TxState::Broadcasted,
            });
        }
        let from = check_transition(entry, TxState::Broadcasted)?;

        tx.state = TxState::Broadcasted;
        tx.idempotency_key = entry.tx.idempotency_key.clone();
        entry.tx = tx;
        entry.hashes.push(hash.to_string());
        entry.current_hash = Some(hash.to_string());
        entry.expiration_ms = expiration_ms;
        entry.confirmed_block = None;

        let id = entry.tx.id.clone();
        inner.hash_to_id.insert(hash.to_string(), id.clone());
        inner.unconfirmed.insert(id.clone());
        self.logger.log_transition(&id, from, TxState::Broadcasted);
        Ok(())
    }

    /// `Broadcasted -> Confirmed` at `block_number`
    pub fn on_confirmed(&self, id: &str, block_number: i64) -> Result<(), TxStoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        let from = check_transition(entry, TxState::Confirmed)?;
        entry.tx.state = TxState::Confirmed;
        entry.confirmed_block = Some(block_number);
        inner.unconfirmed.remove(id);
        self.logger.log_transition(id, from, TxState::Confirmed);
        Ok(())
    }

    /// `Confirmed -> Broadcasted`, back into the polling set
    pub fn on_reorg(&self, id: &str) -> Result<(), TxStoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        if entry.tx.state != TxState::Confirmed {
            return Err(TxStoreError::InvalidTransition {
                id: id.to_string(),
                from: entry.tx.state,
                to: TxState::Broadcasted,
            });
        }
        entry.tx.state = TxState::Broadcasted;
        entry.confirmed_block = None;
        inner.unconfirmed.insert(id.to_string());
        self.logger
            .log_transition(id, TxState::Confirmed, TxState::Broadcasted);
        Ok(())
    }

    /// `Confirmed -> Finalized`
    pub fn on_finalized(&self, id: &str) -> Result<(), TxStoreError> {
        self.finish(id, TxState::Finalized)
    }

    /// Into `Errored`; returns the transaction so the caller can retry it
    pub fn on_errored(&self, id: &str) -> Result<TronTx, TxStoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        let from = check_transition(entry, TxState::Errored)?;
        entry.tx.state = TxState::Errored;
        let tx = entry.tx.clone();
        inner.unconfirmed.remove(id);
        self.logger.log_transition(id, from, TxState::Errored);
        Ok(tx)
    }

    /// Store the retry counters of `tx` on its entry; state is untouched
    pub fn record_counters(&self, tx: &TronTx) -> Result<(), TxStoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(&tx.id)?;
        entry.tx.attempt = tx.attempt;
        entry.tx.energy_bump_times = tx.energy_bump_times;
        entry.tx.out_of_time_errors = tx.out_of_time_errors;
        Ok(())
    }

    /// Into `FatallyErrored`
    pub fn on_fatal_error(&self, id: &str) -> Result<(), TxStoreError> {
        self.finish(id, TxState::FatallyErrored)
    }

    fn finish(&self, id: &str, to: TxState) -> Result<(), TxStoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        let from = check_transition(entry, to)?;
        entry.tx.state = to;
        inner.unconfirmed.remove(id);
        inner.finished.insert(id.to_string(), Instant::now());
        self.logger.log_transition(id, from, to);
        Ok(())
    }

    pub fn get_status(&self, id: &str) -> Option<TxState> {
        self.inner.read().txs.get(id).map(|e| e.tx.state)
    }

    pub fn get_tx(&self, id: &str) -> Option<TronTx> {
        self.inner.read().txs.get(id).map(|e| e.tx.clone())
    }

    pub fn has(&self, id: &str) -> bool {
        self.inner.read().txs.contains_key(id)
    }

    /// Every hash broadcast for `id`, oldest first
    pub fn get_hashes(&self, id: &str) -> Vec<String> {
        self.inner
            .read()
            .txs
            .get(id)
            .map(|e| e.hashes.clone())
            .unwrap_or_default()
    }

    /// All entries currently in `Broadcasted`
    pub fn get_unconfirmed(&self) -> Vec<UnconfirmedTx> {
        let inner = self.inner.read();
        inner
            .unconfirmed
            .iter()
            .filter_map(|id| {
                let entry = inner.txs.get(id)?;
                Some(UnconfirmedTx {
                    id: id.clone(),
                    hash: entry.current_hash.clone()?,
                    expiration_ms: entry.expiration_ms,
                })
            })
            .collect()
    }

    /// All entries currently in `Confirmed`
    pub fn get_confirmed(&self) -> Vec<ConfirmedTx> {
        let inner = self.inner.read();
        inner
            .txs
            .values()
            .filter(|e| e.tx.state == TxState::Confirmed)
            .filter_map(|e| {
                Some(ConfirmedTx {
                    id: e.tx.id.clone(),
                    hash: e.current_hash.clone()?,
                    block_number: e.confirmed_block?,
                })
            })
            .collect()
    }

    pub fn inflight_count(&self) -> usize {
        self.inner.read().unconfirmed.len()
    }

    pub fn finished_count(&self) -> usize {
        self.inner.read().finished.len()
    }

    pub fn does_idempotency_key_exist(&self, key: &str) -> bool {
        self.inner.read().idempotency_keys.contains_key(key)
    }

    pub fn hash_to_id(&self) -> HashMap<String, String> {
        self.inner.read().hash_to_id.clone()
    }

    /// Remove terminal entries that finished at least one retention period before `now`
    ///
    /// Returns how many transactions were removed.
    pub fn reap(&self, now: Instant) -> usize {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .finished
            .iter()
            .filter(|(_, finished_at)| now.saturating_duration_since(**finished_at) >= self.retention)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            inner.finished.remove(id);
            if let Some(entry) = inner.txs.remove(id) {
                for hash in &entry.hashes {
                    inner.hash_to_id.remove(hash);
                }
                if let Some(key) = &entry.tx.idempotency_key {
                    inner.idempotency_keys.remove(key);
                }
            }
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TronAddress;
    use crate::txm::tx::TxRequest;

    fn store() -> TxStore {
        TxStore::new(Duration::from_secs(60), TxLogger::new("test"))
    }

    fn tx(id: &str) -> TronTx {
        let addr = TronAddress::from_evm_bytes(&[1; 20]);
        TronTx::new(id.to_string(), TxRequest::new(addr, addr, "ping()"))
    }

    /// Drive a fresh entry into `state` along legal edges
    fn seed(store: &TxStore, id: &str, state: TxState) {
        store.on_pending(tx(id)).unwrap();
        let hash = format!("{id}-h");
        match state {
            TxState::Pending => {}
            TxState::Broadcasted => store.on_broadcasted(&hash, 0, tx(id)).unwrap(),
            TxState::Confirmed => {
                store.on_broadcasted(&hash, 0, tx(id)).unwrap();
                store.on_confirmed(id, 1).unwrap();
            }
            TxState::Finalized => {
                store.on_broadcasted(&hash, 0, tx(id)).unwrap();
                store.on_confirmed(id, 1).unwrap();
                store.on_finalized(id).unwrap();
            }
            TxState::Errored => {
                store.on_errored(id).unwrap();
            }
            TxState::FatallyErrored => store.on_fatal_error(id).unwrap(),
        }
        assert_eq!(store.get_status(id), Some(state));
    }

    fn apply(store: &TxStore, id: &str, to: TxState) -> Result<(), TxStoreError> {
        match to {
            TxState::Pending => store.on_pending(tx(id)),
            TxState::Broadcasted => {
                if store.get_status(id) == Some(TxState::Confirmed) {
                    store.on_reorg(id)
                } else {
                    store.on_broadcasted(&format!("{id}-h2"), 0, tx(id))
                }
            }
            TxState::Confirmed => store.on_confirmed(id, 2),
            TxState::Finalized => store.on_finalized(id),
            TxState::Errored => store.on_errored(id).map(|_| ()),
            TxState::FatallyErrored => store.on_fatal_error(id),
        }
    }

    #[test]
    fn test_transition_matrix() {
        for from in TxState::ALL {
            for to in TxState::ALL {
                let s = store();
                seed(&s, "t", from);
                let result = apply(&s, "t", to);
                if from.can_transition_to(to) {
                    assert!(result.is_ok(), "{from} -> {to}: {result:?}");
                    assert_eq!(s.get_status("t"), Some(to));
                } else {
                    assert!(result.is_err(), "{from} -> {to} should be rejected");
                    assert_eq!(s.get_status("t"), Some(from), "state untouched");
                }
            }
        }
    }

    #[test]
    fn test_duplicate_id_and_hash() {
        let s = store();
        s.on_pending(tx("a")).unwrap();
        assert_eq!(s.on_pending(tx("a")), Err(TxStoreError::DuplicateId("a".into())));

        s.on_pending(tx("b")).unwrap();
        s.on_broadcasted("h1", 0, tx("a")).unwrap();
        assert_eq!(
            s.on_broadcasted("h1", 0, tx("b")),
            Err(TxStoreError::DuplicateHash("h1".into()))
        );
        assert_eq!(s.get_status("b"), Some(TxState::Pending));
        assert_eq!(s.hash_to_id().get("h1").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_unconfirmed_index_follows_state() {
        let s = store();
        s.on_pending(tx("a")).unwrap();
        s.on_broadcasted("h1", 77, tx("a")).unwrap();
        assert_eq!(
            s.get_unconfirmed(),
            vec![UnconfirmedTx {
                id: "a".into(),
                hash: "h1".into(),
                expiration_ms: 77
            }]
        );

        s.on_confirmed("a", 10).unwrap();
        assert!(s.get_unconfirmed().is_empty());
        assert_eq!(s.get_confirmed()[0].block_number, 10);

        s.on_reorg("a").unwrap();
        assert_eq!(s.inflight_count(), 1);
        assert!(s.get_confirmed().is_empty());
    }

    #[test]
    fn test_rebroadcast_keeps_all_hashes() {
        let s = store();
        s.on_pending(tx("a")).unwrap();
        s.on_broadcasted("h1", 0, tx("a")).unwrap();
        let mut retry = s.on_errored("a").unwrap();
        retry.attempt += 1;
        s.on_broadcasted("h2", 0, retry).unwrap();

        assert_eq!(s.get_hashes("a"), vec!["h1".to_string(), "h2".to_string()]);
        assert_eq!(s.get_tx("a").unwrap().attempt, 2);
        assert_eq!(s.get_unconfirmed()[0].hash, "h2");
    }

    #[test]
    fn test_recorded_counters_survive_fatal_error() {
        let s = store();
        s.on_pending(tx("a")).unwrap();
        s.on_broadcasted("h1", 0, tx("a")).unwrap();
        let mut retry = s.on_errored("a").unwrap();
        retry.attempt += 1;
        retry.energy_bump_times += 1;
        retry.out_of_time_errors += 1;
        s.record_counters(&retry).unwrap();
        assert_eq!(s.get_status("a"), Some(TxState::Errored));

        s.on_fatal_error("a").unwrap();
        let stored = s.get_tx("a").unwrap();
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.energy_bump_times, 1);
        assert_eq!(stored.out_of_time_errors, 1);
        assert!(matches!(
            s.record_counters(&tx("missing")),
            Err(TxStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_idempotency_key_persists_until_reap() {
        let s = store();
        let mut first = tx("a");
        first.idempotency_key = Some("msg-1".into());
        s.on_pending(first).unwrap();
        assert!(s.does_idempotency_key_exist("msg-1"));

        let mut second = tx("b");
        second.idempotency_key = Some("msg-1".into());
        assert_eq!(
            s.on_pending(second),
            Err(TxStoreError::DuplicateIdempotencyKey("msg-1".into()))
        );
        assert!(!s.has("b"));

        s.on_fatal_error("a").unwrap();
        assert!(s.does_idempotency_key_exist("msg-1"));
        s.reap(Instant::now() + Duration::from_secs(61));
        assert!(!s.does_idempotency_key_exist("msg-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_respects_retention() {
        let s = store();
        seed(&s, "old", TxState::Finalized);
        seed(&s, "dead", TxState::FatallyErrored);
        seed(&s, "live", TxState::Broadcasted);

        tokio::time::advance(Duration::from_secs(30)).await;
        seed(&s, "young", TxState::Finalized);

        assert_eq!(s.reap(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(s.reap(Instant::now()), 2);
        assert!(!s.has("old"));
        assert!(!s.has("dead"));
        assert!(s.has("young"));
        assert!(s.has("live"));
        assert_eq!(s.finished_count(), 1);

        let index = s.hash_to_id();
        assert!(!index.contains_key("old-h"));
        assert!(index.contains_key("young-h"));
        assert!(index.contains_key("live-h"));
    }
}
