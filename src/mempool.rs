use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::UserOpStore;
use crate::types::{UserOpRecord, UserOperation};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("duplicate-in-mempool")]
    DuplicateInMempool,
    #[error("nonce-reused")]
    NonceReused,
    #[error("duplicate-hash")]
    DuplicateHash,
}

struct State {
    by_hash: HashMap<String, UserOpRecord>,
    by_nonce: HashMap<String, HashSet<String>>,
    // Insertion order, oldest first. `get_all` walks this instead of
    // `by_hash` directly so that equal-fee ops keep mempool admission
    // order through the executor's bundle selection sort.
    order: Vec<String>,
}

impl State {
    fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            by_nonce: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn insert(&mut self, hash: String, record: UserOpRecord) {
        self.by_nonce
            .entry(record.user_op.sender.clone())
            .or_default()
            .insert(record.user_op.nonce.clone());
        if !self.by_hash.contains_key(&hash) {
            self.order.push(hash.clone());
        }
        self.by_hash.insert(hash, record);
    }

    fn drop(&mut self, hash: &str) {
        if let Some(record) = self.by_hash.remove(hash) {
            if let Some(nonces) = self.by_nonce.get_mut(&record.user_op.sender) {
                nonces.remove(&record.user_op.nonce);
                if nonces.is_empty() {
                    self.by_nonce.remove(&record.user_op.sender);
                }
            }
            self.order.retain(|h| h != hash);
        }
    }
}

/// In-memory index over persisted pending UserOperations: `byHash` and a
/// per-sender set of occupied nonces. Every mutation is write-through to
/// the backing store, which is the true commit point for status.
pub struct Mempool {
    store: Arc<dyn UserOpStore>,
    state: Mutex<State>,
}

impl Mempool {
    pub fn new(store: Arc<dyn UserOpStore>) -> Self {
        Self {
            store,
            state: Mutex::new(State::new()),
        }
    }

    /// Repopulate the in-memory maps from the store's pending records.
    /// Called once at startup.
    pub async fn reload(&self) -> Result<()> {
        let pending = self.store.list_pending(i64::MAX).await?;
        let mut state = self.state.lock().await;
        for record in pending {
            state.insert(record.user_op_hash.clone(), record);
        }
        Ok(())
    }

    pub async fn add(&self, uo: UserOperation, hash: String) -> Result<(), MempoolError> {
        let mut state = self.state.lock().await;
        if state.by_hash.contains_key(&hash) {
            return Err(MempoolError::DuplicateInMempool);
        }
        if state
            .by_nonce
            .get(&uo.sender)
            .is_some_and(|nonces| nonces.contains(&uo.nonce))
        {
            return Err(MempoolError::NonceReused);
        }

        let record = UserOpRecord {
            user_op_hash: hash.clone(),
            user_op: uo,
            status: crate::types::UoStatus::Pending,
            created_at_unix: 0,
            submitted_at_unix: None,
            confirmed_at_unix: None,
            tx_hash: None,
            gas_used: None,
            gas_cost: None,
            error_message: None,
            block_number: None,
        };

        self.store
            .save_user_op(&record)
            .await
            .map_err(|_| MempoolError::DuplicateHash)?;

        state.insert(hash, record);
        Ok(())
    }

    pub async fn get(&self, hash: &str) -> Option<UserOpRecord> {
        self.state.lock().await.by_hash.get(hash).cloned()
    }

    pub async fn get_all(&self) -> Vec<UserOpRecord> {
        let state = self.state.lock().await;
        state.order.iter().filter_map(|h| state.by_hash.get(h).cloned()).collect()
    }

    pub async fn get_by_sender(&self, sender: &str) -> Vec<UserOpRecord> {
        self.state
            .lock()
            .await
            .by_hash
            .values()
            .filter(|r| r.user_op.sender == sender)
            .cloned()
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.by_hash.len()
    }

    pub async fn mark_submitted(&self, hash: &str, tx_hash: &str) -> Result<()> {
        self.store
            .update_user_op_status(
                hash,
                crate::types::UoStatus::Submitted,
                Some(tx_hash),
                None,
                None,
                None,
                None,
            )
            .await?;
        // Stays visible in the mempool until confirmation/failure per the
        // persisted-store invariant on submitted records.
        let mut state = self.state.lock().await;
        if let Some(record) = state.by_hash.get_mut(hash) {
            record.status = crate::types::UoStatus::Submitted;
            record.tx_hash = Some(tx_hash.to_string());
        }
        Ok(())
    }

    pub async fn mark_confirmed(&self, hash: &str, gas_used: &str, gas_cost: &str, block_number: &str) -> Result<()> {
        self.store
            .update_user_op_status(
                hash,
                crate::types::UoStatus::Confirmed,
                None,
                Some(gas_used),
                Some(gas_cost),
                None,
                Some(block_number),
            )
            .await?;
        self.state.lock().await.drop(hash);
        Ok(())
    }

    pub async fn mark_failed(&self, hash: &str, error_message: &str) -> Result<()> {
        self.store
            .update_user_op_status(
                hash,
                crate::types::UoStatus::Failed,
                None,
                None,
                None,
                Some(error_message),
                None,
            )
            .await?;
        self.state.lock().await.drop(hash);
        Ok(())
    }

    pub async fn remove(&self, hash: &str) -> Result<()> {
        self.store
            .update_user_op_status(hash, crate::types::UoStatus::Removed, None, None, None, None, None)
            .await?;
        self.state.lock().await.drop(hash);
        Ok(())
    }

    /// Re-admit a `submitted` record as `pending`, used by the executor's
    /// receipt-timeout grace-period sweep (see design notes).
    pub async fn requeue_as_pending(&self, mut record: UserOpRecord) -> Result<()> {
        self.store
            .update_user_op_status(
                &record.user_op_hash,
                crate::types::UoStatus::Pending,
                None,
                None,
                None,
                None,
                None,
            )
            .await?;
        record.status = crate::types::UoStatus::Pending;
        self.state.lock().await.insert(record.user_op_hash.clone(), record);
        Ok(())
    }
}
