use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::AppState;
use crate::chain::{ChainError, ChainService, Fees, Receipt, SimulationOutcome};
use crate::db::UserOpStore;
use crate::mempool::Mempool;
use crate::types::{BundleRecord, BundleStatus, UserOpRecord, UserOperation, UoStatus};
use crate::validator::Validator;

pub(super) struct FakeChain;

#[async_trait]
impl ChainService for FakeChain {
    async fn compute_user_op_hash(&self, uo: &UserOperation) -> Result<String, ChainError> {
        Ok(format!("0xhash-{}", uo.nonce))
    }
    async fn get_nonce(&self, _sender: &str) -> Result<u128, ChainError> {
        Ok(0)
    }
    async fn simulate_validation(&self, _uo: &UserOperation) -> Result<SimulationOutcome, ChainError> {
        Ok(SimulationOutcome::Ok)
    }
    async fn current_fees(&self) -> Result<Fees, ChainError> {
        Ok(Fees {
            max_fee_per_gas: 1,
            max_priority_fee_per_gas: 1,
        })
    }
    async fn estimate_bundle_gas(&self, ops: &[UserOperation], _beneficiary: &str) -> Result<u64, ChainError> {
        Ok(21_000 * ops.len() as u64)
    }
    async fn submit_bundle(
        &self,
        _ops: &[UserOperation],
        _beneficiary: &str,
        _gas_limit: u64,
        _fees: Fees,
    ) -> Result<String, ChainError> {
        Ok("0xtx".to_string())
    }
    async fn wait_for_receipt(&self, _tx_hash: &str, _timeout: Duration) -> Result<Option<Receipt>, ChainError> {
        Ok(None)
    }
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(1337)
    }
}

#[derive(Default)]
pub(super) struct FakeStore {
    ops: std::sync::Mutex<std::collections::HashMap<String, UserOpRecord>>,
}

#[async_trait]
impl UserOpStore for FakeStore {
    async fn save_user_op(&self, record: &UserOpRecord) -> anyhow::Result<()> {
        self.ops.lock().unwrap().insert(record.user_op_hash.clone(), record.clone());
        Ok(())
    }
    async fn update_user_op_status(
        &self,
        hash: &str,
        new_status: UoStatus,
        _tx_hash: Option<&str>,
        _gas_used: Option<&str>,
        _gas_cost: Option<&str>,
        _error_message: Option<&str>,
        _block_number: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Some(r) = self.ops.lock().unwrap().get_mut(hash) {
            r.status = new_status;
        }
        Ok(())
    }
    async fn get_user_op_by_hash(&self, hash: &str) -> anyhow::Result<Option<UserOpRecord>> {
        Ok(self.ops.lock().unwrap().get(hash).cloned())
    }
    async fn list_pending(&self, _limit: i64) -> anyhow::Result<Vec<UserOpRecord>> {
        Ok(self
            .ops
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == UoStatus::Pending)
            .cloned()
            .collect())
    }
    async fn list_submitted(&self) -> anyhow::Result<Vec<UserOpRecord>> {
        Ok(vec![])
    }
    async fn save_bundle(&self, _record: &BundleRecord) -> anyhow::Result<()> {
        Ok(())
    }
    async fn update_bundle_status(
        &self,
        _bundle_hash: &str,
        _new_status: BundleStatus,
        _block_number: Option<&str>,
        _total_gas_used: Option<&str>,
        _total_gas_cost: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn get_bundle_by_tx_hash(&self, _tx_hash: &str) -> anyhow::Result<Option<BundleRecord>> {
        Ok(None)
    }
    async fn list_bundle_member_hashes(&self, _bundle_hash: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }
}

pub(super) const TEST_ENTRY_POINT: &str = "0x000000000000000000000000000000000000005e";

pub(super) fn test_state() -> AppState {
    let store: Arc<dyn UserOpStore> = Arc::new(FakeStore::default());
    let chain: Arc<dyn ChainService> = Arc::new(FakeChain);
    AppState {
        mempool: Arc::new(Mempool::new(store.clone())),
        validator: Arc::new(Validator::new(chain.clone())),
        store,
        chain,
        entry_point: TEST_ENTRY_POINT.to_string(),
        chain_id: 1337,
    }
}

pub(super) fn sample_uo(nonce: &str) -> UserOperation {
    UserOperation {
        sender: "0xaa00000000000000000000000000000000000a".to_string(),
        nonce: nonce.to_string(),
        init_code: "0x".to_string(),
        call_data: "0x".to_string(),
        call_gas_limit: "0x5208".to_string(),
        verification_gas_limit: "0x186a0".to_string(),
        pre_verification_gas: "0x5208".to_string(),
        max_fee_per_gas: "0x3b9aca00".to_string(),
        max_priority_fee_per_gas: "0x3b9aca00".to_string(),
        paymaster_and_data: "0x".to_string(),
        signature: "0x00".to_string(),
    }
}
