pub mod alloy_chain;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::types::UserOperation;

/// Errors surfaced by a [`ChainService`] implementation. These are the
/// errors a caller must branch on; anything else the provider returns is
/// wrapped as `Unavailable`.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain unavailable: {0}")]
    Unavailable(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("nonce error: {0}")]
    Nonce(String),
}

/// Outcome of a static `simulateValidation` call against the EntryPoint.
/// The EntryPoint signals both success and failure via revert, so this is
/// modeled as data rather than as a caught exception crossing the trait
/// boundary (see design notes on exception-as-protocol).
#[derive(Debug, Clone)]
pub enum SimulationOutcome {
    Ok,
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct Fees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub status: u8,
    pub gas_used: u128,
    pub block_number: u64,
    pub effective_gas_price: u128,
}

/// Narrow interface the core depends on instead of a raw RPC provider,
/// mirroring the teacher's pattern of wrapping a provider behind a
/// purpose-built client (`HubClient`) rather than exposing it directly.
#[async_trait]
pub trait ChainService: Send + Sync {
    async fn compute_user_op_hash(&self, uo: &UserOperation) -> Result<String, ChainError>;

    async fn get_nonce(&self, sender: &str) -> Result<u128, ChainError>;

    async fn simulate_validation(&self, uo: &UserOperation) -> Result<SimulationOutcome, ChainError>;

    async fn current_fees(&self) -> Result<Fees, ChainError>;

    async fn estimate_bundle_gas(
        &self,
        ops: &[UserOperation],
        beneficiary: &str,
    ) -> Result<u64, ChainError>;

    async fn submit_bundle(
        &self,
        ops: &[UserOperation],
        beneficiary: &str,
        gas_limit: u64,
        fees: Fees,
    ) -> Result<String, ChainError>;

    async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<Option<Receipt>, ChainError>;

    /// The chain id the underlying provider is connected to, used for the
    /// startup consistency check (§9).
    async fn chain_id(&self) -> Result<u64, ChainError>;
}
