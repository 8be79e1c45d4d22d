use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, U256, Uint};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{SolCall, SolError};
use anyhow::Context;
use async_trait::async_trait;
use url::Url;

use super::{ChainError, ChainService, Fees, Receipt, SimulationOutcome};
use crate::types::{UserOperation, parse_hex_bytes, parse_hex_u128};

sol! {
    #[sol(rpc)]
    interface IEntryPoint {
        struct PackedUserOperation {
            address sender;
            uint256 nonce;
            bytes initCode;
            bytes callData;
            bytes32 accountGasLimits;
            uint256 preVerificationGas;
            bytes32 gasFees;
            bytes paymasterAndData;
            bytes signature;
        }

        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
        function getUserOpHash(PackedUserOperation calldata userOp) external view returns (bytes32);
        function simulateValidation(PackedUserOperation calldata userOp) external;
        function handleOps(PackedUserOperation[] calldata ops, address payable beneficiary) external;

        error FailedOp(uint256 opIndex, string reason);
        error FailedOpWithRevert(uint256 opIndex, string reason, bytes inner);

        #[derive(Debug)]
        error ValidationResult(
            (uint256, uint256, uint48, uint48, bool) returnInfo,
            (uint256, uint256) senderInfo,
            (uint256, uint256) factoryInfo,
            (uint256, uint256) paymasterInfo,
            (uint256, uint256) aggregatorInfo
        );
    }
}

/// Scales a wei-denominated fee by the configured safety margin
/// (`BUNDLER_MAX_FEE_PER_GAS_MULTIPLIER`, spec default 1.5).
fn scale_fee(fee: u128, multiplier: f64) -> u128 {
    ((fee as f64) * multiplier).round() as u128
}

fn pack_limits(hi: u128, lo: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[0..16].copy_from_slice(&hi.to_be_bytes());
    out[16..32].copy_from_slice(&lo.to_be_bytes());
    out
}

fn to_packed(uo: &UserOperation) -> Result<IEntryPoint::PackedUserOperation, ChainError> {
    let sender: Address = uo
        .sender
        .parse()
        .map_err(|e| ChainError::Unavailable(format!("invalid sender address: {e}")))?;
    let nonce = U256::from(
        parse_hex_u128(&uo.nonce).map_err(|e| ChainError::Unavailable(format!("invalid nonce: {e}")))?,
    );
    let verification_gas_limit = parse_hex_u128(&uo.verification_gas_limit)
        .map_err(|e| ChainError::Unavailable(format!("invalid verificationGasLimit: {e}")))?;
    let call_gas_limit = parse_hex_u128(&uo.call_gas_limit)
        .map_err(|e| ChainError::Unavailable(format!("invalid callGasLimit: {e}")))?;
    let max_priority_fee = parse_hex_u128(&uo.max_priority_fee_per_gas)
        .map_err(|e| ChainError::Unavailable(format!("invalid maxPriorityFeePerGas: {e}")))?;
    let max_fee = parse_hex_u128(&uo.max_fee_per_gas)
        .map_err(|e| ChainError::Unavailable(format!("invalid maxFeePerGas: {e}")))?;
    let pre_verification_gas = U256::from(
        parse_hex_u128(&uo.pre_verification_gas)
            .map_err(|e| ChainError::Unavailable(format!("invalid preVerificationGas: {e}")))?,
    );

    Ok(IEntryPoint::PackedUserOperation {
        sender,
        nonce,
        initCode: Bytes::from(
            parse_hex_bytes(&uo.init_code).map_err(|e| ChainError::Unavailable(e.to_string()))?,
        ),
        callData: Bytes::from(
            parse_hex_bytes(&uo.call_data).map_err(|e| ChainError::Unavailable(e.to_string()))?,
        ),
        accountGasLimits: pack_limits(verification_gas_limit, call_gas_limit).into(),
        preVerificationGas: pre_verification_gas,
        gasFees: pack_limits(max_priority_fee, max_fee).into(),
        paymasterAndData: Bytes::from(
            parse_hex_bytes(&uo.paymaster_and_data).map_err(|e| ChainError::Unavailable(e.to_string()))?,
        ),
        signature: Bytes::from(
            parse_hex_bytes(&uo.signature).map_err(|e| ChainError::Unavailable(e.to_string()))?,
        ),
    })
}

/// `ChainService` backed by a live `alloy` JSON-RPC provider and the
/// EntryPoint contract, following the teacher's pattern of wrapping a
/// `DynProvider` behind a purpose-built client instead of exposing the
/// provider directly to callers.
pub struct AlloyChainService {
    provider: DynProvider,
    entry_point: Address,
    max_fee_per_gas_multiplier: f64,
}

impl AlloyChainService {
    /// Connects a signing provider for the given `entry_point`. The
    /// bundler signs and sends `handleOps` transactions itself, so the
    /// provider carries a wallet (teacher's `HubClient::new_eoa` pattern)
    /// rather than a read-only connection. `max_fee_per_gas_multiplier`
    /// scales the fees returned by `current_fees` to keep a safety margin
    /// over the provider's spot estimate.
    pub async fn connect(
        rpc_url: &str,
        entry_point: Address,
        signer_private_key: [u8; 32],
        chain_id: u64,
        max_fee_per_gas_multiplier: f64,
    ) -> anyhow::Result<Self> {
        let url: Url = rpc_url.parse().context("parse BUNDLER_RPC_URL")?;

        let signer = PrivateKeySigner::from_slice(&signer_private_key)
            .context("invalid BUNDLER_BUNDLER_PRIVATE_KEY")?
            .with_chain_id(Some(chain_id));
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);
        let provider = DynProvider::new(provider);
        Ok(Self {
            provider,
            entry_point,
            max_fee_per_gas_multiplier,
        })
    }

    fn entry_point_contract(&self) -> IEntryPoint::IEntryPointInstance<DynProvider> {
        IEntryPoint::new(self.entry_point, self.provider.clone())
    }
}

#[async_trait]
impl ChainService for AlloyChainService {
    async fn compute_user_op_hash(&self, uo: &UserOperation) -> Result<String, ChainError> {
        let packed = to_packed(uo)?;
        let hash = self
            .entry_point_contract()
            .getUserOpHash(packed)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(hash.as_slice())))
    }

    async fn get_nonce(&self, sender: &str) -> Result<u128, ChainError> {
        let sender: Address = sender
            .parse()
            .map_err(|e| ChainError::Unavailable(format!("invalid sender address: {e}")))?;
        let key = Uint::<192, 3>::ZERO;
        let nonce = self
            .entry_point_contract()
            .getNonce(sender, key)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        nonce
            .try_into()
            .map_err(|_| ChainError::Unavailable("nonce overflows u128".to_string()))
    }

    async fn simulate_validation(&self, uo: &UserOperation) -> Result<SimulationOutcome, ChainError> {
        let packed = to_packed(uo)?;
        let call = self.entry_point_contract().simulateValidation(packed);
        match call.call().await {
            Ok(_) => Ok(SimulationOutcome::Ok),
            Err(err) => {
                // The EntryPoint signals both success and failure via revert
                // (ERC-4337 simulateValidation convention); distinguish them
                // by decoding the revert payload against the known selectors.
                let Some(data) = err.as_revert_data() else {
                    return Ok(SimulationOutcome::Failed {
                        reason: err.to_string(),
                    });
                };
                if IEntryPoint::ValidationResult::abi_decode(&data).is_ok() {
                    return Ok(SimulationOutcome::Ok);
                }
                if let Ok(failed) = IEntryPoint::FailedOp::abi_decode(&data) {
                    return Ok(SimulationOutcome::Failed { reason: failed.reason });
                }
                if let Ok(failed) = IEntryPoint::FailedOpWithRevert::abi_decode(&data) {
                    return Ok(SimulationOutcome::Failed { reason: failed.reason });
                }
                Ok(SimulationOutcome::Failed {
                    reason: format!("unknown revert: 0x{}", hex::encode(&data)),
                })
            }
        }
    }

    async fn current_fees(&self) -> Result<Fees, ChainError> {
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let priority = self
            .provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(1_000_000_000);

        let max_fee_per_gas = scale_fee(gas_price, self.max_fee_per_gas_multiplier);
        let max_priority_fee_per_gas = scale_fee(priority, self.max_fee_per_gas_multiplier);
        Ok(Fees {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn estimate_bundle_gas(
        &self,
        ops: &[UserOperation],
        beneficiary: &str,
    ) -> Result<u64, ChainError> {
        let beneficiary: Address = beneficiary
            .parse()
            .map_err(|e| ChainError::Unavailable(format!("invalid beneficiary: {e}")))?;
        let packed = ops
            .iter()
            .map(to_packed)
            .collect::<Result<Vec<_>, _>>()?;
        let call = self.entry_point_contract().handleOps(packed, beneficiary);
        call.estimate_gas()
            .await
            .map_err(|e| ChainError::Reverted(e.to_string()))
    }

    async fn submit_bundle(
        &self,
        ops: &[UserOperation],
        beneficiary: &str,
        gas_limit: u64,
        fees: Fees,
    ) -> Result<String, ChainError> {
        let beneficiary: Address = beneficiary
            .parse()
            .map_err(|e| ChainError::Unavailable(format!("invalid beneficiary: {e}")))?;
        let packed = ops
            .iter()
            .map(to_packed)
            .collect::<Result<Vec<_>, _>>()?;
        let calldata = IEntryPoint::handleOpsCall {
            ops: packed,
            beneficiary,
        }
        .abi_encode();
        let tx = TransactionRequest::default()
            .to(self.entry_point)
            .input(Bytes::from(calldata).into())
            .gas_limit(gas_limit)
            .max_fee_per_gas(fees.max_fee_per_gas)
            .max_priority_fee_per_gas(fees.max_priority_fee_per_gas);
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainError::Nonce(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(pending.tx_hash().as_slice())))
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<Option<Receipt>, ChainError> {
        let hash: alloy::primitives::B256 = tx_hash
            .parse()
            .map_err(|e| ChainError::Unavailable(format!("invalid tx hash: {e}")))?;
        let fut = self.provider.get_transaction_receipt(hash);
        let result = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ChainError::Unavailable("timed out".to_string()));
        match result {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(ChainError::Unavailable(e.to_string())),
            Ok(Ok(None)) => Ok(None),
            Ok(Ok(Some(receipt))) => Ok(Some(Receipt {
                status: if receipt.status() { 1 } else { 0 },
                gas_used: receipt.gas_used as u128,
                block_number: receipt.block_number.unwrap_or_default(),
                effective_gas_price: receipt.effective_gas_price,
            })),
        }
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_uo() -> UserOperation {
        UserOperation {
            sender: "0xaa00000000000000000000000000000000000a".to_string(),
            nonce: "0x5".to_string(),
            init_code: "0x".to_string(),
            call_data: "0xabcd".to_string(),
            call_gas_limit: "0x5208".to_string(),
            verification_gas_limit: "0x186a0".to_string(),
            pre_verification_gas: "0x5208".to_string(),
            max_fee_per_gas: "0x3b9aca00".to_string(),
            max_priority_fee_per_gas: "0x77359400".to_string(),
            paymaster_and_data: "0x".to_string(),
            signature: "0x00".to_string(),
        }
    }

    #[test]
    fn scale_fee_applies_multiplier() {
        assert_eq!(scale_fee(1_000_000_000, 1.5), 1_500_000_000);
        assert_eq!(scale_fee(100, 1.0), 100);
    }

    #[test]
    fn pack_limits_splits_high_and_low_halves() {
        let packed = pack_limits(0x186a0, 0x5208);
        assert_eq!(&packed[0..16], &0x186a0u128.to_be_bytes());
        assert_eq!(&packed[16..32], &0x5208u128.to_be_bytes());
    }

    #[test]
    fn to_packed_round_trips_gas_fields() {
        let uo = sample_uo();
        let packed = to_packed(&uo).unwrap();
        assert_eq!(packed.sender, uo.sender.parse::<Address>().unwrap());
        assert_eq!(packed.callData.as_ref(), &[0xab, 0xcd]);

        let mut expected_account_limits = [0u8; 32];
        expected_account_limits[0..16].copy_from_slice(&0x186a0u128.to_be_bytes());
        expected_account_limits[16..32].copy_from_slice(&0x5208u128.to_be_bytes());
        assert_eq!(packed.accountGasLimits.as_slice(), &expected_account_limits);
    }

    #[test]
    fn to_packed_rejects_invalid_sender() {
        let mut uo = sample_uo();
        uo.sender = "not-an-address".to_string();
        assert!(to_packed(&uo).is_err());
    }
}
