use std::sync::Arc;

use thiserror::Error;

use crate::chain::{ChainError, ChainService, SimulationOutcome};
use crate::types::{UserOperation, normalize_address, parse_hex_bytes, parse_hex_u128};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid-{0}")]
    InvalidField(&'static str),
    #[error("nonce-too-low")]
    NonceTooLow,
    #[error("{0}")]
    Simulation(String),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

pub struct GasEstimate {
    pub pre_verification_gas: String,
    pub verification_gas_limit: String,
    pub call_gas_limit: String,
}

/// Composes the format / nonce / simulation admission pipeline described
/// for a single UserOperation. Holds only a `ChainService` handle, so it
/// can be exercised in tests against an in-memory fake chain.
pub struct Validator {
    chain: Arc<dyn ChainService>,
}

impl Validator {
    pub fn new(chain: Arc<dyn ChainService>) -> Self {
        Self { chain }
    }

    pub fn check_format(&self, uo: &UserOperation) -> Result<(), ValidationError> {
        if normalize_address(&uo.sender).is_err() {
            return Err(ValidationError::InvalidField("sender"));
        }
        for (field, name) in [
            (&uo.nonce, "nonce"),
            (&uo.call_gas_limit, "callGasLimit"),
            (&uo.verification_gas_limit, "verificationGasLimit"),
            (&uo.pre_verification_gas, "preVerificationGas"),
            (&uo.max_fee_per_gas, "maxFeePerGas"),
            (&uo.max_priority_fee_per_gas, "maxPriorityFeePerGas"),
        ] {
            if parse_hex_u128(field).is_err() {
                return Err(ValidationError::InvalidField(name));
            }
        }
        for (field, name) in [
            (&uo.init_code, "initCode"),
            (&uo.call_data, "callData"),
            (&uo.signature, "signature"),
        ] {
            if parse_hex_bytes(field).is_err() {
                return Err(ValidationError::InvalidField(name));
            }
        }
        if uo.paymaster_and_data != "0x" {
            let bytes = parse_hex_bytes(&uo.paymaster_and_data)
                .map_err(|_| ValidationError::InvalidField("paymasterAndData"))?;
            if bytes.len() < 20 {
                return Err(ValidationError::InvalidField("paymasterAndData"));
            }
        }
        Ok(())
    }

    /// Runs the full admission pipeline: format, hash, nonce freshness,
    /// simulation. Returns the computed hash on success.
    pub async fn validate(&self, uo: &UserOperation) -> Result<String, ValidationError> {
        self.check_format(uo)?;

        let hash = self.chain.compute_user_op_hash(uo).await?;

        let current_nonce = self.chain.get_nonce(&uo.sender).await?;
        let uo_nonce = parse_hex_u128(&uo.nonce).map_err(|_| ValidationError::InvalidField("nonce"))?;
        if uo_nonce < current_nonce {
            return Err(ValidationError::NonceTooLow);
        }

        match self.chain.simulate_validation(uo).await? {
            SimulationOutcome::Ok => Ok(hash),
            SimulationOutcome::Failed { reason } => Err(ValidationError::Simulation(reason)),
        }
    }

    /// Conservative gas defaults used when simulation cannot yield exact
    /// figures, per the byte-length formula: `(21000 + len*16) * 1.2`.
    pub fn estimate_gas(&self, uo: &UserOperation) -> Result<GasEstimate, ValidationError> {
        let call_data = parse_hex_bytes(&uo.call_data).map_err(|_| ValidationError::InvalidField("callData"))?;
        let len = call_data.len() as u128;
        let pre_verification_gas = (21_000 + len * 16) * 12 / 10;
        let verification_gas_limit = pre_verification_gas * 2;
        let call_gas_limit: u128 = 100_000;

        Ok(GasEstimate {
            pre_verification_gas: format!("0x{pre_verification_gas:x}"),
            verification_gas_limit: format!("0x{verification_gas_limit:x}"),
            call_gas_limit: format!("0x{call_gas_limit:x}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Fees, Receipt};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeChain {
        nonce: u128,
        simulate_ok: bool,
    }

    #[async_trait]
    impl ChainService for FakeChain {
        async fn compute_user_op_hash(&self, _uo: &UserOperation) -> Result<String, ChainError> {
            Ok("0xhash".to_string())
        }
        async fn get_nonce(&self, _sender: &str) -> Result<u128, ChainError> {
            Ok(self.nonce)
        }
        async fn simulate_validation(&self, _uo: &UserOperation) -> Result<SimulationOutcome, ChainError> {
            if self.simulate_ok {
                Ok(SimulationOutcome::Ok)
            } else {
                Ok(SimulationOutcome::Failed {
                    reason: "AA23 reverted".to_string(),
                })
            }
        }
        async fn current_fees(&self) -> Result<Fees, ChainError> {
            Ok(Fees {
                max_fee_per_gas: 1,
                max_priority_fee_per_gas: 1,
            })
        }
        async fn estimate_bundle_gas(&self, _ops: &[UserOperation], _beneficiary: &str) -> Result<u64, ChainError> {
            Ok(21_000)
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
            Ok(1)
        }
    }

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
            max_priority_fee_per_gas: "0x3b9aca00".to_string(),
            paymaster_and_data: "0x".to_string(),
            signature: "0x00".to_string(),
        }
    }

    #[tokio::test]
    async fn validate_succeeds_when_nonce_fresh_and_simulation_ok() {
        let validator = Validator::new(Arc::new(FakeChain {
            nonce: 5,
            simulate_ok: true,
        }));
        let hash = validator.validate(&sample_uo()).await.unwrap();
        assert_eq!(hash, "0xhash");
    }

    #[tokio::test]
    async fn validate_rejects_stale_nonce() {
        let validator = Validator::new(Arc::new(FakeChain {
            nonce: 6,
            simulate_ok: true,
        }));
        let err = validator.validate(&sample_uo()).await.unwrap_err();
        assert!(matches!(err, ValidationError::NonceTooLow));
    }

    #[tokio::test]
    async fn validate_surfaces_simulation_failure_reason() {
        let validator = Validator::new(Arc::new(FakeChain {
            nonce: 5,
            simulate_ok: false,
        }));
        let err = validator.validate(&sample_uo()).await.unwrap_err();
        assert!(matches!(err, ValidationError::Simulation(_)));
    }

    #[test]
    fn check_format_rejects_short_paymaster_and_data() {
        let validator = Validator::new(Arc::new(FakeChain {
            nonce: 0,
            simulate_ok: true,
        }));
        let mut uo = sample_uo();
        uo.paymaster_and_data = "0x1234".to_string();
        let err = validator.check_format(&uo).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField("paymasterAndData")));
    }

    #[test]
    fn estimate_gas_scales_with_call_data_length() {
        let validator = Validator::new(Arc::new(FakeChain {
            nonce: 0,
            simulate_ok: true,
        }));
        let mut uo = sample_uo();
        uo.call_data = format!("0x{}", "ab".repeat(200));
        let estimate = validator.estimate_gas(&uo).unwrap();
        let pvg = parse_hex_u128(&estimate.pre_verification_gas).unwrap();
        assert!(pvg > 21_000);
        let vgl = parse_hex_u128(&estimate.verification_gas_limit).unwrap();
        assert_eq!(vgl, pvg * 2);
    }
}
