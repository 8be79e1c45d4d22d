use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A single ERC-4337 UserOperation as received over JSON-RPC.
///
/// All fields are hex strings (`0x`-prefixed). Byte-string fields may be
/// empty (`"0x"`); numeric fields parse as non-negative integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: String,
    pub nonce: String,
    #[serde(default = "zero_bytes")]
    pub init_code: String,
    pub call_data: String,
    pub call_gas_limit: String,
    pub verification_gas_limit: String,
    pub pre_verification_gas: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    #[serde(default = "zero_bytes")]
    pub paymaster_and_data: String,
    pub signature: String,
}

fn zero_bytes() -> String {
    "0x".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UoStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Removed,
}

impl UoStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }

    pub fn parse(v: &str) -> Result<Self> {
        match v {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            "removed" => Ok(Self::Removed),
            other => anyhow::bail!("unknown user op status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl BundleStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(v: &str) -> Result<Self> {
        match v {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown bundle status: {other}"),
        }
    }
}

/// A `UserOperation` plus the bookkeeping fields the bundler tracks once
/// it has been hashed and admitted.
#[derive(Debug, Clone)]
pub struct UserOpRecord {
    pub user_op_hash: String,
    pub user_op: UserOperation,
    pub status: UoStatus,
    pub created_at_unix: i64,
    pub submitted_at_unix: Option<i64>,
    pub confirmed_at_unix: Option<i64>,
    pub tx_hash: Option<String>,
    pub gas_used: Option<String>,
    pub gas_cost: Option<String>,
    pub error_message: Option<String>,
    pub block_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BundleRecord {
    pub bundle_hash: String,
    pub tx_hash: Option<String>,
    pub user_op_hashes: Vec<String>,
    pub total_gas_used: Option<String>,
    pub total_gas_cost: Option<String>,
    pub status: BundleStatus,
    pub block_number: Option<String>,
    pub created_at_unix: i64,
    pub submitted_at_unix: Option<i64>,
    pub confirmed_at_unix: Option<i64>,
}

/// Lowercases addresses, strips redundant leading zeros from numeric
/// fields down to an even-length minimal encoding, and normalizes empty
/// byte strings to `"0x"`. Idempotent: applying this twice yields the
/// same result as applying it once (see tests).
pub fn format_user_operation(uo: &UserOperation) -> Result<UserOperation> {
    Ok(UserOperation {
        sender: normalize_address(&uo.sender).context("normalize sender")?,
        nonce: normalize_hex_number(&uo.nonce).context("normalize nonce")?,
        init_code: normalize_hex_bytes(&uo.init_code).context("normalize initCode")?,
        call_data: normalize_hex_bytes(&uo.call_data).context("normalize callData")?,
        call_gas_limit: normalize_hex_number(&uo.call_gas_limit).context("normalize callGasLimit")?,
        verification_gas_limit: normalize_hex_number(&uo.verification_gas_limit)
            .context("normalize verificationGasLimit")?,
        pre_verification_gas: normalize_hex_number(&uo.pre_verification_gas)
            .context("normalize preVerificationGas")?,
        max_fee_per_gas: normalize_hex_number(&uo.max_fee_per_gas).context("normalize maxFeePerGas")?,
        max_priority_fee_per_gas: normalize_hex_number(&uo.max_priority_fee_per_gas)
            .context("normalize maxPriorityFeePerGas")?,
        paymaster_and_data: normalize_hex_bytes(&uo.paymaster_and_data)
            .context("normalize paymasterAndData")?,
        signature: normalize_hex_bytes(&uo.signature).context("normalize signature")?,
    })
}

pub fn normalize_address(s: &str) -> Result<String> {
    let trimmed = s.trim().to_ascii_lowercase();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(&trimmed);
    if hex_part.len() > 40 {
        anyhow::bail!("address too long: {s}");
    }
    let padded = format!("{:0>40}", hex_part);
    hex::decode(&padded).with_context(|| format!("invalid address hex: {s}"))?;
    Ok(format!("0x{padded}"))
}

pub fn normalize_hex_bytes(s: &str) -> Result<String> {
    let trimmed = s.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed).to_ascii_lowercase();
    if hex_part.is_empty() {
        return Ok("0x".to_string());
    }
    let padded = if hex_part.len() % 2 == 1 {
        format!("0{hex_part}")
    } else {
        hex_part
    };
    hex::decode(&padded).with_context(|| format!("invalid hex bytes: {s}"))?;
    Ok(format!("0x{padded}"))
}

pub fn normalize_hex_number(s: &str) -> Result<String> {
    let trimmed = s.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed).to_ascii_lowercase();
    let unpadded = hex_part.trim_start_matches('0');
    let digits = if unpadded.is_empty() { "0" } else { unpadded };
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    hex::decode(&padded).with_context(|| format!("invalid hex number: {s}"))?;
    Ok(format!("0x{padded}"))
}

pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.trim();
    if trimmed == "0x" || trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(hex_part).context("decode hex bytes")
}

pub fn parse_hex_u128(s: &str) -> Result<u128> {
    let trimmed = s.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(hex_part, 16).with_context(|| format!("parse hex u128: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_uo() -> UserOperation {
        UserOperation {
            sender: "0xAA00000000000000000000000000000000000A".to_string(),
            nonce: "0x00".to_string(),
            init_code: "0x".to_string(),
            call_data: "0xabcd".to_string(),
            call_gas_limit: "0x5208".to_string(),
            verification_gas_limit: "0x0186A0".to_string(),
            pre_verification_gas: "0x5208".to_string(),
            max_fee_per_gas: "0x3b9aca00".to_string(),
            max_priority_fee_per_gas: "0x3b9aca00".to_string(),
            paymaster_and_data: "0x".to_string(),
            signature: "0x00".to_string(),
        }
    }

    #[test]
    fn user_op_status_roundtrip_db_strings() {
        let states = [
            UoStatus::Pending,
            UoStatus::Submitted,
            UoStatus::Confirmed,
            UoStatus::Failed,
            UoStatus::Removed,
        ];
        for state in states {
            let db = state.as_db_str();
            let parsed = UoStatus::parse(db).expect("parse known status");
            assert_eq!(parsed, state, "roundtrip mismatch for status={db}");
        }
    }

    #[test]
    fn user_op_status_parse_rejects_unknown() {
        assert!(UoStatus::parse("not_a_real_status").is_err());
    }

    #[test]
    fn bundle_status_roundtrip_db_strings() {
        for state in [
            BundleStatus::Pending,
            BundleStatus::Submitted,
            BundleStatus::Confirmed,
            BundleStatus::Failed,
        ] {
            assert_eq!(BundleStatus::parse(state.as_db_str()).unwrap(), state);
        }
    }

    #[test]
    fn format_user_operation_lowercases_and_trims_leading_zeros() {
        let uo = sample_uo();
        let formatted = format_user_operation(&uo).unwrap();
        assert_eq!(formatted.sender, "0xaa00000000000000000000000000000000000a");
        assert_eq!(formatted.nonce, "0x00");
        assert_eq!(formatted.verification_gas_limit, "0x0186a0");
    }

    #[test]
    fn format_user_operation_is_idempotent() {
        let uo = sample_uo();
        let once = format_user_operation(&uo).unwrap();
        let twice = format_user_operation(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_hex_bytes_empty_becomes_0x() {
        assert_eq!(normalize_hex_bytes("").unwrap(), "0x");
        assert_eq!(normalize_hex_bytes("0x").unwrap(), "0x");
    }

    #[test]
    fn normalize_hex_number_all_zeros_becomes_0x00() {
        assert_eq!(normalize_hex_number("0x0000").unwrap(), "0x00");
        assert_eq!(normalize_hex_number("0x").unwrap(), "0x00");
    }

    #[test]
    fn normalize_address_rejects_oversized_input() {
        let too_long = format!("0x{}", "11".repeat(21));
        assert!(normalize_address(&too_long).is_err());
    }

    #[test]
    fn parse_hex_u128_handles_empty_and_values() {
        assert_eq!(parse_hex_u128("0x").unwrap(), 0);
        assert_eq!(parse_hex_u128("0x10").unwrap(), 16);
    }
}
