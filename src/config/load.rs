use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::AppConfig;
use super::parse::{non_empty, parse_hex_32, parse_receipt_timeout_action};
use crate::types::normalize_address;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Env {
    rpc_url: String,
    entry_point_address: String,
    bundler_private_key: String,
    beneficiary: String,
    port: u16,
    bundle_interval_ms: u64,
    database_url: String,
    db_max_connections: u32,
    chain_id: u64,
    max_bundle_size: usize,
    max_fee_per_gas_multiplier: f64,
    receipt_timeout_secs: u64,
    receipt_timeout_grace_ticks: u32,
    receipt_timeout_action: String,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            entry_point_address: String::new(),
            bundler_private_key: String::new(),
            beneficiary: String::new(),
            port: 4337,
            bundle_interval_ms: 15_000,
            database_url: String::new(),
            db_max_connections: 10,
            chain_id: 0,
            max_bundle_size: 10,
            max_fee_per_gas_multiplier: 1.5,
            receipt_timeout_secs: 120,
            receipt_timeout_grace_ticks: 5,
            receipt_timeout_action: String::new(),
        }
    }
}

/// Loads configuration from the process environment (optionally seeded
/// from a `.env` file by the caller), validating every required field.
/// Fails fast with process exit code 1 on missing/malformed fields.
pub fn load_config() -> Result<AppConfig> {
    let env: Env = envy::prefixed("BUNDLER_")
        .from_env()
        .context("read BUNDLER_* environment variables")?;

    let rpc_url = non_empty("BUNDLER_RPC_URL", &env.rpc_url)?;
    let entry_point_address =
        normalize_address(&non_empty("BUNDLER_ENTRY_POINT_ADDRESS", &env.entry_point_address)?)
            .context("invalid BUNDLER_ENTRY_POINT_ADDRESS")?;
    let bundler_private_key = parse_hex_32(
        "BUNDLER_BUNDLER_PRIVATE_KEY",
        &non_empty("BUNDLER_BUNDLER_PRIVATE_KEY", &env.bundler_private_key)?,
    )?;
    let database_url = non_empty("BUNDLER_DATABASE_URL", &env.database_url)?;
    if env.chain_id == 0 {
        anyhow::bail!("BUNDLER_CHAIN_ID must be set");
    }

    let beneficiary = if env.beneficiary.trim().is_empty() {
        // Resolved by the caller to the bundler signer's own address once
        // the signer is constructed from `bundler_private_key`.
        None
    } else {
        Some(normalize_address(&env.beneficiary).context("invalid BUNDLER_BENEFICIARY")?)
    };

    let receipt_timeout_action = parse_receipt_timeout_action(&env.receipt_timeout_action)?;

    Ok(AppConfig {
        rpc_url,
        entry_point_address,
        bundler_private_key,
        beneficiary,
        port: env.port,
        bundle_interval: Duration::from_millis(env.bundle_interval_ms),
        database_url,
        db_max_connections: env.db_max_connections,
        chain_id: env.chain_id,
        max_bundle_size: env.max_bundle_size,
        max_fee_per_gas_multiplier: env.max_fee_per_gas_multiplier,
        receipt_timeout: Duration::from_secs(env.receipt_timeout_secs),
        receipt_timeout_grace_ticks: env.receipt_timeout_grace_ticks,
        receipt_timeout_action,
    })
}
