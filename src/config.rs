mod load;
mod parse;

use std::time::Duration;

use crate::executor::ReceiptTimeoutAction;

pub use load::load_config;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc_url: String,
    pub entry_point_address: String,
    pub bundler_private_key: [u8; 32],
    pub beneficiary: Option<String>,
    pub port: u16,
    pub bundle_interval: Duration,
    pub database_url: String,
    pub db_max_connections: u32,
    pub chain_id: u64,
    pub max_bundle_size: usize,
    pub max_fee_per_gas_multiplier: f64,
    pub receipt_timeout: Duration,
    pub receipt_timeout_grace_ticks: u32,
    pub receipt_timeout_action: ReceiptTimeoutAction,
}
