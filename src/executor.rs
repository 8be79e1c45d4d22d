use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainService;
use crate::db::UserOpStore;
use crate::mempool::Mempool;
use crate::types::{BundleRecord, BundleStatus, UserOpRecord, parse_hex_u128};

pub struct ExecutorConfig {
    pub bundle_interval: Duration,
    pub max_bundle_size: usize,
    pub beneficiary: String,
    pub receipt_timeout: Duration,
    pub receipt_timeout_grace_ticks: u32,
    pub receipt_timeout_action: ReceiptTimeoutAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptTimeoutAction {
    Pending,
    Fail,
}

/// Periodic bundler tick: selects pending ops, submits a bundle, awaits
/// its receipt, and reconciles status. A single in-flight flag prevents
/// reentrant ticks, mirroring the teacher's single-flight run loop.
pub struct BundleExecutor {
    cfg: ExecutorConfig,
    chain: Arc<dyn ChainService>,
    store: Arc<dyn UserOpStore>,
    mempool: Arc<Mempool>,
    is_executing: AtomicBool,
    submitted_ticks: tokio::sync::Mutex<std::collections::HashMap<String, u32>>,
}

impl BundleExecutor {
    pub fn new(
        cfg: ExecutorConfig,
        chain: Arc<dyn ChainService>,
        store: Arc<dyn UserOpStore>,
        mempool: Arc<Mempool>,
    ) -> Self {
        Self {
            cfg,
            chain,
            store,
            mempool,
            is_executing: AtomicBool::new(false),
            submitted_ticks: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.cfg.bundle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("bundle executor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "bundle executor tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        if self
            .is_executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("bundle executor tick skipped: previous tick still running");
            return Ok(());
        }
        let result = self.tick_inner().await;
        self.is_executing.store(false, Ordering::SeqCst);
        result
    }

    async fn tick_inner(&self) -> anyhow::Result<()> {
        self.sweep_timed_out_bundles().await?;

        let selected = self.select_candidates().await;
        if selected.is_empty() {
            return Ok(());
        }

        let mut hashed = Vec::with_capacity(selected.len());
        for record in selected {
            match self.chain.compute_user_op_hash(&record.user_op).await {
                Ok(hash) => hashed.push((hash, record)),
                Err(err) => {
                    tracing::warn!(error = %err, hash = %record.user_op_hash, "dropping op from bundle: hash recompute failed");
                }
            }
        }
        if hashed.is_empty() {
            return Ok(());
        }

        let ops: Vec<_> = hashed.iter().map(|(_, r)| r.user_op.clone()).collect();
        let hashes: Vec<_> = hashed.iter().map(|(h, _)| h.clone()).collect();

        let bundle_hash = compute_bundle_hash(&hashes);
        let fees = self.chain.current_fees().await?;
        let gas_estimate = self
            .chain
            .estimate_bundle_gas(&ops, &self.cfg.beneficiary)
            .await?;
        let gas_limit = gas_estimate * 12 / 10;

        let tx_hash = self
            .chain
            .submit_bundle(&ops, &self.cfg.beneficiary, gas_limit, fees)
            .await?;

        self.store
            .save_bundle(&BundleRecord {
                bundle_hash: bundle_hash.clone(),
                tx_hash: Some(tx_hash.clone()),
                user_op_hashes: hashes.clone(),
                total_gas_used: None,
                total_gas_cost: None,
                status: BundleStatus::Submitted,
                block_number: None,
                created_at_unix: 0,
                submitted_at_unix: None,
                confirmed_at_unix: None,
            })
            .await?;

        for hash in &hashes {
            self.mempool.mark_submitted(hash, &tx_hash).await?;
        }
        self.submitted_ticks.lock().await.insert(bundle_hash.clone(), 0);

        self.reconcile(&bundle_hash, &tx_hash, &hashes).await
    }

    async fn select_candidates(&self) -> Vec<UserOpRecord> {
        let mut all = self.mempool.get_all().await;
        all.sort_by(|a, b| {
            let fee_a = parse_hex_u128(&a.user_op.max_fee_per_gas).unwrap_or(0);
            let fee_b = parse_hex_u128(&b.user_op.max_fee_per_gas).unwrap_or(0);
            fee_b.cmp(&fee_a)
        });
        all.truncate(self.cfg.max_bundle_size);
        all
    }

    async fn reconcile(&self, bundle_hash: &str, tx_hash: &str, hashes: &[String]) -> anyhow::Result<()> {
        let receipt = self
            .chain
            .wait_for_receipt(tx_hash, self.cfg.receipt_timeout)
            .await?;

        let Some(receipt) = receipt else {
            // Left `submitted`; the grace-period sweep reclaims it later.
            return Ok(());
        };
        self.submitted_ticks.lock().await.remove(bundle_hash);

        if receipt.status == 1 {
            let gas_used = format!("0x{:x}", receipt.gas_used);
            let gas_cost = format!("0x{:x}", receipt.gas_used * receipt.effective_gas_price);
            let block_number = format!("0x{:x}", receipt.block_number);

            self.store
                .update_bundle_status(
                    bundle_hash,
                    BundleStatus::Confirmed,
                    Some(&block_number),
                    Some(&gas_used),
                    Some(&gas_cost),
                )
                .await?;
            for hash in hashes {
                self.mempool
                    .mark_confirmed(hash, &gas_used, &gas_cost, &block_number)
                    .await?;
            }
        } else {
            self.store
                .update_bundle_status(bundle_hash, BundleStatus::Failed, None, None, None)
                .await?;
            for hash in hashes {
                self.mempool.mark_failed(hash, "transaction-reverted").await?;
            }
        }
        Ok(())
    }

    /// Reclaims bundles whose receipt never arrived within
    /// `receiptTimeoutGraceTicks` ticks, per the reconciliation-timeout
    /// policy decided in the design notes.
    async fn sweep_timed_out_bundles(&self) -> anyhow::Result<()> {
        let mut expired = Vec::new();
        {
            let mut ticks = self.submitted_ticks.lock().await;
            for (bundle_hash, count) in ticks.iter_mut() {
                *count += 1;
                if *count >= self.cfg.receipt_timeout_grace_ticks {
                    expired.push(bundle_hash.clone());
                }
            }
            for bundle_hash in &expired {
                ticks.remove(bundle_hash);
            }
        }

        for bundle_hash in expired {
            let member_hashes = self.store.list_bundle_member_hashes(&bundle_hash).await?;
            let mut members = Vec::with_capacity(member_hashes.len());
            for hash in &member_hashes {
                if let Some(record) = self.store.get_user_op_by_hash(hash).await? {
                    members.push(record);
                }
            }

            match self.cfg.receipt_timeout_action {
                ReceiptTimeoutAction::Pending => {
                    self.store
                        .update_bundle_status(&bundle_hash, BundleStatus::Pending, None, None, None)
                        .await?;
                    for record in members {
                        self.mempool.requeue_as_pending(record).await?;
                    }
                }
                ReceiptTimeoutAction::Fail => {
                    self.store
                        .update_bundle_status(&bundle_hash, BundleStatus::Failed, None, None, None)
                        .await?;
                    for record in members {
                        self.mempool
                            .mark_failed(&record.user_op_hash, "receipt-timeout")
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `bundleHash` is the concatenation of member hashes in selection order,
/// keccak256-hashed — grounded on the EntryPoint's own hash-of-hashes
/// pattern for aggregate bundle identity.
fn compute_bundle_hash(hashes: &[String]) -> String {
    use alloy::primitives::keccak256;
    let mut buf = Vec::with_capacity(hashes.len() * 32);
    for h in hashes {
        if let Ok(bytes) = crate::types::parse_hex_bytes(h) {
            buf.extend_from_slice(&bytes);
        }
    }
    format!("0x{}", hex::encode(keccak256(buf).as_slice()))
}
