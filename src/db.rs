mod bundles;
mod migrations;
mod userops;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Executor, Postgres, postgres::PgPoolOptions};

use crate::types::{BundleRecord, BundleStatus, UserOpRecord, UoStatus};

/// Persistent store of UserOperation and Bundle records, behind a narrow
/// trait so the mempool and executor can be unit-tested with an
/// in-memory fake instead of a live Postgres instance.
#[async_trait]
pub trait UserOpStore: Send + Sync {
    async fn save_user_op(&self, record: &UserOpRecord) -> Result<()>;

    async fn update_user_op_status(
        &self,
        hash: &str,
        new_status: UoStatus,
        tx_hash: Option<&str>,
        gas_used: Option<&str>,
        gas_cost: Option<&str>,
        error_message: Option<&str>,
        block_number: Option<&str>,
    ) -> Result<()>;

    async fn get_user_op_by_hash(&self, hash: &str) -> Result<Option<UserOpRecord>>;

    async fn list_pending(&self, limit: i64) -> Result<Vec<UserOpRecord>>;

    async fn list_submitted(&self) -> Result<Vec<UserOpRecord>>;

    async fn save_bundle(&self, record: &BundleRecord) -> Result<()>;

    async fn update_bundle_status(
        &self,
        bundle_hash: &str,
        new_status: BundleStatus,
        block_number: Option<&str>,
        total_gas_used: Option<&str>,
        total_gas_cost: Option<&str>,
    ) -> Result<()>;

    async fn get_bundle_by_tx_hash(&self, tx_hash: &str) -> Result<Option<BundleRecord>>;

    async fn list_bundle_member_hashes(&self, bundle_hash: &str) -> Result<Vec<String>>;
}

/// `sqlx::PgPool`-backed store, following the teacher's `SolverDb`
/// conventions: advisory-lock-guarded migrations and `WHERE`-clause
/// enforced monotonic status transitions.
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .context("connect BUNDLER_DATABASE_URL")?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

pub(crate) async fn exec_sql_batch<E>(exec: &mut E, sql: &str) -> Result<()>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    for stmt in sql.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(&mut *exec).await.with_context(|| {
            format!(
                "execute migration statement: {}",
                s.lines().next().unwrap_or("")
            )
        })?;
    }
    Ok(())
}

#[async_trait]
impl UserOpStore for PgStore {
    async fn save_user_op(&self, record: &UserOpRecord) -> Result<()> {
        self.save_user_op_row(record).await
    }

    async fn update_user_op_status(
        &self,
        hash: &str,
        new_status: UoStatus,
        tx_hash: Option<&str>,
        gas_used: Option<&str>,
        gas_cost: Option<&str>,
        error_message: Option<&str>,
        block_number: Option<&str>,
    ) -> Result<()> {
        self.update_user_op_status_row(
            hash,
            new_status,
            tx_hash,
            gas_used,
            gas_cost,
            error_message,
            block_number,
        )
        .await
    }

    async fn get_user_op_by_hash(&self, hash: &str) -> Result<Option<UserOpRecord>> {
        self.get_user_op_by_hash_row(hash).await
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<UserOpRecord>> {
        self.list_pending_rows(limit).await
    }

    async fn list_submitted(&self) -> Result<Vec<UserOpRecord>> {
        self.list_submitted_rows().await
    }

    async fn save_bundle(&self, record: &BundleRecord) -> Result<()> {
        self.save_bundle_row(record).await
    }

    async fn update_bundle_status(
        &self,
        bundle_hash: &str,
        new_status: BundleStatus,
        block_number: Option<&str>,
        total_gas_used: Option<&str>,
        total_gas_cost: Option<&str>,
    ) -> Result<()> {
        self.update_bundle_status_row(bundle_hash, new_status, block_number, total_gas_used, total_gas_cost)
            .await
    }

    async fn get_bundle_by_tx_hash(&self, tx_hash: &str) -> Result<Option<BundleRecord>> {
        self.get_bundle_by_tx_hash_row(tx_hash).await
    }

    async fn list_bundle_member_hashes(&self, bundle_hash: &str) -> Result<Vec<String>> {
        self.list_bundle_member_hashes_row(bundle_hash).await
    }
}
